use std::collections::BTreeMap;
use std::sync::Arc;

use k8s_openapi::api::core::v1::{Secret, Service, ServicePort, ServiceSpec};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
use k8s_openapi::apimachinery::pkg::util::intstr::IntOrString;
use k8s_openapi::ByteString;
use log::info;

use crate::cluster::KubernetesCluster;
use crate::error::{SubmitError, SubmitResult};

/// A port exposed by the driver service.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServicePortSpec {
    pub name: String,
    pub port: u16,
}

impl ServicePortSpec {
    pub fn new(name: impl Into<String>, port: u16) -> Self {
        Self {
            name: name.into(),
            port,
        }
    }

    fn to_service_port(&self) -> ServicePort {
        ServicePort {
            name: Some(self.name.clone()),
            port: i32::from(self.port),
            target_port: Some(IntOrString::Int(i32::from(self.port))),
            protocol: Some("TCP".to_string()),
            ..Default::default()
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SecretRef {
    pub name: String,
}

/// A service created by the provisioner, along with the node ports
/// allocated by the cluster for each named port.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServiceRef {
    pub name: String,
    pub node_ports: BTreeMap<String, u16>,
}

impl ServiceRef {
    pub fn node_port(&self, port_name: &str) -> Option<u16> {
        self.node_ports.get(port_name).copied()
    }

    fn from_service(service: &Service) -> SubmitResult<Self> {
        let name = service
            .metadata
            .name
            .clone()
            .ok_or_else(|| SubmitError::internal("created service has no name"))?;
        let node_ports = service
            .spec
            .iter()
            .flat_map(|spec| spec.ports.iter().flatten())
            .filter_map(|port| {
                let name = port.name.clone()?;
                let node_port = u16::try_from(port.node_port?).ok()?;
                Some((name, node_port))
            })
            .collect();
        Ok(Self { name, node_ports })
    }
}

/// Creates and destroys the ephemeral objects that front the driver pod.
/// Every call is a single round trip to the control plane.
#[derive(Clone)]
pub struct ResourceProvisioner {
    cluster: Arc<dyn KubernetesCluster>,
}

impl ResourceProvisioner {
    pub fn new(cluster: Arc<dyn KubernetesCluster>) -> Self {
        Self { cluster }
    }

    pub async fn create_secret(
        &self,
        name: &str,
        labels: &BTreeMap<String, String>,
        payload: BTreeMap<String, Vec<u8>>,
    ) -> SubmitResult<SecretRef> {
        let secret = Secret {
            metadata: ObjectMeta {
                name: Some(name.to_string()),
                labels: Some(labels.clone()),
                ..Default::default()
            },
            data: Some(
                payload
                    .into_iter()
                    .map(|(k, v)| (k, ByteString(v)))
                    .collect(),
            ),
            type_: Some("Opaque".to_string()),
            ..Default::default()
        };
        let secret = self.cluster.create_secret(&secret).await?;
        let name = secret.metadata.name.unwrap_or_else(|| name.to_string());
        info!("created submission secret {name}");
        Ok(SecretRef { name })
    }

    pub async fn create_service(
        &self,
        name: &str,
        labels: &BTreeMap<String, String>,
        selector: &BTreeMap<String, String>,
        ports: &[ServicePortSpec],
        service_type: &str,
    ) -> SubmitResult<ServiceRef> {
        let service = Service {
            metadata: ObjectMeta {
                name: Some(name.to_string()),
                labels: Some(labels.clone()),
                ..Default::default()
            },
            spec: Some(ServiceSpec {
                type_: Some(service_type.to_string()),
                selector: Some(selector.clone()),
                ports: Some(ports.iter().map(|x| x.to_service_port()).collect()),
                ..Default::default()
            }),
            status: None,
        };
        let service = self.cluster.create_service(&service).await?;
        let service = ServiceRef::from_service(&service)?;
        info!(
            "created driver service {} with node ports {:?}",
            service.name, service.node_ports
        );
        Ok(service)
    }

    pub async fn delete_secret(&self, secret: &SecretRef) -> SubmitResult<()> {
        self.cluster.delete_secret(&secret.name).await
    }

    pub async fn delete_service(&self, service: &ServiceRef) -> SubmitResult<()> {
        self.cluster.delete_service(&service.name).await
    }

    /// Replaces the ports and the type of the service.
    pub async fn reconfigure_service(
        &self,
        service: &ServiceRef,
        ports: &[ServicePortSpec],
        service_type: &str,
    ) -> SubmitResult<ServiceRef> {
        let spec = ServiceSpec {
            type_: Some(service_type.to_string()),
            ports: Some(ports.iter().map(|x| x.to_service_port()).collect()),
            ..Default::default()
        };
        let updated = self.cluster.patch_service(&service.name, &spec).await?;
        info!(
            "reconfigured driver service {} as {service_type} exposing {:?}",
            service.name,
            ports.iter().map(|x| &x.name).collect::<Vec<_>>()
        );
        ServiceRef::from_service(&updated)
    }
}
