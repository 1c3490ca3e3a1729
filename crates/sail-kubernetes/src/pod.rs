use std::collections::BTreeMap;

use k8s_openapi::api::core::v1::{
    Container, ContainerPort, EnvVar, HTTPGetAction, Pod, PodSpec, Probe, SecretVolumeSource,
    Volume, VolumeMount,
};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
use k8s_openapi::apimachinery::pkg::util::intstr::IntOrString;

use crate::constants::{
    BLOCK_MANAGER_PORT_NAME, DRIVER_CONTAINER_NAME, DRIVER_PORT_NAME, ENV_DRIVER_HOST,
    ENV_DRIVER_LAUNCHER_SERVER_PORT, ENV_SUBMISSION_SECRET_LOCATION, SUBMISSION_API_PATH,
    SUBMISSION_SECRET_BASE_DIR, SUBMISSION_SECRET_KEY, SUBMISSION_SECRET_VOLUME_NAME,
    SUBMISSION_SERVER_PORT_NAME, UI_PORT_NAME,
};
use crate::options::DriverPorts;

/// The inputs for the driver pod.
/// The service name is only known once the service has been created.
#[derive(Debug, Clone)]
pub struct DriverPodSpec<'a> {
    pub app_id: &'a str,
    pub labels: &'a BTreeMap<String, String>,
    pub image: &'a str,
    pub service_account_name: &'a str,
    pub secret_name: &'a str,
    pub service_name: &'a str,
    pub namespace: &'a str,
    pub ports: DriverPorts,
}

/// The directory where the submission secret is mounted in the driver container.
pub fn secret_mount_path(app_id: &str) -> String {
    format!("{SUBMISSION_SECRET_BASE_DIR}/{app_id}")
}

/// The in-cluster DNS name of the driver service.
pub fn service_host(service_name: &str, namespace: &str) -> String {
    format!("{service_name}.{namespace}.svc.cluster.local")
}

impl DriverPodSpec<'_> {
    pub fn build(&self) -> Pod {
        let mount_path = secret_mount_path(self.app_id);
        let env = |name: &str, value: String| EnvVar {
            name: name.to_string(),
            value: Some(value),
            value_from: None,
        };
        let port = |name: &str, port: u16| ContainerPort {
            name: Some(name.to_string()),
            container_port: i32::from(port),
            protocol: Some("TCP".to_string()),
            ..Default::default()
        };
        let container = Container {
            name: DRIVER_CONTAINER_NAME.to_string(),
            image: Some(self.image.to_string()),
            image_pull_policy: Some("IfNotPresent".to_string()),
            volume_mounts: Some(vec![VolumeMount {
                name: SUBMISSION_SECRET_VOLUME_NAME.to_string(),
                mount_path: mount_path.clone(),
                read_only: Some(true),
                ..Default::default()
            }]),
            env: Some(vec![
                env(
                    ENV_SUBMISSION_SECRET_LOCATION,
                    format!("{mount_path}/{SUBMISSION_SECRET_KEY}"),
                ),
                env(
                    ENV_DRIVER_LAUNCHER_SERVER_PORT,
                    self.ports.launcher.to_string(),
                ),
                env(
                    ENV_DRIVER_HOST,
                    service_host(self.service_name, self.namespace),
                ),
            ]),
            ports: Some(vec![
                port(SUBMISSION_SERVER_PORT_NAME, self.ports.launcher),
                port(DRIVER_PORT_NAME, self.ports.driver),
                port(BLOCK_MANAGER_PORT_NAME, self.ports.block_manager),
                port(UI_PORT_NAME, self.ports.ui),
            ]),
            // The container becomes ready once the driver launcher accepts pings.
            readiness_probe: Some(Probe {
                http_get: Some(HTTPGetAction {
                    path: Some(format!("{SUBMISSION_API_PATH}/ping")),
                    port: IntOrString::String(SUBMISSION_SERVER_PORT_NAME.to_string()),
                    ..Default::default()
                }),
                ..Default::default()
            }),
            ..Default::default()
        };
        Pod {
            metadata: ObjectMeta {
                name: Some(self.app_id.to_string()),
                labels: Some(self.labels.clone()),
                ..Default::default()
            },
            spec: Some(PodSpec {
                restart_policy: Some("OnFailure".to_string()),
                service_account_name: Some(self.service_account_name.to_string()),
                subdomain: Some(self.service_name.to_string()),
                volumes: Some(vec![Volume {
                    name: SUBMISSION_SECRET_VOLUME_NAME.to_string(),
                    secret: Some(SecretVolumeSource {
                        secret_name: Some(self.secret_name.to_string()),
                        ..Default::default()
                    }),
                    ..Default::default()
                }]),
                containers: vec![container],
                ..Default::default()
            }),
            status: None,
        }
    }
}
