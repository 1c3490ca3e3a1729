use futures::stream::BoxStream;
use futures::StreamExt;
use k8s_openapi::api::core::v1::{Node, Pod, Secret, Service, ServiceSpec};
use kube::api::{DeleteParams, ListParams, Patch, PatchParams, PostParams};
use kube::config::AuthInfo;
use kube::runtime::watcher;
use kube::{Api, Client, Config};
use log::debug;
use rustls::pki_types::pem::PemObject;
use rustls::pki_types::CertificateDer;

use crate::error::{SubmitError, SubmitResult};
use crate::options::KubernetesClientOptions;

/// A change notification for the watched driver pod.
#[derive(Debug, Clone)]
pub enum PodEvent {
    Added(Pod),
    Modified(Pod),
    Deleted(Pod),
    /// The control plane reported an error and terminated the watch.
    Error(String),
}

pub type PodEventStream = BoxStream<'static, SubmitResult<PodEvent>>;

/// The subset of the Kubernetes API used to launch a driver.
/// All operations are scoped to the namespace of the submission.
#[async_trait::async_trait]
pub trait KubernetesCluster: Send + Sync + 'static {
    async fn create_secret(&self, secret: &Secret) -> SubmitResult<Secret>;
    async fn delete_secret(&self, name: &str) -> SubmitResult<()>;
    async fn create_service(&self, service: &Service) -> SubmitResult<Service>;
    /// Replaces the ports and type of the service with the given spec.
    async fn patch_service(&self, name: &str, spec: &ServiceSpec) -> SubmitResult<Service>;
    async fn delete_service(&self, name: &str) -> SubmitResult<()>;
    async fn create_pod(&self, pod: &Pod) -> SubmitResult<Pod>;
    async fn get_pod(&self, name: &str) -> SubmitResult<Pod>;
    async fn delete_pod(&self, name: &str) -> SubmitResult<()>;
    /// Opens a watch on the pod with the given name.
    /// The stream starts from the current state of the pod, even if it does not exist yet,
    /// and resumes across server-side watch timeouts instead of ending.
    async fn watch_pod(&self, name: &str) -> SubmitResult<PodEventStream>;
    async fn list_nodes(&self) -> SubmitResult<Vec<Node>>;
}

pub struct KubeCluster {
    secrets: Api<Secret>,
    services: Api<Service>,
    pods: Api<Pod>,
    nodes: Api<Node>,
}

impl KubeCluster {
    pub fn new(client: Client, namespace: &str) -> Self {
        Self {
            secrets: Api::namespaced(client.clone(), namespace),
            services: Api::namespaced(client.clone(), namespace),
            pods: Api::namespaced(client.clone(), namespace),
            nodes: Api::all(client),
        }
    }

    pub fn try_new(options: &KubernetesClientOptions) -> SubmitResult<Self> {
        let client = Client::try_from(Self::config(options)?)?;
        Ok(Self::new(client, &options.namespace))
    }

    fn config(options: &KubernetesClientOptions) -> SubmitResult<Config> {
        let cluster_url = options.master_url.parse().map_err(|e| {
            SubmitError::config(format!("invalid master URL {}: {e}", options.master_url))
        })?;
        let mut config = Config::new(cluster_url);
        config.default_namespace = options.namespace.clone();
        if let Some(path) = &options.ca_cert_file {
            let certs = CertificateDer::pem_file_iter(path)
                .and_then(|certs| certs.collect::<Result<Vec<_>, _>>())
                .map_err(|e| {
                    SubmitError::config(format!(
                        "failed to read CA certificate {}: {e}",
                        path.display()
                    ))
                })?;
            config.root_cert = Some(certs.into_iter().map(|x| x.to_vec()).collect());
        }
        if let (Some(key), Some(cert)) = (&options.client_key_file, &options.client_cert_file) {
            config.auth_info = AuthInfo {
                client_key: Some(key.display().to_string()),
                client_certificate: Some(cert.display().to_string()),
                ..Default::default()
            };
        }
        Ok(config)
    }
}

impl PodEvent {
    /// Converts a watcher event, skipping the markers around the initial listing.
    fn from_watcher_event(event: watcher::Event<Pod>) -> Option<Self> {
        match event {
            watcher::Event::InitApply(pod) => Some(PodEvent::Added(pod)),
            watcher::Event::Apply(pod) => Some(PodEvent::Modified(pod)),
            watcher::Event::Delete(pod) => Some(PodEvent::Deleted(pod)),
            watcher::Event::Init | watcher::Event::InitDone => None,
        }
    }
}

#[async_trait::async_trait]
impl KubernetesCluster for KubeCluster {
    async fn create_secret(&self, secret: &Secret) -> SubmitResult<Secret> {
        Ok(self.secrets.create(&PostParams::default(), secret).await?)
    }

    async fn delete_secret(&self, name: &str) -> SubmitResult<()> {
        self.secrets.delete(name, &DeleteParams::default()).await?;
        Ok(())
    }

    async fn create_service(&self, service: &Service) -> SubmitResult<Service> {
        Ok(self.services.create(&PostParams::default(), service).await?)
    }

    async fn patch_service(&self, name: &str, spec: &ServiceSpec) -> SubmitResult<Service> {
        // A JSON merge patch replaces the port list as a whole.
        let patch = serde_json::json!({
            "spec": {
                "type": spec.type_,
                "ports": spec.ports,
            }
        });
        Ok(self
            .services
            .patch(name, &PatchParams::default(), &Patch::Merge(&patch))
            .await?)
    }

    async fn delete_service(&self, name: &str) -> SubmitResult<()> {
        self.services.delete(name, &DeleteParams::default()).await?;
        Ok(())
    }

    async fn create_pod(&self, pod: &Pod) -> SubmitResult<Pod> {
        Ok(self.pods.create(&PostParams::default(), pod).await?)
    }

    async fn get_pod(&self, name: &str) -> SubmitResult<Pod> {
        Ok(self.pods.get(name).await?)
    }

    async fn delete_pod(&self, name: &str) -> SubmitResult<()> {
        self.pods.delete(name, &DeleteParams::default()).await?;
        Ok(())
    }

    async fn watch_pod(&self, name: &str) -> SubmitResult<PodEventStream> {
        let config = watcher::Config::default().fields(&format!("metadata.name={name}"));
        debug!("watching pod {name}");
        Ok(watcher::watcher(self.pods.clone(), config)
            .filter_map(|event| async move {
                match event {
                    Ok(event) => PodEvent::from_watcher_event(event).map(Ok),
                    Err(watcher::Error::WatchError(e)) => Some(Ok(PodEvent::Error(e.to_string()))),
                    Err(e) => Some(Err(SubmitError::WatchClosed(e.to_string()))),
                }
            })
            .boxed())
    }

    async fn list_nodes(&self) -> SubmitResult<Vec<Node>> {
        Ok(self.nodes.list(&ListParams::default()).await?.items)
    }
}
