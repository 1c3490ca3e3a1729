//! In-memory collaborators for testing the launch workflow.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use futures::StreamExt;
use k8s_openapi::api::core::v1::{
    ContainerState, ContainerStateWaiting, ContainerStatus, Node, NodeAddress, NodeStatus, Pod,
    PodStatus, Secret, Service, ServiceSpec,
};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
use kube::core::ErrorResponse;
use tokio::sync::mpsc;
use tokio_stream::wrappers::UnboundedReceiverStream;

use crate::cluster::{KubernetesCluster, PodEvent, PodEventStream};
use crate::constants::DRIVER_CONTAINER_NAME;
use crate::error::{SubmitError, SubmitResult};
use crate::rpc::{DriverLauncherClient, DriverLauncherConnector, LauncherAddress};
use crate::submission::CreateSubmissionRequest;

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|e| e.into_inner())
}

fn api_error(code: u16, reason: &str, message: String) -> SubmitError {
    SubmitError::ClusterCommunicationError(kube::Error::Api(ErrorResponse {
        status: "Failure".to_string(),
        message,
        reason: reason.to_string(),
        code,
    }))
}

fn not_found(kind: &str, name: &str) -> SubmitError {
    api_error(404, "NotFound", format!("{kind} \"{name}\" not found"))
}

/// A pod with the given phase whose driver container has the given readiness.
pub fn driver_pod(name: &str, phase: &str, ready: bool) -> Pod {
    Pod {
        metadata: ObjectMeta {
            name: Some(name.to_string()),
            ..Default::default()
        },
        spec: None,
        status: Some(PodStatus {
            phase: Some(phase.to_string()),
            container_statuses: Some(vec![ContainerStatus {
                name: DRIVER_CONTAINER_NAME.to_string(),
                ready,
                ..Default::default()
            }]),
            ..Default::default()
        }),
    }
}

/// How the driver pod behaves once it is created.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DriverBehavior {
    /// The pod becomes ready once.
    Ready,
    /// The pod reports ready in the given number of consecutive events.
    ReadyRepeatedly(usize),
    /// The pod stays pending because its image cannot be pulled.
    NeverReady,
    /// The watch fails before the pod becomes ready.
    WatchError,
    /// The pod is deleted by someone else, and then the watch fails.
    DeletedThenWatchError,
}

#[derive(Default)]
struct FakeClusterState {
    secrets: BTreeMap<String, Secret>,
    services: BTreeMap<String, Service>,
    pods: BTreeMap<String, Pod>,
    watchers: BTreeMap<String, mpsc::UnboundedSender<SubmitResult<PodEvent>>>,
    initial_node_ports: BTreeMap<String, u16>,
    next_node_port: u16,
    calls: Vec<String>,
}

/// A single-namespace cluster kept in memory.
/// Pod events are delivered only to watches opened before the pod is created.
pub struct FakeCluster {
    behavior: DriverBehavior,
    fail_secret_creation: bool,
    fail_service_creation: bool,
    fail_deletes: bool,
    watch_expiry: Option<Duration>,
    state: Mutex<FakeClusterState>,
}

impl Default for FakeCluster {
    fn default() -> Self {
        Self::new()
    }
}

impl FakeCluster {
    pub const NODE_EXTERNAL_IP: &'static str = "203.0.113.10";

    pub fn new() -> Self {
        Self {
            behavior: DriverBehavior::Ready,
            fail_secret_creation: false,
            fail_service_creation: false,
            fail_deletes: false,
            watch_expiry: None,
            state: Mutex::new(FakeClusterState {
                next_node_port: 30000,
                ..Default::default()
            }),
        }
    }

    pub fn with_behavior(mut self, behavior: DriverBehavior) -> Self {
        self.behavior = behavior;
        self
    }

    pub fn with_failing_secret_creation(mut self) -> Self {
        self.fail_secret_creation = true;
        self
    }

    pub fn with_failing_service_creation(mut self) -> Self {
        self.fail_service_creation = true;
        self
    }

    pub fn with_failing_deletes(mut self) -> Self {
        self.fail_deletes = true;
        self
    }

    /// Ends every watch stream normally after the given duration,
    /// the way the API server closes a watch when its timeout expires.
    pub fn with_watch_expiry(mut self, expiry: Duration) -> Self {
        self.watch_expiry = Some(expiry);
        self
    }

    pub fn calls(&self) -> Vec<String> {
        lock(&self.state).calls.clone()
    }

    pub fn count_calls(&self, name: &str) -> usize {
        lock(&self.state).calls.iter().filter(|x| *x == name).count()
    }

    pub fn secret(&self, name: &str) -> Option<Secret> {
        lock(&self.state).secrets.get(name).cloned()
    }

    pub fn service(&self, name: &str) -> Option<Service> {
        lock(&self.state).services.get(name).cloned()
    }

    pub fn pod(&self, name: &str) -> Option<Pod> {
        lock(&self.state).pods.get(name).cloned()
    }

    pub fn secret_names(&self) -> Vec<String> {
        lock(&self.state).secrets.keys().cloned().collect()
    }

    pub fn service_names(&self) -> Vec<String> {
        lock(&self.state).services.keys().cloned().collect()
    }

    pub fn pod_names(&self) -> Vec<String> {
        lock(&self.state).pods.keys().cloned().collect()
    }

    /// The node port allocated for the named service port when the service was created.
    pub fn initial_node_port(&self, port_name: &str) -> Option<u16> {
        lock(&self.state).initial_node_ports.get(port_name).copied()
    }

    fn record(&self, call: &str) -> MutexGuard<'_, FakeClusterState> {
        let mut state = lock(&self.state);
        state.calls.push(call.to_string());
        state
    }

    fn pod_events(&self, name: &str) -> (Option<Pod>, Vec<SubmitResult<PodEvent>>, bool) {
        let ready = driver_pod(name, "Running", true);
        match self.behavior {
            DriverBehavior::Ready => (
                Some(ready.clone()),
                vec![
                    Ok(PodEvent::Added(driver_pod(name, "Pending", false))),
                    Ok(PodEvent::Modified(ready)),
                ],
                true,
            ),
            DriverBehavior::ReadyRepeatedly(n) => (
                Some(ready.clone()),
                (0..n).map(|_| Ok(PodEvent::Modified(ready.clone()))).collect(),
                true,
            ),
            DriverBehavior::NeverReady => {
                let mut pod = driver_pod(name, "Pending", false);
                if let Some(status) = pod
                    .status
                    .as_mut()
                    .and_then(|x| x.container_statuses.as_mut())
                    .and_then(|x| x.first_mut())
                {
                    status.state = Some(ContainerState {
                        waiting: Some(ContainerStateWaiting {
                            reason: Some("ImagePullBackOff".to_string()),
                            message: Some("Back-off pulling image".to_string()),
                        }),
                        ..Default::default()
                    });
                }
                (Some(pod.clone()), vec![Ok(PodEvent::Added(pod))], true)
            }
            DriverBehavior::WatchError => (
                Some(driver_pod(name, "Pending", false)),
                vec![
                    Ok(PodEvent::Added(driver_pod(name, "Pending", false))),
                    Err(SubmitError::internal("connection reset by peer")),
                ],
                false,
            ),
            DriverBehavior::DeletedThenWatchError => (
                None,
                vec![
                    Ok(PodEvent::Added(driver_pod(name, "Pending", false))),
                    Ok(PodEvent::Deleted(driver_pod(name, "Pending", false))),
                    Ok(PodEvent::Error("Gone (410): too old resource version".to_string())),
                ],
                false,
            ),
        }
    }
}

#[async_trait::async_trait]
impl KubernetesCluster for FakeCluster {
    async fn create_secret(&self, secret: &Secret) -> SubmitResult<Secret> {
        let mut state = self.record("create_secret");
        if self.fail_secret_creation {
            return Err(api_error(403, "Forbidden", "secrets is forbidden".to_string()));
        }
        let name = secret.metadata.name.clone().unwrap_or_default();
        state.secrets.insert(name, secret.clone());
        Ok(secret.clone())
    }

    async fn delete_secret(&self, name: &str) -> SubmitResult<()> {
        let mut state = self.record("delete_secret");
        if self.fail_deletes {
            return Err(api_error(500, "InternalError", "etcd unavailable".to_string()));
        }
        state
            .secrets
            .remove(name)
            .map(|_| ())
            .ok_or_else(|| not_found("secrets", name))
    }

    async fn create_service(&self, service: &Service) -> SubmitResult<Service> {
        let mut state = self.record("create_service");
        if self.fail_service_creation {
            return Err(api_error(422, "Invalid", "port is already allocated".to_string()));
        }
        let mut service = service.clone();
        let is_node_port = service
            .spec
            .as_ref()
            .and_then(|x| x.type_.as_deref())
            == Some("NodePort");
        let mut allocated = BTreeMap::new();
        if is_node_port {
            for port in service
                .spec
                .iter_mut()
                .flat_map(|x| x.ports.iter_mut().flatten())
            {
                let node_port = state.next_node_port;
                state.next_node_port += 1;
                port.node_port = Some(i32::from(node_port));
                allocated.insert(port.name.clone().unwrap_or_default(), node_port);
            }
        }
        state.initial_node_ports = allocated;
        let name = service.metadata.name.clone().unwrap_or_default();
        state.services.insert(name, service.clone());
        Ok(service)
    }

    async fn patch_service(&self, name: &str, spec: &ServiceSpec) -> SubmitResult<Service> {
        let mut state = self.record("patch_service");
        let service = state
            .services
            .get_mut(name)
            .ok_or_else(|| not_found("services", name))?;
        let current = service.spec.get_or_insert_with(Default::default);
        current.type_ = spec.type_.clone();
        current.ports = spec.ports.clone();
        Ok(service.clone())
    }

    async fn delete_service(&self, name: &str) -> SubmitResult<()> {
        let mut state = self.record("delete_service");
        if self.fail_deletes {
            return Err(api_error(500, "InternalError", "etcd unavailable".to_string()));
        }
        state
            .services
            .remove(name)
            .map(|_| ())
            .ok_or_else(|| not_found("services", name))
    }

    async fn create_pod(&self, pod: &Pod) -> SubmitResult<Pod> {
        let mut state = self.record("create_pod");
        let name = pod.metadata.name.clone().unwrap_or_default();
        let (observed, events, keep_open) = self.pod_events(&name);
        if let Some(observed) = observed {
            let mut stored = pod.clone();
            stored.status = observed.status;
            state.pods.insert(name.clone(), stored);
        }
        if let Some(watcher) = state.watchers.get(&name) {
            for event in events {
                let _ = watcher.send(event);
            }
        }
        if !keep_open {
            state.watchers.remove(&name);
        }
        Ok(pod.clone())
    }

    async fn get_pod(&self, name: &str) -> SubmitResult<Pod> {
        let state = self.record("get_pod");
        state
            .pods
            .get(name)
            .cloned()
            .ok_or_else(|| not_found("pods", name))
    }

    async fn delete_pod(&self, name: &str) -> SubmitResult<()> {
        let mut state = self.record("delete_pod");
        if self.fail_deletes {
            return Err(api_error(500, "InternalError", "etcd unavailable".to_string()));
        }
        state
            .pods
            .remove(name)
            .map(|_| ())
            .ok_or_else(|| not_found("pods", name))
    }

    async fn watch_pod(&self, name: &str) -> SubmitResult<PodEventStream> {
        let mut state = self.record("watch_pod");
        let (tx, rx) = mpsc::unbounded_channel();
        state.watchers.insert(name.to_string(), tx);
        let events = UnboundedReceiverStream::new(rx);
        match self.watch_expiry {
            Some(expiry) => Ok(events
                .take_until(Box::pin(tokio::time::sleep(expiry)))
                .boxed()),
            None => Ok(events.boxed()),
        }
    }

    async fn list_nodes(&self) -> SubmitResult<Vec<Node>> {
        let _state = self.record("list_nodes");
        Ok(vec![Node {
            status: Some(NodeStatus {
                addresses: Some(vec![
                    NodeAddress {
                        type_: "InternalIP".to_string(),
                        address: "10.0.0.10".to_string(),
                    },
                    NodeAddress {
                        type_: "ExternalIP".to_string(),
                        address: Self::NODE_EXTERNAL_IP.to_string(),
                    },
                ]),
                ..Default::default()
            }),
            ..Default::default()
        }])
    }
}

#[derive(Default)]
struct LauncherRecord {
    pings: AtomicUsize,
    submissions: AtomicUsize,
    address: Mutex<Option<LauncherAddress>>,
    secret: Mutex<Option<String>>,
    request: Mutex<Option<CreateSubmissionRequest>>,
}

/// A driver launcher that fails a fixed number of pings before answering.
#[derive(Clone, Default)]
pub struct ScriptedLauncher {
    ping_failures: usize,
    reject_submission: bool,
    record: Arc<LauncherRecord>,
}

impl ScriptedLauncher {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_ping_failures(mut self, n: usize) -> Self {
        self.ping_failures = n;
        self
    }

    pub fn with_rejected_submission(mut self) -> Self {
        self.reject_submission = true;
        self
    }

    pub fn pings(&self) -> usize {
        self.record.pings.load(Ordering::SeqCst)
    }

    pub fn submissions(&self) -> usize {
        self.record.submissions.load(Ordering::SeqCst)
    }

    pub fn address(&self) -> Option<LauncherAddress> {
        lock(&self.record.address).clone()
    }

    pub fn secret(&self) -> Option<String> {
        lock(&self.record.secret).clone()
    }

    pub fn request(&self) -> Option<CreateSubmissionRequest> {
        lock(&self.record.request).clone()
    }
}

impl DriverLauncherConnector for ScriptedLauncher {
    fn connect(
        &self,
        address: &LauncherAddress,
        secret: &str,
    ) -> SubmitResult<Arc<dyn DriverLauncherClient>> {
        *lock(&self.record.address) = Some(address.clone());
        *lock(&self.record.secret) = Some(secret.to_string());
        Ok(Arc::new(self.clone()))
    }
}

#[async_trait::async_trait]
impl DriverLauncherClient for ScriptedLauncher {
    async fn ping(&self) -> SubmitResult<()> {
        let n = self.record.pings.fetch_add(1, Ordering::SeqCst) + 1;
        if n <= self.ping_failures {
            Err(SubmitError::handshake(format!("connection refused ({n})")))
        } else {
            Ok(())
        }
    }

    async fn create_submission(&self, request: &CreateSubmissionRequest) -> SubmitResult<()> {
        self.record.submissions.fetch_add(1, Ordering::SeqCst);
        *lock(&self.record.request) = Some(request.clone());
        if self.reject_submission {
            Err(SubmitError::handshake("driver launcher rejected the submission"))
        } else {
            Ok(())
        }
    }
}
