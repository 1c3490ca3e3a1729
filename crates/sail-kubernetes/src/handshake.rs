use std::sync::Arc;

use fastrace::Span;
use k8s_openapi::api::core::v1::{Node, NodeAddress};
use log::{debug, info, warn};
use sail_telemetry::common::SpanAttribute;
use sail_telemetry::futures::{record_error, TracingFutureExt};

use crate::cluster::KubernetesCluster;
use crate::constants::{SERVICE_TYPE_CLUSTER_IP, SUBMISSION_SERVER_PORT_NAME, UI_PORT_NAME};
use crate::gate::{CompletionGate, CompletionOutcome, FailureCause};
use crate::provisioner::{ResourceProvisioner, ServicePortSpec, ServiceRef};
use crate::retry::RetryStrategy;
use crate::rpc::{DriverLauncherConnector, LauncherAddress};
use crate::submission::CreateSubmissionRequest;

const NODE_ADDRESS_TYPE_EXTERNAL_IP: &str = "ExternalIP";

/// Picks the node address used to reach node ports.
/// This is the first external IP of any node, or else the first address of the first node.
/// Only one address is ever tried.
pub fn resolve_node_address(nodes: &[Node]) -> Option<String> {
    fn addresses(node: &Node) -> impl Iterator<Item = &NodeAddress> {
        node.status
            .iter()
            .flat_map(|x| x.addresses.iter().flatten())
    }

    nodes
        .iter()
        .find_map(|node| addresses(node).find(|x| x.type_ == NODE_ADDRESS_TYPE_EXTERNAL_IP))
        .or_else(|| nodes.first().and_then(|node| addresses(node).next()))
        .map(|x| x.address.clone())
}

/// The ping-then-submit exchange with the driver launcher,
/// followed by closing the submission port on the driver service.
pub struct DriverHandshake {
    pub cluster: Arc<dyn KubernetesCluster>,
    pub provisioner: ResourceProvisioner,
    pub connector: Arc<dyn DriverLauncherConnector>,
    pub ping_retry: RetryStrategy,
    pub service: ServiceRef,
    pub secret: String,
    pub request: CreateSubmissionRequest,
    pub ui_port: u16,
}

impl DriverHandshake {
    /// Runs the handshake and reports the outcome to the gate.
    /// The outcome is discarded if the gate has already been resolved.
    pub async fn run(self, gate: Arc<CompletionGate>) {
        let span = Span::enter_with_local_parent("DriverHandshake::run")
            .with_property(|| (SpanAttribute::SUBMIT_APP_ID, self.service.name.clone()));
        let outcome = match self.submit().in_span_with_recorder(span, record_error).await {
            Ok(()) => CompletionOutcome::Submitted,
            Err(cause) => {
                warn!("handshake with the driver failed: {cause}");
                CompletionOutcome::Failed(cause)
            }
        };
        if !gate.complete(outcome) {
            debug!("discarding handshake outcome since the launch attempt is already resolved");
        }
    }

    async fn submit(&self) -> Result<(), FailureCause> {
        let address = self.resolve_address().await?;
        info!("connecting to the driver launcher at {address}");
        let client = self
            .connector
            .connect(&address, &self.secret)
            .map_err(|e| FailureCause::SubmissionFailed(e.to_string()))?;
        self.ping_retry
            .run(|| client.ping())
            .await
            .map_err(|e| FailureCause::PingExhausted {
                attempts: self.ping_retry.max_attempts(),
                message: e.to_string(),
            })?;
        client
            .create_submission(&self.request)
            .await
            .map_err(|e| FailureCause::SubmissionFailed(e.to_string()))?;
        info!("the driver launcher at {address} accepted the submission");
        self.provisioner
            .reconfigure_service(
                &self.service,
                &[ServicePortSpec::new(UI_PORT_NAME, self.ui_port)],
                SERVICE_TYPE_CLUSTER_IP,
            )
            .await
            .map_err(|e| FailureCause::ClusterCommunication(e.to_string()))?;
        Ok(())
    }

    async fn resolve_address(&self) -> Result<LauncherAddress, FailureCause> {
        let nodes = self
            .cluster
            .list_nodes()
            .await
            .map_err(|e| FailureCause::ClusterCommunication(e.to_string()))?;
        let host = resolve_node_address(&nodes).ok_or_else(|| {
            FailureCause::SubmissionFailed("no node address is available".to_string())
        })?;
        let port = self
            .service
            .node_port(SUBMISSION_SERVER_PORT_NAME)
            .ok_or_else(|| {
                FailureCause::SubmissionFailed(format!(
                    "service {} has no node port for {SUBMISSION_SERVER_PORT_NAME}",
                    self.service.name
                ))
            })?;
        Ok(LauncherAddress { host, port })
    }
}
