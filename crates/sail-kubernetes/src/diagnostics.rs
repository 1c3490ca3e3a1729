use std::fmt::Write;

use k8s_openapi::api::core::v1::{ContainerState, Pod};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::Time;
use log::warn;

use crate::cluster::KubernetesCluster;
use crate::constants::DRIVER_CONTAINER_NAME;

/// Fetches the driver pod and describes its current status.
/// The fetch is best effort, so a failure is reported in the text instead of returned.
pub async fn driver_pod_report(cluster: &dyn KubernetesCluster, pod_name: &str) -> String {
    match cluster.get_pod(pod_name).await {
        Ok(pod) => render_pod_report(pod_name, &pod),
        Err(e) => {
            warn!("failed to fetch driver pod {pod_name} for diagnostics: {e}");
            format!(
                "The driver pod {pod_name} did not become ready before the deadline, \
                and its status could not be fetched: {e}"
            )
        }
    }
}

pub fn render_pod_report(pod_name: &str, pod: &Pod) -> String {
    let status = pod.status.clone().unwrap_or_default();
    let container = status
        .container_statuses
        .iter()
        .flatten()
        .find(|x| x.name == DRIVER_CONTAINER_NAME);
    let mut report = String::new();
    let _ = writeln!(report, "Driver pod {pod_name} status:");
    let _ = writeln!(
        report,
        "  phase: {}",
        status.phase.as_deref().unwrap_or("unknown")
    );
    let _ = writeln!(
        report,
        "  message: {}",
        status.message.as_deref().unwrap_or("none")
    );
    let state = container
        .and_then(|x| x.state.as_ref())
        .map(render_container_state)
        .unwrap_or_else(|| "Unknown".to_string());
    let _ = write!(report, "  container {DRIVER_CONTAINER_NAME}: {state}");
    report
}

fn render_container_state(state: &ContainerState) -> String {
    if let Some(running) = &state.running {
        format!("Running (started at {})", time(running.started_at.as_ref()))
    } else if let Some(waiting) = &state.waiting {
        format!(
            "Waiting (reason: {}, message: {})",
            waiting.reason.as_deref().unwrap_or("none"),
            waiting.message.as_deref().unwrap_or("none")
        )
    } else if let Some(terminated) = &state.terminated {
        format!(
            "Terminated (started at {}, finished at {}, reason: {}, exit code: {}, message: {})",
            time(terminated.started_at.as_ref()),
            time(terminated.finished_at.as_ref()),
            terminated.reason.as_deref().unwrap_or("none"),
            terminated.exit_code,
            terminated.message.as_deref().unwrap_or("none")
        )
    } else {
        "Unknown".to_string()
    }
}

fn time(value: Option<&Time>) -> String {
    value
        .map(|x| x.0.to_rfc3339())
        .unwrap_or_else(|| "unknown".to_string())
}
