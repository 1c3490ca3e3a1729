use std::future::Future;
use std::sync::Arc;

use futures::StreamExt;
use k8s_openapi::api::core::v1::Pod;
use log::{debug, info, warn};
use tokio::sync::watch;
use tokio::task::JoinHandle;

use crate::cluster::{PodEvent, PodEventStream};
use crate::constants::{DRIVER_CONTAINER_NAME, POD_PHASE_RUNNING};
use crate::gate::{CompletionGate, CompletionOutcome, FailureCause};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WatchState {
    Idle,
    Watching,
    ContainerReady,
    ExternalFailure,
    Closed,
}

/// Returns whether the pod is running and the driver container reports ready.
pub fn is_driver_ready(pod: &Pod) -> bool {
    let Some(status) = &pod.status else {
        return false;
    };
    status.phase.as_deref() == Some(POD_PHASE_RUNNING)
        && status
            .container_statuses
            .iter()
            .flatten()
            .any(|x| x.name == DRIVER_CONTAINER_NAME && x.ready)
}

/// Consumes the event stream of the driver pod and starts the handshake
/// on the first event that reports the driver as ready.
///
/// Events are processed sequentially on a dedicated task. The handshake runs on
/// its own task so that retry delays never hold up event delivery.
/// Only a stream error or an error event fails the gate. If the stream ends
/// before the driver is ready, the outcome is left to the submission deadline.
/// The watch is torn down when [`ReadinessWatch::close`] is called or the value is dropped.
/// Closing the watch does not cancel a handshake that is already running.
pub struct ReadinessWatch {
    state: Arc<watch::Sender<WatchState>>,
    task: JoinHandle<()>,
}

impl ReadinessWatch {
    pub fn start<F, Fut>(
        pod_name: impl Into<String>,
        events: PodEventStream,
        gate: Arc<CompletionGate>,
        on_ready: F,
    ) -> Self
    where
        F: FnOnce(Pod) -> Fut + Send + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let (state, _) = watch::channel(WatchState::Idle);
        let state = Arc::new(state);
        let task = tokio::spawn(watch_events(
            pod_name.into(),
            events,
            gate,
            Arc::clone(&state),
            on_ready,
        ));
        Self { state, task }
    }

    pub fn state(&self) -> WatchState {
        *self.state.borrow()
    }

    pub fn close(&mut self) {
        self.task.abort();
        self.state.send_replace(WatchState::Closed);
    }
}

impl Drop for ReadinessWatch {
    fn drop(&mut self) {
        self.close();
    }
}

/// Moves to the next state unless the watch is already closed.
fn transition(state: &watch::Sender<WatchState>, next: WatchState) {
    state.send_if_modified(|current| {
        if *current == WatchState::Closed || *current == next {
            false
        } else {
            *current = next;
            true
        }
    });
}

async fn watch_events<F, Fut>(
    pod_name: String,
    mut events: PodEventStream,
    gate: Arc<CompletionGate>,
    state: Arc<watch::Sender<WatchState>>,
    on_ready: F,
) where
    F: FnOnce(Pod) -> Fut + Send + 'static,
    Fut: Future<Output = ()> + Send + 'static,
{
    transition(&state, WatchState::Watching);
    let mut on_ready = Some(on_ready);
    while let Some(event) = events.next().await {
        let error = match event {
            Ok(PodEvent::Added(pod)) | Ok(PodEvent::Modified(pod)) => {
                if is_driver_ready(&pod) {
                    if let Some(on_ready) = on_ready.take() {
                        info!("driver pod {pod_name} is ready");
                        transition(&state, WatchState::ContainerReady);
                        tokio::spawn(on_ready(pod));
                    } else {
                        debug!("ignoring repeated readiness event for driver pod {pod_name}");
                    }
                }
                continue;
            }
            Ok(PodEvent::Deleted(_)) => {
                warn!("driver pod {pod_name} was deleted");
                continue;
            }
            Ok(PodEvent::Error(message)) => message,
            Err(e) => e.to_string(),
        };
        warn!("watch on driver pod {pod_name} failed: {error}");
        transition(&state, WatchState::ExternalFailure);
        gate.complete(CompletionOutcome::Failed(FailureCause::WatchClosed(
            format!("the watch on driver pod {pod_name} failed: {error}"),
        )));
        return;
    }
    if on_ready.is_some() {
        warn!("watch on driver pod {pod_name} ended before the driver became ready");
    } else {
        debug!("watch on driver pod {pod_name} ended");
    }
}
