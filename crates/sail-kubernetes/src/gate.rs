use thiserror::Error;
use tokio::sync::watch;
use tokio::time::Instant;

use crate::error::SubmitError;

/// Why a launch attempt failed before the driver accepted the submission.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum FailureCause {
    #[error("{0}")]
    WatchClosed(String),
    #[error("the driver launcher was unreachable after {attempts} attempts: {message}")]
    PingExhausted { attempts: usize, message: String },
    #[error("the submission request failed: {0}")]
    SubmissionFailed(String),
    #[error("cluster communication failed during the handshake: {0}")]
    ClusterCommunication(String),
    #[error("the driver was not submitted before the deadline")]
    DeadlineExceeded,
}

impl From<FailureCause> for SubmitError {
    fn from(cause: FailureCause) -> Self {
        match cause {
            FailureCause::WatchClosed(x) => SubmitError::WatchClosed(x),
            x => SubmitError::HandshakeError(x.to_string()),
        }
    }
}

/// The single outcome of a launch attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CompletionOutcome {
    Submitted,
    Failed(FailureCause),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("the completion gate was not resolved before the deadline")]
pub struct GateTimeout;

/// A single-assignment cell joining the watch-driven handshake and the orchestrator.
///
/// The first call to [`CompletionGate::complete`] wins and every later call is discarded.
/// Readers wait for the outcome with a deadline.
#[derive(Debug)]
pub struct CompletionGate {
    outcome: watch::Sender<Option<CompletionOutcome>>,
}

impl Default for CompletionGate {
    fn default() -> Self {
        Self::new()
    }
}

impl CompletionGate {
    pub fn new() -> Self {
        let (outcome, _) = watch::channel(None);
        Self { outcome }
    }

    /// Resolves the gate if it is unresolved.
    /// Returns whether this call assigned the outcome.
    pub fn complete(&self, outcome: CompletionOutcome) -> bool {
        let mut outcome = Some(outcome);
        self.outcome.send_if_modified(|current| {
            if current.is_some() {
                false
            } else {
                *current = outcome.take();
                true
            }
        })
    }

    pub fn outcome(&self) -> Option<CompletionOutcome> {
        self.outcome.borrow().clone()
    }

    pub fn is_resolved(&self) -> bool {
        self.outcome.borrow().is_some()
    }

    /// Waits for the outcome until the deadline.
    pub async fn wait_until(&self, deadline: Instant) -> Result<CompletionOutcome, GateTimeout> {
        let mut receiver = self.outcome.subscribe();
        let outcome = tokio::time::timeout_at(deadline, async {
            // The sender lives as long as `self`, so the receiver never observes a closed channel.
            receiver
                .wait_for(|x| x.is_some())
                .await
                .ok()
                .and_then(|x| x.clone())
        })
        .await;
        match outcome {
            Ok(Some(outcome)) => Ok(outcome),
            Ok(None) | Err(_) => Err(GateTimeout),
        }
    }
}
