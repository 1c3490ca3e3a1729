use std::time::Duration;

use thiserror::Error;

pub type SubmitResult<T> = Result<T, SubmitError>;

#[derive(Debug, Error)]
pub enum SubmitError {
    #[error("configuration error: {0}")]
    ConfigurationError(String),
    #[error("cluster communication error: {0}")]
    ClusterCommunicationError(#[from] kube::Error),
    #[error("handshake error: {0}")]
    HandshakeError(String),
    #[error("driver pod watch closed: {0}")]
    WatchClosed(String),
    #[error("the driver was not submitted within {timeout:?}\n{report}")]
    DeadlineExceeded { timeout: Duration, report: String },
    #[error("error in HTTP request: {0}")]
    HttpError(#[from] reqwest::Error),
    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),
    #[error("error in JSON serialization: {0}")]
    JsonError(#[from] serde_json::Error),
    #[error("internal error: {0}")]
    InternalError(String),
}

impl SubmitError {
    pub fn config(message: impl Into<String>) -> Self {
        SubmitError::ConfigurationError(message.into())
    }

    pub fn handshake(message: impl Into<String>) -> Self {
        SubmitError::HandshakeError(message.into())
    }

    pub fn internal(message: impl Into<String>) -> Self {
        SubmitError::InternalError(message.into())
    }
}
