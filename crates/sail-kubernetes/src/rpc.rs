use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use log::debug;

use crate::constants::{SUBMISSION_API_PATH, SUBMISSION_SECRET_HEADER};
use crate::error::{SubmitError, SubmitResult};
use crate::submission::{CreateSubmissionRequest, CreateSubmissionResponse};

/// The externally reachable address of the driver launcher.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LauncherAddress {
    pub host: String,
    pub port: u16,
}

impl fmt::Display for LauncherAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.host, self.port)
    }
}

/// A client for the driver launcher running inside the driver pod.
#[async_trait::async_trait]
pub trait DriverLauncherClient: Send + Sync {
    /// Checks that the driver launcher is reachable.
    async fn ping(&self) -> SubmitResult<()>;

    /// Asks the driver launcher to start the application.
    /// The caller must not repeat this call on failure.
    async fn create_submission(&self, request: &CreateSubmissionRequest) -> SubmitResult<()>;
}

/// Creates driver launcher clients once the launcher address is known.
pub trait DriverLauncherConnector: Send + Sync + 'static {
    fn connect(
        &self,
        address: &LauncherAddress,
        secret: &str,
    ) -> SubmitResult<Arc<dyn DriverLauncherClient>>;
}

pub struct HttpDriverLauncherConnector {
    request_timeout: Duration,
}

impl HttpDriverLauncherConnector {
    pub fn new(request_timeout: Duration) -> Self {
        Self { request_timeout }
    }
}

impl DriverLauncherConnector for HttpDriverLauncherConnector {
    fn connect(
        &self,
        address: &LauncherAddress,
        secret: &str,
    ) -> SubmitResult<Arc<dyn DriverLauncherClient>> {
        let client = HttpDriverLauncherClient::try_new(
            format!("http://{address}{SUBMISSION_API_PATH}"),
            secret,
            self.request_timeout,
        )?;
        Ok(Arc::new(client))
    }
}

/// A driver launcher client that speaks JSON over HTTP.
pub struct HttpDriverLauncherClient {
    base_url: String,
    client: reqwest::Client,
}

impl HttpDriverLauncherClient {
    pub fn try_new(
        base_url: impl Into<String>,
        secret: &str,
        timeout: Duration,
    ) -> SubmitResult<Self> {
        let mut headers = reqwest::header::HeaderMap::new();
        let mut value = reqwest::header::HeaderValue::from_str(secret)
            .map_err(|e| SubmitError::internal(format!("invalid submission secret: {e}")))?;
        value.set_sensitive(true);
        headers.insert(SUBMISSION_SECRET_HEADER, value);
        let client = reqwest::Client::builder()
            .default_headers(headers)
            .timeout(timeout)
            .build()?;
        Ok(Self {
            base_url: base_url.into(),
            client,
        })
    }
}

#[async_trait::async_trait]
impl DriverLauncherClient for HttpDriverLauncherClient {
    async fn ping(&self) -> SubmitResult<()> {
        let url = format!("{}/ping", self.base_url);
        debug!("pinging driver launcher at {url}");
        self.client.get(&url).send().await?.error_for_status()?;
        Ok(())
    }

    async fn create_submission(&self, request: &CreateSubmissionRequest) -> SubmitResult<()> {
        let url = format!("{}/create", self.base_url);
        debug!("sending submission request to {url}");
        let response = self.client.post(&url).json(request).send().await?;
        let status = response.status();
        let body = response.text().await?;
        if !status.is_success() {
            return Err(SubmitError::handshake(format!(
                "driver launcher rejected the submission with status {status}: {body}"
            )));
        }
        let response: CreateSubmissionResponse = serde_json::from_str(&body)?;
        if response.success {
            Ok(())
        } else {
            Err(SubmitError::handshake(format!(
                "driver launcher rejected the submission: {}",
                response.message.as_deref().unwrap_or("no message")
            )))
        }
    }
}
