use figment::providers::{Env, Format, Toml};
use figment::Figment;
use serde::{Deserialize, Serialize};

use crate::error::CommonResult;

const DEFAULT_CONFIG: &str = include_str!("default.toml");

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    pub runtime: RuntimeConfig,
    pub telemetry: TelemetryConfig,
    pub kubernetes: KubernetesConfig,
}

impl AppConfig {
    pub fn load() -> CommonResult<Self> {
        Ok(Self::figment().extract()?)
    }

    fn figment() -> Figment {
        Figment::from(Toml::string(DEFAULT_CONFIG))
            .admerge(Env::prefixed("SAIL__").map(|p| p.as_str().replace("__", ".").into()))
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RuntimeConfig {
    pub stack_size: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TelemetryConfig {
    pub export_traces: bool,
    pub export_logs: bool,
    pub otlp_endpoint: String,
    pub otlp_protocol: OtlpProtocol,
    pub otlp_timeout_secs: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum OtlpProtocol {
    Grpc,
    HttpBinary,
    HttpJson,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct KubernetesConfig {
    pub submit: KubernetesSubmitConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct KubernetesSubmitConfig {
    /// The retry strategy for pinging the driver launcher once the driver container is ready.
    pub ping_retry: RetryStrategy,
    /// The timeout for each HTTP request sent to the driver launcher.
    pub request_timeout_secs: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RetryStrategy {
    Fixed(FixedRetryStrategy),
    ExponentialBackoff(ExponentialBackoffRetryStrategy),
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FixedRetryStrategy {
    /// The number of retries after the first attempt.
    pub max_count: usize,
    pub delay_secs: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExponentialBackoffRetryStrategy {
    pub max_count: usize,
    pub initial_delay_secs: u64,
    pub max_delay_secs: u64,
    pub factor: u32,
}
