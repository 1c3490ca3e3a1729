use std::borrow::Cow;
use std::io::Write;
use std::time::Duration;

use fastrace::collector::{Config, Reporter, SpanRecord};
use fastrace_opentelemetry::OpenTelemetryReporter;
use log::{debug, warn, Level, Log};
use opentelemetry::InstrumentationScope;
use opentelemetry_appender_log::OpenTelemetryLogBridge;
use opentelemetry_otlp::{LogExporter, Protocol, SpanExporter, WithExportConfig};
use opentelemetry_sdk::logs::{BatchLogProcessor, SdkLoggerProvider};
use opentelemetry_sdk::Resource;
use sail_common::config::{OtlpProtocol, TelemetryConfig};

use crate::error::{TelemetryError, TelemetryResult};
use crate::loggers::composite::CompositeLogger;
use crate::loggers::span::SpanEventLogger;

pub struct ResourceOptions {
    pub kind: &'static str,
}

/// Flushes pending spans and log records when dropped.
///
/// A submission process is short-lived, so exported telemetry is only
/// guaranteed to leave the process once the guard goes away.
#[must_use = "telemetry is flushed when the guard is dropped"]
pub struct TelemetryGuard {
    logger_provider: Option<SdkLoggerProvider>,
}

impl TelemetryGuard {
    pub fn shutdown(self) {
        drop(self);
    }
}

impl Drop for TelemetryGuard {
    fn drop(&mut self) {
        debug!("flushing telemetry");
        fastrace::flush();
        if let Some(provider) = self.logger_provider.take() {
            if let Err(e) = provider.shutdown() {
                warn!("failed to flush exported logs: {e}");
            }
        }
    }
}

/// Installs the global logger and the fastrace reporter.
/// The logger can only be installed once per process, so a second call fails.
/// OTLP exporters are built on the Tokio runtime, so this must be called within a runtime context.
pub fn init_telemetry(
    config: &TelemetryConfig,
    resource: ResourceOptions,
) -> TelemetryResult<TelemetryGuard> {
    check_export_config(config)?;
    let logger_provider = init_logs(config, &resource)?;
    init_traces(config, &resource)?;
    debug!("telemetry initialized for sail-{}", resource.kind);
    Ok(TelemetryGuard { logger_provider })
}

fn check_export_config(config: &TelemetryConfig) -> TelemetryResult<()> {
    let exporting = config.export_traces || config.export_logs;
    if exporting && config.otlp_endpoint.trim().is_empty() {
        return Err(TelemetryError::invalid(
            "an OTLP endpoint is required to export telemetry",
        ));
    }
    Ok(())
}

fn init_traces(config: &TelemetryConfig, resource: &ResourceOptions) -> TelemetryResult<()> {
    if config.export_traces {
        let exporter = SpanExporter::builder()
            .with_tonic()
            .with_endpoint(config.otlp_endpoint.clone())
            .with_protocol(get_otlp_protocol(&config.otlp_protocol))
            .with_timeout(Duration::from_secs(config.otlp_timeout_secs))
            .build()?;
        let reporter = OpenTelemetryReporter::new(
            exporter,
            Cow::Owned(get_resource(resource)),
            get_instrumentation_scope(),
        );
        fastrace::set_reporter(reporter, Config::default());
    } else {
        fastrace::set_reporter(NoOpReporter, Config::default().report_interval(Duration::MAX));
    }
    Ok(())
}

/// Installs the console logger, mirrored to OTLP and span events when exporting.
/// Informational lines are meant for the person running the submission,
/// so the log target is only shown at debug level and below.
fn init_logs(
    config: &TelemetryConfig,
    resource: &ResourceOptions,
) -> TelemetryResult<Option<SdkLoggerProvider>> {
    let primary =
        env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info"))
            .format(move |buf, record| {
                let level = record.level();
                let style = buf.default_level_style(level);
                let timestamp = buf.timestamp();
                let args = record.args();
                if level <= Level::Info {
                    writeln!(buf, "[{timestamp} {style}{level}{style:#}] {args}")
                } else {
                    let target = record.target();
                    writeln!(buf, "[{timestamp} {style}{level}{style:#} {target}] {args}")
                }
            })
            .build();
    let max_level = primary.filter();

    let mut secondary: Vec<Box<dyn Log>> = vec![];
    let mut logger_provider = None;
    if config.export_logs {
        let exporter = LogExporter::builder()
            .with_tonic()
            .with_endpoint(config.otlp_endpoint.clone())
            .with_protocol(get_otlp_protocol(&config.otlp_protocol))
            .with_timeout(Duration::from_secs(config.otlp_timeout_secs))
            .build()?;
        let provider = SdkLoggerProvider::builder()
            .with_log_processor(BatchLogProcessor::builder(exporter).build())
            .with_resource(get_resource(resource))
            .build();
        secondary.push(Box::new(OpenTelemetryLogBridge::new(&provider)));
        logger_provider = Some(provider);
    }
    if config.export_traces {
        secondary.push(Box::new(SpanEventLogger));
    }

    log::set_boxed_logger(Box::new(CompositeLogger::new(Box::new(primary), secondary)))?;
    log::set_max_level(max_level);
    Ok(logger_provider)
}

/// A fastrace reporter that discards spans when trace export is disabled.
pub struct NoOpReporter;

impl Reporter for NoOpReporter {
    fn report(&mut self, _spans: Vec<SpanRecord>) {}
}

fn get_otlp_protocol(protocol: &OtlpProtocol) -> Protocol {
    match protocol {
        OtlpProtocol::Grpc => Protocol::Grpc,
        OtlpProtocol::HttpBinary => Protocol::HttpBinary,
        OtlpProtocol::HttpJson => Protocol::HttpJson,
    }
}

fn get_resource(resource: &ResourceOptions) -> Resource {
    Resource::builder()
        .with_service_name(format!("sail-{}", resource.kind))
        .build()
}

fn get_instrumentation_scope() -> InstrumentationScope {
    InstrumentationScope::builder("sail-k8s-submit")
        .with_version(env!("CARGO_PKG_VERSION"))
        .build()
}
