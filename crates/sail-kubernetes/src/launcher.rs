use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use chrono::{DateTime, Utc};
use fastrace::Span;
use log::{error, info, warn};
use rand::RngCore;
use sail_telemetry::common::SpanAttribute;
use sail_telemetry::futures::{record_error, TracingFutureExt};
use tokio::time::Instant;

use crate::cluster::KubernetesCluster;
use crate::conf::SparkConf;
use crate::constants::{
    SERVICE_TYPE_NODE_PORT, SPARK_APP_ID_LABEL, SPARK_APP_NAME_LABEL, SPARK_DRIVER_LABEL,
    SUBMISSION_SECRET_BYTES, SUBMISSION_SECRET_KEY, SUBMISSION_SECRET_NAME_PREFIX,
    SUBMISSION_SERVER_PORT_NAME, UI_PORT_NAME,
};
use crate::diagnostics::driver_pod_report;
use crate::error::{SubmitError, SubmitResult};
use crate::gate::{CompletionGate, CompletionOutcome, FailureCause, GateTimeout};
use crate::handshake::DriverHandshake;
use crate::options::{KubernetesSubmitOptions, SparkConfKey};
use crate::pod::{service_host, DriverPodSpec};
use crate::provisioner::{ResourceProvisioner, SecretRef, ServicePortSpec, ServiceRef};
use crate::retry::RetryStrategy;
use crate::rpc::DriverLauncherConnector;
use crate::submission::SubmissionPayload;
use crate::watch::ReadinessWatch;

/// Lowercases the name and replaces every character outside `[a-z0-9-]` with `-`.
pub fn sanitize_name(name: &str) -> String {
    name.chars()
        .map(|c| {
            let c = c.to_ascii_lowercase();
            if c.is_ascii_lowercase() || c.is_ascii_digit() || c == '-' {
                c
            } else {
                '-'
            }
        })
        .collect()
}

fn generate_secret() -> String {
    let mut bytes = [0u8; SUBMISSION_SECRET_BYTES];
    rand::rng().fill_bytes(&mut bytes);
    STANDARD.encode(bytes)
}

/// The identity of one launch of the driver.
pub struct LaunchAttempt {
    pub app_id: String,
    pub app_name: String,
    pub launch_time: DateTime<Utc>,
    secret: String,
}

impl fmt::Debug for LaunchAttempt {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LaunchAttempt")
            .field("app_id", &self.app_id)
            .field("app_name", &self.app_name)
            .field("launch_time", &self.launch_time)
            .field("secret", &"<redacted>")
            .finish()
    }
}

impl LaunchAttempt {
    pub fn new(app_name: &str) -> Self {
        Self::with_launch_time(app_name, Utc::now())
    }

    pub fn with_launch_time(app_name: &str, launch_time: DateTime<Utc>) -> Self {
        let app_name = sanitize_name(app_name);
        let app_id = format!("{app_name}-{}", launch_time.timestamp_millis());
        Self {
            app_id,
            app_name,
            launch_time,
            secret: generate_secret(),
        }
    }

    pub fn secret(&self) -> &str {
        &self.secret
    }

    pub fn secret_name(&self) -> String {
        format!("{SUBMISSION_SECRET_NAME_PREFIX}-{}", self.app_id)
    }

    pub fn labels(&self) -> BTreeMap<String, String> {
        BTreeMap::from([
            (SPARK_APP_ID_LABEL.to_string(), self.app_id.clone()),
            (SPARK_APP_NAME_LABEL.to_string(), self.app_name.clone()),
            (SPARK_DRIVER_LABEL.to_string(), self.app_id.clone()),
        ])
    }

    pub fn selector(&self) -> BTreeMap<String, String> {
        BTreeMap::from([(SPARK_DRIVER_LABEL.to_string(), self.app_id.clone())])
    }
}

/// The resources left running after a successful launch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SubmissionSummary {
    pub app_id: String,
    pub namespace: String,
    pub pod_name: String,
    pub service_name: String,
}

/// Launches the driver pod and hands the application over to it.
///
/// The call returns once the driver has accepted the submission, or once every
/// resource created for the launch has been removed again.
/// The submission secret is always removed since it is only needed when the pod starts.
pub struct KubernetesSubmitClient {
    cluster: Arc<dyn KubernetesCluster>,
    connector: Arc<dyn DriverLauncherConnector>,
    ping_retry: RetryStrategy,
}

impl KubernetesSubmitClient {
    pub fn new(
        cluster: Arc<dyn KubernetesCluster>,
        connector: Arc<dyn DriverLauncherConnector>,
        ping_retry: RetryStrategy,
    ) -> Self {
        Self {
            cluster,
            connector,
            ping_retry,
        }
    }

    pub async fn run(
        &self,
        options: &KubernetesSubmitOptions,
        conf: &SparkConf,
        main_app_resource: &str,
        main_class: &str,
        app_args: Vec<String>,
    ) -> SubmitResult<SubmissionSummary> {
        let payload = SubmissionPayload::try_new(
            main_app_resource,
            main_class,
            app_args,
            &options.upload_jars,
            &options.upload_driver_extra_classpath,
        )?;
        let attempt = LaunchAttempt::new(&options.app_name);
        let span = Span::enter_with_local_parent("KubernetesSubmitClient::run")
            .with_properties(|| {
                [
                    (SpanAttribute::K8S_NAMESPACE_NAME, options.namespace().to_string()),
                    (SpanAttribute::SUBMIT_APP_ID, attempt.app_id.clone()),
                ]
            });
        self.launch(options, conf, payload, &attempt)
            .in_span_with_recorder(span, record_error)
            .await
    }

    async fn launch(
        &self,
        options: &KubernetesSubmitOptions,
        conf: &SparkConf,
        payload: SubmissionPayload,
        attempt: &LaunchAttempt,
    ) -> SubmitResult<SubmissionSummary> {
        info!(
            "launching driver {} in namespace {}",
            attempt.app_id,
            options.namespace()
        );
        let provisioner = ResourceProvisioner::new(Arc::clone(&self.cluster));
        let secret = provisioner
            .create_secret(
                &attempt.secret_name(),
                &attempt.labels(),
                BTreeMap::from([(
                    SUBMISSION_SECRET_KEY.to_string(),
                    attempt.secret().as_bytes().to_vec(),
                )]),
            )
            .await?;
        let result = self
            .launch_with_secret(&provisioner, options, conf, payload, attempt)
            .await;
        delete_secret(&provisioner, &secret).await;
        result
    }

    async fn launch_with_secret(
        &self,
        provisioner: &ResourceProvisioner,
        options: &KubernetesSubmitOptions,
        conf: &SparkConf,
        payload: SubmissionPayload,
        attempt: &LaunchAttempt,
    ) -> SubmitResult<SubmissionSummary> {
        let service = provisioner
            .create_service(
                &attempt.app_id,
                &attempt.labels(),
                &attempt.selector(),
                &[
                    ServicePortSpec::new(SUBMISSION_SERVER_PORT_NAME, options.ports.launcher),
                    ServicePortSpec::new(UI_PORT_NAME, options.ports.ui),
                ],
                SERVICE_TYPE_NODE_PORT,
            )
            .await?;
        let result = self
            .launch_driver(provisioner, options, conf, payload, attempt, &service)
            .await;
        if result.is_err() {
            if let Err(e) = provisioner.delete_service(&service).await {
                warn!("failed to delete driver service {}: {e}", service.name);
            } else {
                info!("deleted driver service {}", service.name);
            }
        }
        result
    }

    async fn launch_driver(
        &self,
        provisioner: &ResourceProvisioner,
        options: &KubernetesSubmitOptions,
        conf: &SparkConf,
        payload: SubmissionPayload,
        attempt: &LaunchAttempt,
        service: &ServiceRef,
    ) -> SubmitResult<SubmissionSummary> {
        let namespace = options.namespace();
        let pod_name = attempt.app_id.as_str();
        let spark_properties = conf
            .clone()
            .set(
                SparkConfKey::DRIVER_HOST,
                service_host(&service.name, namespace),
            )
            .to_map();
        let handshake = DriverHandshake {
            cluster: Arc::clone(&self.cluster),
            provisioner: provisioner.clone(),
            connector: Arc::clone(&self.connector),
            ping_retry: self.ping_retry.clone(),
            service: service.clone(),
            secret: attempt.secret().to_string(),
            request: payload.into_request(attempt.secret().to_string(), spark_properties),
            ui_port: options.ports.ui,
        };

        let gate = Arc::new(CompletionGate::new());
        let events = self.cluster.watch_pod(pod_name).await?;
        let handshake_gate = Arc::clone(&gate);
        let mut watch = ReadinessWatch::start(pod_name, events, Arc::clone(&gate), move |_| {
            handshake.run(handshake_gate)
        });

        let secret_name = attempt.secret_name();
        let pod = DriverPodSpec {
            app_id: &attempt.app_id,
            labels: &attempt.labels(),
            image: &options.driver_image,
            service_account_name: &options.service_account_name,
            secret_name: &secret_name,
            service_name: &service.name,
            namespace,
            ports: options.ports,
        }
        .build();
        self.cluster.create_pod(&pod).await?;
        info!("created driver pod {pod_name}");

        let deadline = Instant::now() + options.submit_timeout;
        let outcome = match gate.wait_until(deadline).await {
            Ok(outcome) => outcome,
            Err(GateTimeout) => {
                // A handshake may still resolve the gate between the timeout and this point.
                gate.complete(CompletionOutcome::Failed(FailureCause::DeadlineExceeded));
                gate.outcome()
                    .unwrap_or(CompletionOutcome::Failed(FailureCause::DeadlineExceeded))
            }
        };
        watch.close();

        let error = match outcome {
            CompletionOutcome::Submitted => {
                info!("driver {pod_name} accepted the application submission");
                return Ok(SubmissionSummary {
                    app_id: attempt.app_id.clone(),
                    namespace: namespace.to_string(),
                    pod_name: pod_name.to_string(),
                    service_name: service.name.clone(),
                });
            }
            CompletionOutcome::Failed(FailureCause::DeadlineExceeded) => {
                let report = driver_pod_report(self.cluster.as_ref(), pod_name).await;
                SubmitError::DeadlineExceeded {
                    timeout: options.submit_timeout,
                    report,
                }
            }
            CompletionOutcome::Failed(cause) => SubmitError::from(cause),
        };
        error!("failed to launch driver {pod_name}: {error}");
        if let Err(e) = self.cluster.delete_pod(pod_name).await {
            warn!("failed to delete driver pod {pod_name}: {e}");
        } else {
            info!("deleted driver pod {pod_name}");
        }
        Err(error)
    }
}

async fn delete_secret(provisioner: &ResourceProvisioner, secret: &SecretRef) {
    if let Err(e) = provisioner.delete_secret(secret).await {
        warn!("failed to delete submission secret {}: {e}", secret.name);
    } else {
        info!("deleted submission secret {}", secret.name);
    }
}
