use std::path::PathBuf;
use std::time::Duration;

use crate::conf::SparkConf;
use crate::error::{SubmitError, SubmitResult};

/// Property keys interpreted by the submission client.
pub struct SparkConfKey;

impl SparkConfKey {
    pub const MASTER: &'static str = "spark.master";
    pub const APP_NAME: &'static str = "spark.app.name";
    pub const DRIVER_HOST: &'static str = "spark.driver.host";
    pub const DRIVER_PORT: &'static str = "spark.driver.port";
    pub const BLOCK_MANAGER_PORT: &'static str = "spark.blockManager.port";
    pub const UI_PORT: &'static str = "spark.ui.port";
    pub const NAMESPACE: &'static str = "spark.kubernetes.namespace";
    pub const CA_CERT_FILE: &'static str = "spark.kubernetes.submit.caCertFile";
    pub const CLIENT_KEY_FILE: &'static str = "spark.kubernetes.submit.clientKeyFile";
    pub const CLIENT_CERT_FILE: &'static str = "spark.kubernetes.submit.clientCertFile";
    pub const SERVICE_ACCOUNT_NAME: &'static str = "spark.kubernetes.submit.serviceAccountName";
    pub const DRIVER_DOCKER_IMAGE: &'static str = "spark.kubernetes.driver.docker.image";
    pub const DRIVER_SUBMIT_TIMEOUT: &'static str = "spark.kubernetes.driver.submit.timeout";
    pub const DRIVER_LAUNCHER_PORT: &'static str = "spark.kubernetes.driver.launcher.port";
    pub const DRIVER_UPLOAD_JARS: &'static str = "spark.kubernetes.driver.uploads.jars";
    pub const DRIVER_UPLOAD_EXTRA_CLASSPATH: &'static str =
        "spark.kubernetes.driver.uploads.driverExtraClasspath";
}

pub const MASTER_URL_PREFIX: &str = "k8s://";

const DEFAULT_APP_NAME: &str = "spark";
const DEFAULT_SERVICE_ACCOUNT_NAME: &str = "default";
const DEFAULT_DRIVER_DOCKER_IMAGE: &str = "spark-driver:2.2.0";
const DEFAULT_DRIVER_SUBMIT_TIMEOUT: Duration = Duration::from_secs(60);
const DEFAULT_DRIVER_LAUNCHER_PORT: u16 = 7077;
const DEFAULT_DRIVER_PORT: u16 = 7078;
const DEFAULT_BLOCK_MANAGER_PORT: u16 = 7079;
const DEFAULT_UI_PORT: u16 = 4040;

/// Connection settings for the Kubernetes API server.
#[derive(Debug, Clone)]
pub struct KubernetesClientOptions {
    pub master_url: String,
    pub namespace: String,
    pub ca_cert_file: Option<PathBuf>,
    pub client_key_file: Option<PathBuf>,
    pub client_cert_file: Option<PathBuf>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DriverPorts {
    pub launcher: u16,
    pub driver: u16,
    pub block_manager: u16,
    pub ui: u16,
}

/// The validated settings for one submission.
#[derive(Debug, Clone)]
pub struct KubernetesSubmitOptions {
    pub client: KubernetesClientOptions,
    pub app_name: String,
    pub service_account_name: String,
    pub driver_image: String,
    pub submit_timeout: Duration,
    pub ports: DriverPorts,
    pub upload_jars: Vec<PathBuf>,
    pub upload_driver_extra_classpath: Vec<PathBuf>,
}

impl KubernetesSubmitOptions {
    pub fn namespace(&self) -> &str {
        &self.client.namespace
    }
}

impl TryFrom<&SparkConf> for KubernetesSubmitOptions {
    type Error = SubmitError;

    fn try_from(conf: &SparkConf) -> SubmitResult<Self> {
        let master = conf
            .get(SparkConfKey::MASTER)
            .ok_or_else(|| SubmitError::config(format!("{} must be set", SparkConfKey::MASTER)))?;
        let master_url = master
            .strip_prefix(MASTER_URL_PREFIX)
            .filter(|x| !x.is_empty())
            .ok_or_else(|| {
                SubmitError::config(format!(
                    "master URL must start with {MASTER_URL_PREFIX}: {master}"
                ))
            })?
            .to_string();
        let namespace = conf
            .get(SparkConfKey::NAMESPACE)
            .map(|x| x.trim())
            .filter(|x| !x.is_empty())
            .ok_or_else(|| {
                SubmitError::config(format!("{} must be set", SparkConfKey::NAMESPACE))
            })?
            .to_string();
        let path = |key: &str| conf.get(key).map(PathBuf::from);
        let client_key_file = path(SparkConfKey::CLIENT_KEY_FILE);
        let client_cert_file = path(SparkConfKey::CLIENT_CERT_FILE);
        if client_key_file.is_some() != client_cert_file.is_some() {
            return Err(SubmitError::config(format!(
                "{} and {} must be set together",
                SparkConfKey::CLIENT_KEY_FILE,
                SparkConfKey::CLIENT_CERT_FILE
            )));
        }
        let client = KubernetesClientOptions {
            master_url,
            namespace,
            ca_cert_file: path(SparkConfKey::CA_CERT_FILE),
            client_key_file,
            client_cert_file,
        };
        let ports = DriverPorts {
            launcher: conf.get_port(
                SparkConfKey::DRIVER_LAUNCHER_PORT,
                DEFAULT_DRIVER_LAUNCHER_PORT,
            )?,
            driver: conf.get_port(SparkConfKey::DRIVER_PORT, DEFAULT_DRIVER_PORT)?,
            block_manager: conf.get_port(
                SparkConfKey::BLOCK_MANAGER_PORT,
                DEFAULT_BLOCK_MANAGER_PORT,
            )?,
            ui: conf.get_port(SparkConfKey::UI_PORT, DEFAULT_UI_PORT)?,
        };
        let submit_timeout = conf.get_duration(
            SparkConfKey::DRIVER_SUBMIT_TIMEOUT,
            DEFAULT_DRIVER_SUBMIT_TIMEOUT,
        )?;
        if submit_timeout.is_zero() {
            return Err(SubmitError::config(format!(
                "{} must be positive",
                SparkConfKey::DRIVER_SUBMIT_TIMEOUT
            )));
        }
        let paths = |key: &str| {
            conf.get_list(key)
                .into_iter()
                .map(PathBuf::from)
                .collect::<Vec<_>>()
        };
        Ok(Self {
            client,
            app_name: conf
                .get(SparkConfKey::APP_NAME)
                .unwrap_or(DEFAULT_APP_NAME)
                .to_string(),
            service_account_name: conf
                .get(SparkConfKey::SERVICE_ACCOUNT_NAME)
                .unwrap_or(DEFAULT_SERVICE_ACCOUNT_NAME)
                .to_string(),
            driver_image: conf
                .get(SparkConfKey::DRIVER_DOCKER_IMAGE)
                .unwrap_or(DEFAULT_DRIVER_DOCKER_IMAGE)
                .to_string(),
            submit_timeout,
            ports,
            upload_jars: paths(SparkConfKey::DRIVER_UPLOAD_JARS),
            upload_driver_extra_classpath: paths(SparkConfKey::DRIVER_UPLOAD_EXTRA_CLASSPATH),
        })
    }
}
