//! Names shared by the submission client and the driver launcher running in the driver image.

pub const SPARK_APP_ID_LABEL: &str = "spark-app-id";
pub const SPARK_APP_NAME_LABEL: &str = "spark-app-name";
pub const SPARK_DRIVER_LABEL: &str = "spark-driver";

pub const DRIVER_CONTAINER_NAME: &str = "spark-kubernetes-driver";

pub const SUBMISSION_SECRET_NAME_PREFIX: &str = "spark-submission-server-secret";
pub const SUBMISSION_SECRET_KEY: &str = "spark-submission-server-secret";
pub const SUBMISSION_SECRET_VOLUME_NAME: &str = "spark-submission-secret-volume";
pub const SUBMISSION_SECRET_BASE_DIR: &str = "/var/run/secrets/spark-submission";
/// The number of random bytes in the submission secret before encoding.
pub const SUBMISSION_SECRET_BYTES: usize = 128;

pub const ENV_SUBMISSION_SECRET_LOCATION: &str = "SPARK_SUBMISSION_SECRET_LOCATION";
pub const ENV_DRIVER_LAUNCHER_SERVER_PORT: &str = "SPARK_DRIVER_LAUNCHER_SERVER_PORT";
pub const ENV_DRIVER_HOST: &str = "SPARK_DRIVER_HOST";

pub const SUBMISSION_SERVER_PORT_NAME: &str = "submit-server";
pub const DRIVER_PORT_NAME: &str = "driver-port";
pub const BLOCK_MANAGER_PORT_NAME: &str = "block-manager";
pub const UI_PORT_NAME: &str = "spark-ui-port";

pub const SERVICE_TYPE_NODE_PORT: &str = "NodePort";
pub const SERVICE_TYPE_CLUSTER_IP: &str = "ClusterIP";

pub const POD_PHASE_RUNNING: &str = "Running";

pub const SUBMISSION_API_PATH: &str = "/v1/submissions";
/// The header carrying the submission secret on every request to the driver launcher.
pub const SUBMISSION_SECRET_HEADER: &str = "x-spark-submission-secret";
pub const CLIENT_SPARK_VERSION: &str = "2.2.0";
