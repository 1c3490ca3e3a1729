use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use log::info;
use sail_common::config::AppConfig;
use sail_common::runtime::RuntimeManager;
use sail_kubernetes::cluster::KubeCluster;
use sail_kubernetes::conf::{parse_key_value, SparkConf};
use sail_kubernetes::error::SubmitResult;
use sail_kubernetes::launcher::{KubernetesSubmitClient, SubmissionSummary};
use sail_kubernetes::options::KubernetesSubmitOptions;
use sail_kubernetes::retry::RetryStrategy;
use sail_kubernetes::rpc::HttpDriverLauncherConnector;
use sail_telemetry::telemetry::{init_telemetry, ResourceOptions};

/// Launches a Spark driver on Kubernetes and submits the application to it.
#[derive(Parser, Debug)]
#[command(version, name = "sail-k8s-submit")]
struct Cli {
    /// The application jar, either a local path or a URI resolvable by the driver
    main_app_resource: String,
    /// The main class of the application
    main_class: String,
    /// Arguments passed to the main class
    #[arg(trailing_var_arg = true, allow_hyphen_values = true)]
    app_args: Vec<String>,
    /// An application property, which takes precedence over the properties file
    #[arg(long = "conf", value_name = "KEY=VALUE", value_parser = parse_key_value)]
    conf: Vec<(String, String)>,
    /// A file of application properties
    #[arg(long, value_name = "PATH")]
    properties_file: Option<PathBuf>,
}

pub fn main(args: Vec<String>) -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse_from(args);
    let config = AppConfig::load()?;
    let runtime = RuntimeManager::try_new(&config.runtime)?;

    let telemetry = runtime.block_on(async {
        let resource = ResourceOptions { kind: "submit" };
        init_telemetry(&config.telemetry, resource)
    })?;

    let result = runtime.block_on(submit(&config, cli));

    telemetry.shutdown();

    let summary = result?;
    info!(
        "application {} is running in driver pod {} in namespace {}, with UI service {}",
        summary.app_id, summary.pod_name, summary.namespace, summary.service_name
    );
    Ok(())
}

async fn submit(config: &AppConfig, cli: Cli) -> SubmitResult<SubmissionSummary> {
    let mut conf = match &cli.properties_file {
        Some(path) => SparkConf::load_properties_file(path)?,
        None => SparkConf::new(),
    };
    conf.extend(cli.conf);
    let options = KubernetesSubmitOptions::try_from(&conf)?;

    let submit_config = &config.kubernetes.submit;
    let cluster = KubeCluster::try_new(&options.client)?;
    let connector =
        HttpDriverLauncherConnector::new(Duration::from_secs(submit_config.request_timeout_secs));
    let client = KubernetesSubmitClient::new(
        Arc::new(cluster),
        Arc::new(connector),
        RetryStrategy::from(&submit_config.ping_retry),
    );
    client
        .run(
            &options,
            &conf,
            &cli.main_app_resource,
            &cli.main_class,
            cli.app_args,
        )
        .await
}

#[cfg(test)]
mod tests {
    use clap::error::ErrorKind;

    use super::*;

    fn parse(args: &[&str]) -> Result<Cli, clap::Error> {
        Cli::try_parse_from(std::iter::once("sail-k8s-submit").chain(args.iter().copied()))
    }

    #[test]
    fn test_two_positional_arguments() -> Result<(), clap::Error> {
        let cli = parse(&[
            "local:///opt/spark/examples/jars/spark-examples.jar",
            "org.apache.spark.examples.SparkPi",
        ])?;
        assert_eq!(cli.main_class, "org.apache.spark.examples.SparkPi");
        assert!(cli.app_args.is_empty());
        Ok(())
    }

    #[test]
    fn test_missing_positional_arguments() {
        for args in [&[][..], &["app.jar"][..]] {
            let Err(e) = parse(args) else {
                panic!("expected a usage error for {args:?}");
            };
            assert_eq!(e.kind(), ErrorKind::MissingRequiredArgument);
            assert_eq!(e.exit_code(), 2);
        }
    }

    #[test]
    fn test_application_arguments_and_properties() -> Result<(), clap::Error> {
        let cli = parse(&[
            "--conf",
            "spark.kubernetes.namespace=jobs",
            "--conf",
            "spark.app.name=pi",
            "--properties-file",
            "/etc/spark/spark-defaults.conf",
            "app.jar",
            "org.example.Main",
            "10",
            "--verbose",
        ])?;
        assert_eq!(
            cli.conf,
            vec![
                ("spark.kubernetes.namespace".to_string(), "jobs".to_string()),
                ("spark.app.name".to_string(), "pi".to_string()),
            ]
        );
        assert_eq!(
            cli.properties_file,
            Some(PathBuf::from("/etc/spark/spark-defaults.conf"))
        );
        assert_eq!(cli.app_args, vec!["10".to_string(), "--verbose".to_string()]);
        Ok(())
    }

    #[test]
    fn test_malformed_conf() {
        let result = parse(&["--conf", "spark.app.name", "app.jar", "org.example.Main"]);
        assert!(matches!(result, Err(ref e) if e.kind() == ErrorKind::ValueValidation));
    }
}
