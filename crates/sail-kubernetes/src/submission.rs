use std::collections::{BTreeMap, BTreeSet};
use std::path::{Path, PathBuf};

use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use flate2::write::GzEncoder;
use flate2::Compression;
use serde::{Deserialize, Serialize};
use url::Url;

use crate::constants::CLIENT_SPARK_VERSION;
use crate::error::{SubmitError, SubmitResult};

/// The main application resource sent to the driver launcher.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum AppResource {
    /// A local file whose contents are sent inline.
    #[serde(rename_all = "camelCase")]
    UploadedAppResource {
        resource_base64_contents: String,
        name: String,
    },
    /// A URI the driver resolves on its own.
    RemoteAppResource { resource: String },
}

impl AppResource {
    /// Resolves the resource given on the command line.
    /// A path without a scheme, or a `file` URI, is read and uploaded;
    /// any other URI is passed through unchanged.
    pub fn resolve(resource: &str) -> SubmitResult<Self> {
        let path = match Url::parse(resource) {
            Ok(url) if url.scheme() == "file" => url.to_file_path().map_err(|()| {
                SubmitError::config(format!("invalid file URI for app resource: {resource}"))
            })?,
            // A single-letter scheme is a Windows drive letter.
            Ok(url) if url.scheme().len() > 1 => {
                return Ok(Self::RemoteAppResource {
                    resource: resource.to_string(),
                })
            }
            Ok(_) | Err(url::ParseError::RelativeUrlWithoutBase) => PathBuf::from(resource),
            Err(e) => {
                return Err(SubmitError::config(format!(
                    "invalid app resource {resource}: {e}"
                )))
            }
        };
        let contents = std::fs::read(&path).map_err(|e| {
            SubmitError::config(format!(
                "failed to read app resource {}: {e}",
                path.display()
            ))
        })?;
        Ok(Self::UploadedAppResource {
            resource_base64_contents: STANDARD.encode(contents),
            name: file_name(&path)?,
        })
    }
}

/// The request that asks the driver launcher to start the application.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateSubmissionRequest {
    pub action: String,
    pub client_spark_version: String,
    pub app_resource: AppResource,
    pub main_class: String,
    pub app_args: Vec<String>,
    pub secret: String,
    pub spark_properties: BTreeMap<String, String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub uploaded_driver_extra_classpath_base64_contents: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub uploaded_jars_base64_contents: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateSubmissionResponse {
    #[serde(default)]
    pub action: Option<String>,
    pub success: bool,
    #[serde(default)]
    pub message: Option<String>,
}

/// The parts of a submission request that are read from the local filesystem.
/// They are prepared before any cluster resource is created,
/// so that unreadable files fail the submission up front.
#[derive(Debug, Clone)]
pub struct SubmissionPayload {
    pub app_resource: AppResource,
    pub main_class: String,
    pub app_args: Vec<String>,
    pub uploaded_driver_extra_classpath: Option<String>,
    pub uploaded_jars: Option<String>,
}

impl SubmissionPayload {
    pub fn try_new(
        main_app_resource: &str,
        main_class: impl Into<String>,
        app_args: Vec<String>,
        upload_jars: &[PathBuf],
        upload_driver_extra_classpath: &[PathBuf],
    ) -> SubmitResult<Self> {
        Ok(Self {
            app_resource: AppResource::resolve(main_app_resource)?,
            main_class: main_class.into(),
            app_args,
            uploaded_driver_extra_classpath: compress_files(upload_driver_extra_classpath)?,
            uploaded_jars: compress_files(upload_jars)?,
        })
    }

    pub fn into_request(
        self,
        secret: String,
        spark_properties: BTreeMap<String, String>,
    ) -> CreateSubmissionRequest {
        CreateSubmissionRequest {
            action: "KubernetesCreateSubmissionRequest".to_string(),
            client_spark_version: CLIENT_SPARK_VERSION.to_string(),
            app_resource: self.app_resource,
            main_class: self.main_class,
            app_args: self.app_args,
            secret,
            spark_properties,
            uploaded_driver_extra_classpath_base64_contents: self.uploaded_driver_extra_classpath,
            uploaded_jars_base64_contents: self.uploaded_jars,
        }
    }
}

/// Bundles the files into a gzip-compressed tar archive encoded as base64.
/// The archive is flat, so file names must be unique.
pub fn compress_files(paths: &[PathBuf]) -> SubmitResult<Option<String>> {
    if paths.is_empty() {
        return Ok(None);
    }
    let mut names = BTreeSet::new();
    let mut builder = tar::Builder::new(GzEncoder::new(Vec::new(), Compression::default()));
    for path in paths {
        let name = file_name(path)?;
        if !names.insert(name.clone()) {
            return Err(SubmitError::config(format!(
                "duplicate file name in uploads: {name}"
            )));
        }
        let mut file = std::fs::File::open(path).map_err(|e| {
            SubmitError::config(format!("failed to read upload {}: {e}", path.display()))
        })?;
        builder.append_file(&name, &mut file)?;
    }
    let bytes = builder.into_inner()?.finish()?;
    Ok(Some(STANDARD.encode(bytes)))
}

fn file_name(path: &Path) -> SubmitResult<String> {
    path.file_name()
        .and_then(|x| x.to_str())
        .map(|x| x.to_string())
        .ok_or_else(|| SubmitError::config(format!("invalid file path: {}", path.display())))
}

#[cfg(test)]
mod tests {
    use std::io::{Read, Write};

    use flate2::read::GzDecoder;

    use super::*;

    #[test]
    fn test_local_app_resource_is_uploaded() -> SubmitResult<()> {
        let dir = tempfile::tempdir()?;
        let path = dir.path().join("spark-examples.jar");
        let contents = (0..=255u8).cycle().take(4096).collect::<Vec<_>>();
        std::fs::write(&path, &contents)?;

        for resource in [
            path.display().to_string(),
            format!("file://{}", path.display()),
        ] {
            let AppResource::UploadedAppResource {
                resource_base64_contents,
                name,
            } = AppResource::resolve(&resource)?
            else {
                return Err(SubmitError::internal("expected an uploaded resource"));
            };
            assert_eq!(name, "spark-examples.jar");
            let decoded = STANDARD
                .decode(resource_base64_contents)
                .map_err(|e| SubmitError::internal(e.to_string()))?;
            assert_eq!(decoded, contents);
        }
        Ok(())
    }

    #[test]
    fn test_remote_app_resource_is_unchanged() -> SubmitResult<()> {
        for resource in [
            "local:///opt/spark/examples/jars/spark-examples.jar",
            "hdfs://namenode:8020/jars/app.jar",
            "https://repo.example.com/app.jar",
        ] {
            assert_eq!(
                AppResource::resolve(resource)?,
                AppResource::RemoteAppResource {
                    resource: resource.to_string()
                }
            );
        }
        Ok(())
    }

    #[test]
    fn test_missing_local_app_resource() {
        assert!(matches!(
            AppResource::resolve("/nonexistent/app.jar"),
            Err(SubmitError::ConfigurationError(_))
        ));
    }

    #[test]
    fn test_compress_files() -> SubmitResult<()> {
        assert_eq!(compress_files(&[])?, None);

        let dir = tempfile::tempdir()?;
        let a = dir.path().join("a.jar");
        let b = dir.path().join("nested").join("b.jar");
        std::fs::create_dir_all(dir.path().join("nested"))?;
        std::fs::File::create(&a)?.write_all(b"first")?;
        std::fs::File::create(&b)?.write_all(b"second")?;

        let encoded = compress_files(&[a.clone(), b])?
            .ok_or_else(|| SubmitError::internal("expected a bundle"))?;
        let bytes = STANDARD
            .decode(encoded)
            .map_err(|e| SubmitError::internal(e.to_string()))?;
        let mut archive = tar::Archive::new(GzDecoder::new(bytes.as_slice()));
        let mut entries = BTreeMap::new();
        for entry in archive.entries()? {
            let mut entry = entry?;
            let name = entry.path()?.display().to_string();
            let mut content = String::new();
            entry.read_to_string(&mut content)?;
            entries.insert(name, content);
        }
        assert_eq!(
            entries,
            BTreeMap::from([
                ("a.jar".to_string(), "first".to_string()),
                ("b.jar".to_string(), "second".to_string()),
            ])
        );

        assert!(matches!(
            compress_files(&[a.clone(), a]),
            Err(SubmitError::ConfigurationError(_))
        ));
        Ok(())
    }

    #[test]
    fn test_request_json() -> SubmitResult<()> {
        let payload = SubmissionPayload {
            app_resource: AppResource::RemoteAppResource {
                resource: "local:///opt/app.jar".to_string(),
            },
            main_class: "org.apache.spark.examples.SparkPi".to_string(),
            app_args: vec!["10".to_string()],
            uploaded_driver_extra_classpath: None,
            uploaded_jars: Some("H4sI".to_string()),
        };
        let request = payload.into_request(
            "c2VjcmV0".to_string(),
            BTreeMap::from([("spark.app.name".to_string(), "pi".to_string())]),
        );
        let value = serde_json::to_value(&request)?;
        assert_eq!(
            value,
            serde_json::json!({
                "action": "KubernetesCreateSubmissionRequest",
                "clientSparkVersion": CLIENT_SPARK_VERSION,
                "appResource": {
                    "type": "RemoteAppResource",
                    "resource": "local:///opt/app.jar",
                },
                "mainClass": "org.apache.spark.examples.SparkPi",
                "appArgs": ["10"],
                "secret": "c2VjcmV0",
                "sparkProperties": {"spark.app.name": "pi"},
                "uploadedJarsBase64Contents": "H4sI",
            })
        );
        Ok(())
    }
}
