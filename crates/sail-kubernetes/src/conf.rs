use std::collections::BTreeMap;
use std::path::Path;
use std::time::Duration;

use crate::error::{SubmitError, SubmitResult};

/// The application properties for one submission.
///
/// The properties come from an optional properties file and `--conf` overrides.
/// The full set is forwarded to the driver as part of the submission request,
/// and a subset is interpreted by [`crate::options::KubernetesSubmitOptions`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SparkConf {
    entries: BTreeMap<String, String>,
}

impl SparkConf {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(&mut self, key: impl Into<String>, value: impl Into<String>) -> &mut Self {
        self.entries.insert(key.into(), value.into());
        self
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.entries.get(key).map(|x| x.as_str())
    }

    pub fn contains(&self, key: &str) -> bool {
        self.entries.contains_key(key)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.entries.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    pub fn to_map(&self) -> BTreeMap<String, String> {
        self.entries.clone()
    }

    /// Returns the value as a port number, or the default if the key is absent.
    pub fn get_port(&self, key: &str, default: u16) -> SubmitResult<u16> {
        match self.get(key) {
            None => Ok(default),
            Some(value) => value
                .trim()
                .parse::<u16>()
                .map_err(|e| SubmitError::config(format!("invalid port for {key}: {value}: {e}"))),
        }
    }

    /// Returns the value as a duration, or the default if the key is absent.
    /// A bare number is interpreted as seconds.
    pub fn get_duration(&self, key: &str, default: Duration) -> SubmitResult<Duration> {
        match self.get(key) {
            None => Ok(default),
            Some(value) => parse_duration(value)
                .ok_or_else(|| SubmitError::config(format!("invalid duration for {key}: {value}"))),
        }
    }

    /// Returns the comma-separated non-empty items of the value.
    pub fn get_list(&self, key: &str) -> Vec<String> {
        self.get(key)
            .map(|value| {
                value
                    .split(',')
                    .map(|x| x.trim())
                    .filter(|x| !x.is_empty())
                    .map(|x| x.to_string())
                    .collect()
            })
            .unwrap_or_default()
    }

    pub fn load_properties_file(path: impl AsRef<Path>) -> SubmitResult<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|e| {
            SubmitError::config(format!(
                "failed to read properties file {}: {e}",
                path.display()
            ))
        })?;
        Ok(Self::parse_properties(&content))
    }

    /// Parses properties where each line holds a key and a value separated by
    /// `=`, `:`, or whitespace. Blank lines and lines starting with `#` or `!` are ignored.
    pub fn parse_properties(content: &str) -> Self {
        let mut conf = Self::new();
        for line in content.lines() {
            let line = line.trim();
            if line.is_empty() || line.starts_with('#') || line.starts_with('!') {
                continue;
            }
            let (key, value) = match line.find(|c: char| c == '=' || c == ':' || c.is_whitespace())
            {
                Some(i) => {
                    let value = line[i..].trim_start();
                    let value = value
                        .strip_prefix(['=', ':'])
                        .map(|x| x.trim_start())
                        .unwrap_or(value);
                    (&line[..i], value)
                }
                None => (line, ""),
            };
            conf.set(key, value);
        }
        conf
    }
}

impl FromIterator<(String, String)> for SparkConf {
    fn from_iter<T: IntoIterator<Item = (String, String)>>(iter: T) -> Self {
        Self {
            entries: iter.into_iter().collect(),
        }
    }
}

impl Extend<(String, String)> for SparkConf {
    fn extend<T: IntoIterator<Item = (String, String)>>(&mut self, iter: T) {
        self.entries.extend(iter);
    }
}

/// Parses a `KEY=VALUE` pair given on the command line.
pub fn parse_key_value(s: &str) -> SubmitResult<(String, String)> {
    match s.split_once('=') {
        Some((key, value)) if !key.trim().is_empty() => {
            Ok((key.trim().to_string(), value.to_string()))
        }
        _ => Err(SubmitError::config(format!(
            "invalid property (expected KEY=VALUE): {s}"
        ))),
    }
}

fn parse_duration(value: &str) -> Option<Duration> {
    let value = value.trim().to_lowercase();
    let split = value
        .find(|c: char| !c.is_ascii_digit())
        .unwrap_or(value.len());
    let (number, unit) = value.split_at(split);
    let number = number.parse::<u64>().ok()?;
    match unit.trim() {
        "" | "s" => Some(Duration::from_secs(number)),
        "ms" => Some(Duration::from_millis(number)),
        "m" | "min" => Some(Duration::from_secs(number.checked_mul(60)?)),
        "h" => Some(Duration::from_secs(number.checked_mul(3600)?)),
        _ => None,
    }
}
