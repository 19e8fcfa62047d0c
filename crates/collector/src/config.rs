//! Collector configuration.

use apicollect_common::{Error, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Collector configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CollectorConfig {
    /// Benchmark data stream.
    #[serde(default)]
    pub content: Option<PathBuf>,
    /// Optional tailoring document.
    #[serde(default)]
    pub tailoring: Option<PathBuf>,
    /// Profile id; the tailored profile id when `tailoring` is set.
    #[serde(default)]
    pub profile: String,
    /// Directory fetched resources are written under.
    #[serde(default = "default_result_dir")]
    pub result_dir: PathBuf,
    /// File collection warnings are written to, if there are any.
    #[serde(default = "default_warnings_file")]
    pub warnings_file: PathBuf,
    /// How long to wait for content files to appear.
    #[serde(default = "default_content_timeout")]
    pub content_timeout_seconds: u64,
    /// Additional URIs fetched on every run.
    #[serde(default)]
    pub extra_paths: Vec<String>,
    #[serde(default)]
    pub cluster: ClusterConfig,
}

/// How to reach the API server.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ClusterConfig {
    /// API server URL. Defaults to the in-cluster service address.
    #[serde(default)]
    pub api_server: Option<String>,
    /// Bearer token file. Defaults to the pod's service account token.
    #[serde(default)]
    pub token_file: Option<PathBuf>,
    /// CA bundle. Defaults to the pod's service account CA.
    #[serde(default)]
    pub ca_file: Option<PathBuf>,
    #[serde(default)]
    pub insecure_skip_tls_verify: bool,
}

fn default_result_dir() -> PathBuf {
    PathBuf::from("/tmp/apicollect/results")
}

fn default_warnings_file() -> PathBuf {
    PathBuf::from("/tmp/apicollect/warnings.out")
}

fn default_content_timeout() -> u64 {
    apicollect_content::CONTENT_FILE_TIMEOUT.as_secs()
}

impl Default for CollectorConfig {
    fn default() -> Self {
        Self {
            content: None,
            tailoring: None,
            profile: String::new(),
            result_dir: default_result_dir(),
            warnings_file: default_warnings_file(),
            content_timeout_seconds: default_content_timeout(),
            extra_paths: Vec::new(),
            cluster: ClusterConfig::default(),
        }
    }
}

impl CollectorConfig {
    /// Load configuration from a YAML or JSON file.
    pub fn from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let ext = path
            .extension()
            .and_then(|e| e.to_str())
            .unwrap_or("")
            .to_lowercase();

        match ext.as_str() {
            "yaml" | "yml" => Ok(serde_yaml::from_str(&content)?),
            "json" => Ok(serde_json::from_str(&content)?),
            _ => Err(Error::Config(format!(
                "unsupported config format '{}' for {}",
                ext,
                path.display()
            ))),
        }
    }

    /// Check that everything a collection run needs is set.
    pub fn validate(&self) -> Result<()> {
        if self.content.is_none() {
            return Err(Error::Config("no content file given".to_string()));
        }
        if self.profile.is_empty() {
            return Err(Error::Config("no profile given".to_string()));
        }
        if self.content_timeout_seconds == 0 {
            return Err(Error::Config(
                "content timeout must be at least one second".to_string(),
            ));
        }
        Ok(())
    }

    pub fn content_timeout(&self) -> Duration {
        Duration::from_secs(self.content_timeout_seconds)
    }
}
