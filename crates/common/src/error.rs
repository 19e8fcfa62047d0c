//! Common error types for apicollect.

use crate::api::ApiError;
use std::path::PathBuf;
use thiserror::Error;

/// Common error type for apicollect operations.
#[derive(Error, Debug)]
pub enum Error {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("Timed out after {waited_secs}s waiting for content file {path}")]
    ContentTimeout { path: PathBuf, waited_secs: u64 },

    #[error("Failed to parse content {path}: {reason}")]
    ContentParse { path: PathBuf, reason: String },

    #[error("Cluster request for {uri} failed: {source}")]
    Fetch {
        uri: String,
        #[source]
        source: ApiError,
    },

    #[error("Couldn't filter with '{filter}': {reason}")]
    Filter { filter: String, reason: String },

    #[error("Couldn't compare kubelet configs for {node}: {reason}")]
    Reconcile { node: String, reason: String },

    #[error("Cannot parse MachineConfig {name}: {reason}")]
    MachineConfig { name: String, reason: String },

    #[error("Bad object path: {0}")]
    BadDumpPath(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("{0}")]
    Other(String),
}

/// Result type alias using common Error.
pub type Result<T> = std::result::Result<T, Error>;

impl From<anyhow::Error> for Error {
    fn from(e: anyhow::Error) -> Self {
        Error::Other(format!("{:#}", e))
    }
}

impl Error {
    /// Whether this error came from waiting on content that never showed up.
    pub fn is_timeout(&self) -> bool {
        matches!(self, Error::ContentTimeout { .. })
    }
}
