//! Errors reported by the cluster API surface.
//!
//! Fetching tolerates a handful of API failures (missing objects, RBAC
//! denials, API groups the cluster doesn't serve) and aborts on everything
//! else, so the classification lives next to the error itself.

use thiserror::Error;

/// Error returned by a cluster client call.
#[derive(Error, Debug)]
pub enum ApiError {
    /// The object does not exist. `reason` is the API status reason, e.g. `NotFound`.
    #[error("{message} (reason: {reason})")]
    NotFound { reason: String, message: String },

    #[error("forbidden: {0}")]
    Forbidden(String),

    /// The cluster serves no API kind matching the request.
    #[error("no matches for kind: {0}")]
    NoKindMatch(String),

    #[error("unexpected status {code}: {message}")]
    Status { code: u16, message: String },

    #[error("transport error: {0}")]
    Transport(String),

    #[error("malformed response: {0}")]
    Decode(String),
}

impl ApiError {
    pub fn not_found(message: impl Into<String>) -> Self {
        ApiError::NotFound {
            reason: "NotFound".to_string(),
            message: message.into(),
        }
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, ApiError::NotFound { .. })
    }

    pub fn is_forbidden(&self) -> bool {
        matches!(self, ApiError::Forbidden(_))
    }

    pub fn is_no_match(&self) -> bool {
        matches!(self, ApiError::NoKindMatch(_))
    }

    /// Errors a collection run records as a warning instead of aborting.
    pub fn is_tolerated(&self) -> bool {
        self.is_not_found() || self.is_forbidden() || self.is_no_match()
    }

    /// The API status reason for this error.
    pub fn reason(&self) -> &str {
        match self {
            ApiError::NotFound { reason, .. } => reason,
            ApiError::Forbidden(_) => "Forbidden",
            ApiError::NoKindMatch(_) => "NoKindMatch",
            ApiError::Status { .. } | ApiError::Transport(_) | ApiError::Decode(_) => "Unknown",
        }
    }
}
