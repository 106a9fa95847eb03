//! Error types for cachegraph
//!
//! All modules use `CacheGraphResult<T>` as their return type.

use std::path::PathBuf;
use thiserror::Error;

/// Result type alias for cachegraph operations
pub type CacheGraphResult<T> = Result<T, CacheGraphError>;

/// All errors that can occur in cachegraph
#[derive(Error, Debug)]
pub enum CacheGraphError {
    // Lookup errors
    #[error("not found: {0}")]
    NotFound(String),

    // Storage errors
    #[error("{backend} backend error: {reason}")]
    Backend { backend: String, reason: String },

    // Cancellation errors
    #[error("operation cancelled")]
    Cancelled,

    #[error("deadline exceeded")]
    DeadlineExceeded,

    // Model errors
    #[error("Invalid digest: {0}")]
    InvalidDigest(String),

    #[error("Invalid graph manifest at {path}: {reason}")]
    GraphInvalid { path: PathBuf, reason: String },

    // Configuration errors
    #[error("Invalid configuration at {path}: {reason}")]
    ConfigInvalid { path: PathBuf, reason: String },

    #[error("Failed to create config directory {path}: {source}")]
    ConfigDirCreate {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    // IO errors
    #[error("IO error: {context}")]
    Io {
        context: String,
        #[source]
        source: std::io::Error,
    },

    // Serialization errors
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("TOML parse error: {0}")]
    TomlParse(#[from] toml::de::Error),

    #[error("TOML serialize error: {0}")]
    TomlSerialize(#[from] toml::ser::Error),
}

impl CacheGraphError {
    /// Create an IO error with context
    pub fn io(context: impl Into<String>, source: std::io::Error) -> Self {
        Self::Io {
            context: context.into(),
            source,
        }
    }

    /// Create a storage backend error
    pub fn backend(backend: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::Backend {
            backend: backend.into(),
            reason: reason.into(),
        }
    }

    /// Create a not-found error for a result or key id
    pub fn not_found(what: impl Into<String>) -> Self {
        Self::NotFound(what.into())
    }

    /// Whether the error only reports a missing result
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound(_))
    }

    /// Whether the error comes from cancellation or a deadline
    pub fn is_cancellation(&self) -> bool {
        matches!(self, Self::Cancelled | Self::DeadlineExceeded)
    }

    /// Get actionable hint for the error
    pub fn hint(&self) -> Option<&'static str> {
        match self {
            Self::DeadlineExceeded => Some("Increase --timeout or drop it to wait indefinitely"),
            Self::GraphInvalid { .. } => {
                Some("Dependencies must reference keys declared earlier in the manifest")
            }
            Self::ConfigInvalid { .. } => Some("Run: cachegraph config init --force"),
            _ => None,
        }
    }
}
