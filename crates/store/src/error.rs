//! Store error types.

use thiserror::Error;

/// Store operation errors.
#[derive(Debug, Error)]
pub enum StoreError {
    /// The path is not known to be valid. An expected outcome, not a failure.
    #[error("path '{0}' is not valid")]
    InvalidPath(String),

    #[error("don't know how to open store '{0}'")]
    UnsupportedUri(String),

    #[error("store '{uri}' does not support {operation}")]
    Unsupported { uri: String, operation: &'static str },

    #[error("hash mismatch importing path '{path}': expected {expected}, got {actual}")]
    HashMismatch {
        path: String,
        expected: String,
        actual: String,
    },

    #[error("cannot add path '{0}' without a NAR hash")]
    MissingNarHash(String),

    #[error("daemon protocol error: {0}")]
    Protocol(String),

    #[error("configuration error: {0}")]
    Config(String),

    #[error(transparent)]
    Core(#[from] depot_core::Error),

    #[error(transparent)]
    Metadata(#[from] depot_metadata::MetadataError),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("serialization error: {0}")]
    Json(#[from] serde_json::Error),
}

impl StoreError {
    pub fn is_invalid_path(&self) -> bool {
        matches!(self, Self::InvalidPath(_))
    }
}

/// Result type for store operations.
pub type StoreResult<T> = std::result::Result<T, StoreError>;
