//! Error types for the core domain.

use thiserror::Error;

/// Core domain error type.
#[derive(Debug, Error)]
pub enum Error {
    #[error("illegal name: '{0}'")]
    IllegalName(String),

    #[error("invalid character '{ch}' in name '{name}'")]
    InvalidNameChar { ch: char, name: String },

    #[error("path '{0}' is not in the store")]
    NotInStore(String),

    #[error("invalid store path '{path}': {reason}")]
    InvalidStorePath { path: String, reason: String },

    #[error("invalid hash: {0}")]
    InvalidHash(String),

    #[error("unknown hash algorithm: {0}")]
    UnknownHashAlgorithm(String),

    #[error("parse error: {0}")]
    Parse(String),

    #[error(
        "cannot calculate fingerprint of path '{0}' because its size/hash is not known"
    )]
    Fingerprint(String),

    #[error("narinfo parse error: {0}")]
    NarInfoParse(String),

    #[error("NAR error: {0}")]
    Nar(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl Error {
    pub(crate) fn invalid_path(path: &str, reason: impl Into<String>) -> Self {
        Self::InvalidStorePath {
            path: path.to_string(),
            reason: reason.into(),
        }
    }

    /// Whether this error rejects a store name.
    pub fn is_naming_error(&self) -> bool {
        matches!(self, Self::IllegalName(_) | Self::InvalidNameChar { .. })
    }
}

/// Result type alias for core operations.
pub type Result<T> = std::result::Result<T, Error>;
