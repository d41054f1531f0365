use std::path::PathBuf;

use thiserror::Error;

/// Failure of a single `download` (or of a fetch that several callers joined).
///
/// Every variant carries owned, cloneable data so one in-flight failure can be
/// handed to all of its waiters.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum FetchError {
    #[error("Invalid image URL: {0}")]
    InvalidUrl(String),

    #[error("Network error: {0}")]
    Network(String),

    #[error("Decode error: {0}")]
    Decode(String),

    #[error("Failed to persist image to {path:?}: {message}")]
    DiskWrite { path: PathBuf, message: String },

    #[error("Image fetch cancelled")]
    Cancelled,

    #[error("Internal error: {0}")]
    Internal(String),
}

impl FetchError {
    pub fn is_cancelled(&self) -> bool {
        matches!(self, FetchError::Cancelled)
    }
}

pub type Result<T> = std::result::Result<T, FetchError>;
