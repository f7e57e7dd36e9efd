//! Error types for catalog loading.

use thiserror::Error;

/// Result type for catalog operations
pub type CatalogResult<T> = Result<T, CatalogError>;

/// Errors that can occur while building or loading a catalog
#[derive(Debug, Error)]
pub enum CatalogError {
    /// Template metadata document could not be parsed
    #[error("Invalid template metadata: {0}")]
    InvalidMetadata(String),

    /// Two documents describe the same template
    #[error("Duplicate template: {0}")]
    DuplicateTemplate(String),

    /// Filesystem error while reading a snapshot
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON serialization/deserialization error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl CatalogError {
    pub fn invalid_metadata(msg: impl Into<String>) -> Self {
        Self::InvalidMetadata(msg.into())
    }
}
