//! Error types for AQL path compilation

use openehr_aql_catalog::CatalogError;
use thiserror::Error;

/// Result type for compilation operations
pub type CompileResult<T> = Result<T, CompileError>;

/// Errors that can occur while compiling a single AQL variable.
///
/// Errors are per variable: callers compile each variable independently and
/// decide whether to fail the whole query or substitute a null field.
#[derive(Debug, Error)]
pub enum CompileError {
    /// No declared type for a path and unresolved introspection is not ignored
    #[error("Could not resolve type for path '{path}' in template '{template_id}'")]
    UnresolvedType { template_id: String, path: String },

    /// Multiplicity catalog and JSON encoding disagree on a path
    #[error("Drift in locating array marker: aql:{aql}, jsonb:{jsonb}, @index:{index}")]
    StructuralDrift {
        aql: String,
        jsonb: String,
        index: usize,
    },

    /// Whole-entity SELECT for a class without canonical JSON projection
    #[error("Unsupported entity for canonical projection: {0}")]
    UnsupportedEntity(String),

    /// WHERE value path on a template without a resolvable entry root
    #[error("Template '{template_id}' has no entry root")]
    MissingEntryRoot { template_id: String },

    /// Malformed path input
    #[error("Invalid path: {0}")]
    InvalidPath(String),

    /// Template id not known to the catalog
    #[error("Unknown template: {0}")]
    UnknownTemplate(String),

    /// Compiler configuration rejected
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    /// Broken internal invariant
    #[error("Internal error: {0}")]
    Internal(String),

    /// Catalog error
    #[error(transparent)]
    Catalog(#[from] CatalogError),
}

impl CompileError {
    pub fn invalid_path(msg: impl Into<String>) -> Self {
        Self::InvalidPath(msg.into())
    }

    pub fn internal(msg: impl Into<String>) -> Self {
        Self::Internal(msg.into())
    }

    /// True for errors that indicate catalog/encoding inconsistency rather
    /// than bad input.
    pub fn is_fatal(&self) -> bool {
        matches!(self, Self::StructuralDrift { .. } | Self::Internal(_))
    }
}
