//! Metadata store error types.

use thiserror::Error;

/// Errors raised by image, catalog, match, task and lease persistence.
#[derive(Debug, Error)]
pub enum MetadataError {
    #[error("not found: {0}")]
    NotFound(String),

    #[error("already exists: {0}")]
    AlreadyExists(String),

    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("invalid state transition: {from} -> {to}")]
    InvalidStateTransition { from: String, to: String },

    #[error("configuration error: {0}")]
    Config(String),

    #[error("constraint violation: {0}")]
    Constraint(String),

    /// A stored column that no longer decodes: an unknown status or catalog
    /// kind, or header JSON that does not parse.
    #[error("invalid stored value: {0}")]
    Decode(#[from] skycat_core::Error),

    #[error("internal error: {0}")]
    Internal(String),
}

/// Result type for metadata operations.
pub type MetadataResult<T> = std::result::Result<T, MetadataError>;
