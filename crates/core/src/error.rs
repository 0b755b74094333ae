//! Error types for the core domain.

use thiserror::Error;

/// Core domain error type.
#[derive(Debug, Error)]
pub enum Error {
    #[error("missing WCS parameter: {0}")]
    MissingParameter(&'static str),

    #[error("degenerate WCS transform (determinant {0:e})")]
    DegenerateTransform(f64),

    #[error("unsupported projection: {0}")]
    UnsupportedProjection(String),

    #[error("point ({ra}, {dec}) is not projectable onto the tangent plane")]
    NotProjectable { ra: f64, dec: f64 },

    #[error("invalid header: {0}")]
    InvalidHeader(String),

    #[error("invalid value for {field}: {value}")]
    InvalidValue { field: &'static str, value: String },

    #[error("serialization error: {0}")]
    Serialization(String),
}

impl From<serde_json::Error> for Error {
    fn from(e: serde_json::Error) -> Self {
        Error::Serialization(e.to_string())
    }
}

/// Result type alias for core operations.
pub type Result<T> = std::result::Result<T, Error>;
