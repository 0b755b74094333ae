//! Solver client error types.

use thiserror::Error;

/// Errors talking to a plate-solving service.
#[derive(Debug, Error)]
pub enum SolverError {
    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("solver returned {status}: {body}")]
    Api { status: u16, body: String },

    /// The service answered but refused the request (bad key, missing subid).
    #[error("request rejected: {0}")]
    Rejected(String),

    #[error("failed to decode response: {0}")]
    Decode(String),

    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),

    #[error("human verification could not be bypassed: {0}")]
    HumanCheck(String),

    #[error("configuration error: {0}")]
    Config(String),
}

impl SolverError {
    /// Whether retrying the same request later may succeed.
    pub fn is_transient(&self) -> bool {
        match self {
            Self::Http(e) => {
                e.is_timeout()
                    || e.is_connect()
                    || e.is_request()
                    || e.status().is_some_and(|s| s.is_server_error())
            }
            Self::Api { status, .. } => *status >= 500 || *status == 429,
            Self::Io(_) => true,
            Self::Rejected(_) | Self::Decode(_) | Self::HumanCheck(_) | Self::Config(_) => false,
        }
    }
}

impl From<serde_json::Error> for SolverError {
    fn from(e: serde_json::Error) -> Self {
        SolverError::Decode(e.to_string())
    }
}

/// Result type for solver operations.
pub type SolverResult<T> = std::result::Result<T, SolverError>;
