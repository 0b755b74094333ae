//! API error types.

use crate::catalog_import::ImportError;
use crate::matcher::MatchError;
use crate::workflow::WorkflowError;
use axum::Json;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde::Serialize;
use skycat_metadata::MetadataError;
use skycat_solver::SolverError;

/// API error response.
#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    /// Error code for programmatic handling.
    pub code: String,
    /// Human-readable error message.
    pub message: String,
}

/// API error type.
#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    #[error("not found: {0}")]
    NotFound(String),

    #[error("bad request: {0}")]
    BadRequest(String),

    #[error("conflict: {0}")]
    Conflict(String),

    #[error("internal error: {0}")]
    Internal(String),

    #[error("metadata error: {0}")]
    Metadata(#[from] MetadataError),

    #[error("core error: {0}")]
    Core(#[from] skycat_core::Error),

    #[error("solver error: {0}")]
    Solver(#[from] SolverError),

    #[error("match error: {0}")]
    Match(#[from] MatchError),

    #[error("import error: {0}")]
    Import(#[from] ImportError),
}

impl From<WorkflowError> for ApiError {
    fn from(e: WorkflowError) -> Self {
        match e {
            WorkflowError::ImageNotFound(id) => Self::NotFound(format!("image {id}")),
            WorkflowError::NoJob(id) => Self::Conflict(format!("image {id} has no solver job")),
            WorkflowError::Solver(e) => Self::Solver(e),
            WorkflowError::Metadata(e) => Self::Metadata(e),
            WorkflowError::Match(e) => Self::Match(e),
            WorkflowError::Core(e) => Self::Core(e),
            WorkflowError::Io(e) => Self::Internal(e.to_string()),
        }
    }
}

impl ApiError {
    /// Get the error code for this error.
    pub fn code(&self) -> &'static str {
        match self {
            Self::NotFound(_) => "not_found",
            Self::BadRequest(_) => "bad_request",
            Self::Conflict(_) => "conflict",
            Self::Internal(_) => "internal_error",
            Self::Metadata(_) => "metadata_error",
            Self::Core(_) => "core_error",
            Self::Solver(_) => "solver_error",
            Self::Match(_) => "match_error",
            Self::Import(_) => "import_error",
        }
    }

    /// Get the HTTP status code for this error.
    pub fn status_code(&self) -> StatusCode {
        match self {
            Self::NotFound(_) => StatusCode::NOT_FOUND,
            Self::BadRequest(_) => StatusCode::BAD_REQUEST,
            Self::Conflict(_) => StatusCode::CONFLICT,
            Self::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
            Self::Metadata(e) => match e {
                MetadataError::NotFound(_) => StatusCode::NOT_FOUND,
                MetadataError::AlreadyExists(_) => StatusCode::CONFLICT,
                MetadataError::Constraint(_) => StatusCode::CONFLICT,
                MetadataError::InvalidStateTransition { .. } => StatusCode::CONFLICT,
                _ => StatusCode::INTERNAL_SERVER_ERROR,
            },
            Self::Core(_) => StatusCode::UNPROCESSABLE_ENTITY,
            Self::Solver(e) => {
                if e.is_transient() {
                    StatusCode::BAD_GATEWAY
                } else {
                    match e {
                        SolverError::HumanCheck(_) => StatusCode::SERVICE_UNAVAILABLE,
                        SolverError::Config(_) => StatusCode::INTERNAL_SERVER_ERROR,
                        _ => StatusCode::BAD_GATEWAY,
                    }
                }
            }
            Self::Match(e) => match e {
                MatchError::ImageNotFound(_) => StatusCode::NOT_FOUND,
                MatchError::AllCatalogsFailed(_) => StatusCode::SERVICE_UNAVAILABLE,
                MatchError::Metadata(_) => StatusCode::INTERNAL_SERVER_ERROR,
            },
            Self::Import(e) => match e {
                ImportError::Json(_) => StatusCode::BAD_REQUEST,
                _ => StatusCode::INTERNAL_SERVER_ERROR,
            },
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        if status.is_server_error() {
            tracing::error!(code = self.code(), error = %self, "Request failed");
        }
        let body = ErrorResponse {
            code: self.code().to_string(),
            message: self.to_string(),
        };
        (status, Json(body)).into_response()
    }
}

/// Result type for API handlers.
pub type ApiResult<T> = std::result::Result<T, ApiError>;
