//! Bulk endpoints over a file path prefix.

use crate::bulk::{self, BulkMatchReport, BulkSolveReport};
use crate::error::{ApiError, ApiResult};
use crate::state::AppState;
use axum::Json;
use axum::extract::State;
use serde::Deserialize;

#[derive(Debug, Deserialize)]
pub struct BulkSolveRequest {
    pub prefix: String,
    #[serde(default)]
    pub force: bool,
}

#[derive(Debug, Deserialize)]
pub struct BulkMatchRequest {
    pub prefix: String,
}

fn require_prefix(prefix: &str) -> ApiResult<()> {
    if prefix.trim().is_empty() {
        return Err(ApiError::BadRequest("prefix must not be empty".to_string()));
    }
    Ok(())
}

/// POST /v1/bulk/solve
pub async fn bulk_solve(
    State(state): State<AppState>,
    Json(req): Json<BulkSolveRequest>,
) -> ApiResult<Json<BulkSolveReport>> {
    require_prefix(&req.prefix)?;
    let report = bulk::bulk_solve(
        state.metadata.as_ref(),
        &state.workflow,
        &req.prefix,
        req.force,
    )
    .await?;
    Ok(Json(report))
}

/// POST /v1/bulk/match
pub async fn bulk_match(
    State(state): State<AppState>,
    Json(req): Json<BulkMatchRequest>,
) -> ApiResult<Json<BulkMatchReport>> {
    require_prefix(&req.prefix)?;
    let report = bulk::bulk_match(state.metadata.as_ref(), &state.matcher, &req.prefix).await?;
    Ok(Json(report))
}
