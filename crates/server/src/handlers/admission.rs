//! Operator control of the submission ceiling.

use crate::error::ApiResult;
use crate::state::AppState;
use axum::Json;
use axum::extract::State;
use serde::{Deserialize, Serialize};
use skycat_metadata::repos::ImageRepo;

#[derive(Debug, Deserialize)]
pub struct SetCeilingRequest {
    /// Zero pauses new submissions; running ones are unaffected.
    pub max_in_flight: u32,
}

#[derive(Debug, Serialize)]
pub struct CeilingResponse {
    pub max_in_flight: u32,
    pub in_flight: i64,
}

async fn ceiling_response(state: &AppState) -> ApiResult<Json<CeilingResponse>> {
    Ok(Json(CeilingResponse {
        max_in_flight: state.admission.ceiling(),
        in_flight: state.metadata.count_in_flight().await?,
    }))
}

/// GET /v1/admission/ceiling
pub async fn get_ceiling(State(state): State<AppState>) -> ApiResult<Json<CeilingResponse>> {
    ceiling_response(&state).await
}

/// PUT /v1/admission/ceiling
///
/// Lasts until restart; the configured value applies again afterwards.
pub async fn set_ceiling(
    State(state): State<AppState>,
    Json(req): Json<SetCeilingRequest>,
) -> ApiResult<Json<CeilingResponse>> {
    state.admission.set_ceiling(req.max_in_flight);
    ceiling_response(&state).await
}
