//! Health endpoint.

use crate::error::ApiResult;
use crate::state::AppState;
use axum::Json;
use axum::extract::State;
use serde::Serialize;
use skycat_metadata::repos::ImageRepo;

#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub version: &'static str,
    /// Images currently SUBMITTED or PROCESSING.
    pub in_flight: i64,
    pub max_in_flight: u32,
}

/// GET /v1/health
///
/// Fails with 500 when the metadata store is unreachable.
pub async fn health_check(State(state): State<AppState>) -> ApiResult<Json<HealthResponse>> {
    state.metadata.health_check().await?;
    let in_flight = state.metadata.count_in_flight().await?;

    Ok(Json(HealthResponse {
        status: "ok",
        version: env!("CARGO_PKG_VERSION"),
        in_flight,
        max_in_flight: state.admission.ceiling(),
    }))
}
