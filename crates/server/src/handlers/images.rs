//! Per-image endpoints: status, solve, matches and annotation.

use crate::error::{ApiError, ApiResult};
use crate::matcher::MatchReport;
use crate::state::AppState;
use crate::workflow::SolveRequestOutcome;
use axum::Json;
use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use serde::{Deserialize, Serialize};
use skycat_metadata::models::{ImageRow, MatchRow};
use skycat_metadata::repos::{ImageRepo, MatchRepo};
use time::OffsetDateTime;
use time::format_description::well_known::Rfc3339;

/// Astrometry state of one image.
#[derive(Debug, Serialize)]
pub struct ImageResponse {
    pub image_id: i64,
    pub file_path: String,
    pub astrometry_status: String,
    pub astrometry_provider: Option<String>,
    pub submission_id: Option<String>,
    pub job_id: Option<String>,
    pub astrometry_url: Option<String>,
    pub is_plate_solved: bool,
    pub plate_solve_source: Option<String>,
    pub ra_center_degrees: Option<f64>,
    pub dec_center_degrees: Option<f64>,
    pub field_radius_degrees: Option<f64>,
    pub pixel_scale_arcsec: Option<f64>,
    pub rotation_degrees: Option<f64>,
    pub parity: Option<i32>,
    pub has_wcs_header: bool,
    pub updated_at: String,
}

/// One catalog match.
#[derive(Debug, Serialize)]
pub struct MatchResponse {
    pub catalog_kind: String,
    pub designation: String,
    pub angular_separation_degrees: Option<f64>,
    pub confidence_score: Option<f64>,
    pub match_source: String,
    pub is_in_field: bool,
    pub created_at: String,
}

#[derive(Debug, Serialize)]
pub struct ListMatchesResponse {
    pub image_id: i64,
    pub matches: Vec<MatchResponse>,
}

#[derive(Debug, Serialize)]
pub struct AnnotationResponse {
    pub image_id: i64,
    pub path: String,
}

/// Query parameters for a solve request.
#[derive(Debug, Default, Deserialize)]
pub struct SolveParams {
    /// Re-solve even if the image is already SOLVED.
    #[serde(default)]
    pub force: bool,
}

fn parse_image_id(raw: &str) -> ApiResult<i64> {
    raw.parse::<i64>()
        .map_err(|_| ApiError::BadRequest(format!("invalid image id: {raw}")))
}

fn rfc3339(t: OffsetDateTime, field: &str) -> ApiResult<String> {
    t.format(&Rfc3339)
        .map_err(|e| ApiError::Internal(format!("failed to format {field}: {e}")))
}

fn image_row_to_response(image: ImageRow) -> ApiResult<ImageResponse> {
    let updated_at = rfc3339(image.updated_at, "updated_at")?;
    Ok(ImageResponse {
        image_id: image.image_id,
        file_path: image.file_path,
        astrometry_status: image.astrometry_status,
        astrometry_provider: image.astrometry_provider,
        submission_id: image.submission_id,
        job_id: image.job_id,
        astrometry_url: image.astrometry_url,
        is_plate_solved: image.is_plate_solved,
        plate_solve_source: image.plate_solve_source,
        ra_center_degrees: image.ra_center_degrees,
        dec_center_degrees: image.dec_center_degrees,
        field_radius_degrees: image.field_radius_degrees,
        pixel_scale_arcsec: image.pixel_scale_arcsec,
        rotation_degrees: image.rotation_degrees,
        parity: image.parity,
        has_wcs_header: image.wcs_header.is_some(),
        updated_at,
    })
}

fn match_row_to_response(row: MatchRow) -> ApiResult<MatchResponse> {
    let created_at = rfc3339(row.created_at, "created_at")?;
    Ok(MatchResponse {
        catalog_kind: row.catalog_kind,
        designation: row.designation,
        angular_separation_degrees: row.angular_separation_degrees,
        confidence_score: row.confidence_score,
        match_source: row.match_source,
        is_in_field: row.is_in_field,
        created_at,
    })
}

/// GET /v1/images/{image_id}
pub async fn get_image(
    State(state): State<AppState>,
    Path(image_id): Path<String>,
) -> ApiResult<Json<ImageResponse>> {
    let image_id = parse_image_id(&image_id)?;
    let image = state
        .metadata
        .get_image(image_id)
        .await?
        .ok_or_else(|| ApiError::NotFound(format!("image {image_id}")))?;
    Ok(Json(image_row_to_response(image)?))
}

/// POST /v1/images/{image_id}/solve?force=true
///
/// 202 when the request was deferred to a submit task.
pub async fn request_solve(
    State(state): State<AppState>,
    Path(image_id): Path<String>,
    Query(params): Query<SolveParams>,
) -> ApiResult<(StatusCode, Json<SolveRequestOutcome>)> {
    let image_id = parse_image_id(&image_id)?;
    let outcome = state.workflow.request_solve(image_id, params.force).await?;
    let status = match outcome {
        SolveRequestOutcome::Queued { .. } => StatusCode::ACCEPTED,
        _ => StatusCode::OK,
    };
    Ok((status, Json(outcome)))
}

/// POST /v1/images/{image_id}/matches - Recompute automatic matches.
pub async fn rematch_image(
    State(state): State<AppState>,
    Path(image_id): Path<String>,
) -> ApiResult<Json<MatchReport>> {
    let image_id = parse_image_id(&image_id)?;
    let report = state.matcher.match_image(image_id).await?;
    Ok(Json(report))
}

/// GET /v1/images/{image_id}/matches
pub async fn list_matches(
    State(state): State<AppState>,
    Path(image_id): Path<String>,
) -> ApiResult<Json<ListMatchesResponse>> {
    let image_id = parse_image_id(&image_id)?;
    if state.metadata.get_image(image_id).await?.is_none() {
        return Err(ApiError::NotFound(format!("image {image_id}")));
    }
    let matches = state
        .metadata
        .list_matches(image_id)
        .await?
        .into_iter()
        .map(match_row_to_response)
        .collect::<ApiResult<Vec<_>>>()?;
    Ok(Json(ListMatchesResponse { image_id, matches }))
}

/// POST /v1/images/{image_id}/annotation - Re-download the annotated preview.
pub async fn fetch_annotation(
    State(state): State<AppState>,
    Path(image_id): Path<String>,
) -> ApiResult<Json<AnnotationResponse>> {
    let image_id = parse_image_id(&image_id)?;
    let path = state.workflow.fetch_annotation(image_id).await?;
    Ok(Json(AnnotationResponse {
        image_id,
        path: path.display().to_string(),
    }))
}
