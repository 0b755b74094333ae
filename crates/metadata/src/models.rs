//! Database models mapping to the metadata schema.

use crate::error::{MetadataError, MetadataResult};
use skycat_core::{
    AstrometryStatus, AstrometrySummary, CatalogKind, HeaderCards, MatchSource, ProviderKind,
};
use sqlx::FromRow;
use time::OffsetDateTime;
use uuid::Uuid;

// =============================================================================
// Images
// =============================================================================

/// Image record with its astrometry state.
#[derive(Debug, Clone, FromRow)]
pub struct ImageRow {
    pub image_id: i64,
    pub file_path: String,
    pub subtype: Option<String>,
    pub width_pixels: Option<i32>,
    pub height_pixels: Option<i32>,
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
    /// Distortion solution downloaded from the solver (JSON header cards).
    pub wcs_header: Option<String>,
    /// Header cards extracted from the image file at import (JSON).
    pub raw_header: Option<String>,
    pub created_at: OffsetDateTime,
    pub updated_at: OffsetDateTime,
}

impl ImageRow {
    pub fn status(&self) -> MetadataResult<AstrometryStatus> {
        self.astrometry_status.parse().map_err(MetadataError::from)
    }

    pub fn provider(&self) -> Option<ProviderKind> {
        self.astrometry_provider.as_deref().and_then(|p| p.parse().ok())
    }

    /// Whether the image carries a usable plate solution.
    pub fn is_solved(&self) -> bool {
        self.is_plate_solved || self.astrometry_status == AstrometryStatus::Solved.as_str()
    }

    pub fn summary(&self) -> AstrometrySummary {
        AstrometrySummary {
            ra_center_degrees: self.ra_center_degrees,
            dec_center_degrees: self.dec_center_degrees,
            field_radius_degrees: self.field_radius_degrees,
            pixel_scale_arcsec: self.pixel_scale_arcsec,
            rotation_degrees: self.rotation_degrees,
            width_pixels: self.width_pixels.and_then(|w| u32::try_from(w).ok()),
            height_pixels: self.height_pixels.and_then(|h| u32::try_from(h).ok()),
            parity: self.parity,
        }
    }

    /// Decode the stored distortion solution, if any.
    pub fn wcs_cards(&self) -> MetadataResult<Option<HeaderCards>> {
        decode_cards(self.wcs_header.as_deref())
    }

    /// Decode the stored import header, if any.
    pub fn raw_cards(&self) -> MetadataResult<Option<HeaderCards>> {
        decode_cards(self.raw_header.as_deref())
    }
}

fn decode_cards(json: Option<&str>) -> MetadataResult<Option<HeaderCards>> {
    json.map(HeaderCards::from_json_str)
        .transpose()
        .map_err(MetadataError::from)
}

/// Fields supplied when an image is first indexed.
#[derive(Debug, Clone, Default)]
pub struct NewImage {
    pub file_path: String,
    pub subtype: Option<String>,
    pub width_pixels: Option<i32>,
    pub height_pixels: Option<i32>,
    /// Solution imported from the file header, if it had one.
    pub is_plate_solved: bool,
    pub plate_solve_source: Option<String>,
    pub ra_center_degrees: Option<f64>,
    pub dec_center_degrees: Option<f64>,
    pub field_radius_degrees: Option<f64>,
    pub pixel_scale_arcsec: Option<f64>,
    pub rotation_degrees: Option<f64>,
    pub parity: Option<i32>,
    pub raw_header: Option<String>,
}

/// Everything written when a job succeeds.
#[derive(Debug, Clone)]
pub struct SolutionRecord {
    pub job_id: String,
    pub ra_center_degrees: f64,
    pub dec_center_degrees: f64,
    pub field_radius_degrees: f64,
    pub pixel_scale_arcsec: f64,
    pub rotation_degrees: f64,
    pub parity: i32,
    pub astrometry_url: String,
}

// =============================================================================
// Catalogs
// =============================================================================

/// Reference catalog object.
#[derive(Debug, Clone, FromRow)]
pub struct CatalogObjectRow {
    pub catalog_kind: String,
    pub designation: String,
    pub common_name: Option<String>,
    pub object_type: Option<String>,
    pub constellation: Option<String>,
    pub magnitude: Option<f64>,
    pub ra_degrees: f64,
    pub dec_degrees: f64,
}

impl CatalogObjectRow {
    pub fn kind(&self) -> MetadataResult<CatalogKind> {
        self.catalog_kind.parse().map_err(MetadataError::from)
    }
}

/// Catalog object returned by a radius query.
#[derive(Debug, Clone)]
pub struct CatalogCandidate {
    pub object: CatalogObjectRow,
    /// Great-circle distance from the query center in degrees.
    pub separation_degrees: f64,
}

// =============================================================================
// Matches
// =============================================================================

/// Association between an image and a catalog object.
#[derive(Debug, Clone, FromRow)]
pub struct MatchRow {
    pub image_id: i64,
    pub catalog_kind: String,
    pub designation: String,
    pub angular_separation_degrees: Option<f64>,
    pub confidence_score: Option<f64>,
    pub match_source: String,
    pub is_in_field: bool,
    pub created_at: OffsetDateTime,
}

impl MatchRow {
    pub fn source(&self) -> MetadataResult<MatchSource> {
        self.match_source.parse().map_err(MetadataError::from)
    }
}

// =============================================================================
// Workflow tasks
// =============================================================================

/// Durable workflow task record.
#[derive(Debug, Clone, FromRow)]
pub struct TaskRow {
    pub task_id: Uuid,
    pub image_id: i64,
    pub kind: String,
    pub state: String,
    pub submission_id: Option<String>,
    pub attempt: i32,
    pub force: bool,
    pub run_after: OffsetDateTime,
    pub last_error: Option<String>,
    pub created_at: OffsetDateTime,
    pub updated_at: OffsetDateTime,
}

impl TaskRow {
    /// A queued task due at `run_after`.
    pub fn queued(
        image_id: i64,
        kind: crate::repos::TaskKind,
        submission_id: Option<String>,
        force: bool,
        run_after: OffsetDateTime,
    ) -> Self {
        let now = OffsetDateTime::now_utc();
        Self {
            task_id: Uuid::new_v4(),
            image_id,
            kind: kind.as_str().to_string(),
            state: crate::repos::TaskState::Queued.as_str().to_string(),
            submission_id,
            attempt: 0,
            force,
            run_after,
            last_error: None,
            created_at: now,
            updated_at: now,
        }
    }
}
