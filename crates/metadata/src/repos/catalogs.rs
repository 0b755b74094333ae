//! Reference catalog repository.

use crate::error::MetadataResult;
use crate::models::{CatalogCandidate, CatalogObjectRow};
use async_trait::async_trait;
use skycat_core::CatalogKind;

/// Repository for reference catalog objects.
#[async_trait]
pub trait CatalogRepo: Send + Sync {
    /// Insert or replace an object keyed by (catalog_kind, designation).
    async fn upsert_catalog_object(&self, object: &CatalogObjectRow) -> MetadataResult<()>;

    /// Objects of `kind` within `radius_degrees` great-circle distance of
    /// (ra, dec), nearest first, at most `limit` when set.
    async fn find_within_radius(
        &self,
        kind: CatalogKind,
        ra: f64,
        dec: f64,
        radius_degrees: f64,
        limit: Option<u32>,
    ) -> MetadataResult<Vec<CatalogCandidate>>;

    /// Coordinates of an object by designation.
    ///
    /// For catalogs that normalize designations, a miss on the exact form
    /// retries with the uppercase, space-free form on both sides.
    async fn find_coordinates(
        &self,
        kind: CatalogKind,
        designation: &str,
    ) -> MetadataResult<Option<(f64, f64)>>;

    /// Count objects, optionally for one catalog.
    async fn count_catalog_objects(&self, kind: Option<CatalogKind>) -> MetadataResult<i64>;
}

/// Exact great-circle filter over rows pre-selected by declination band.
pub(crate) fn rank_candidates(
    rows: Vec<CatalogObjectRow>,
    ra: f64,
    dec: f64,
    radius_degrees: f64,
    limit: Option<u32>,
) -> Vec<CatalogCandidate> {
    let mut candidates: Vec<CatalogCandidate> = rows
        .into_iter()
        .filter_map(|object| {
            let separation_degrees =
                skycat_core::angular_separation(ra, dec, object.ra_degrees, object.dec_degrees);
            (separation_degrees <= radius_degrees).then_some(CatalogCandidate {
                object,
                separation_degrees,
            })
        })
        .collect();
    candidates.sort_by(|a, b| a.separation_degrees.total_cmp(&b.separation_degrees));
    if let Some(limit) = limit {
        candidates.truncate(limit as usize);
    }
    candidates
}
