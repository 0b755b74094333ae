//! Catalog matching for plate-solved images.
//!
//! Each catalog is queried around the solved center, candidates are checked
//! against the image's true pixel footprint through its WCS, and the result
//! replaces the image's automatic matches in one transaction.

use crate::metrics;
use serde::Serialize;
use skycat_core::config::MatchingConfig;
use skycat_core::{CatalogKind, HeaderCards, MatchSource, Wcs};
use skycat_metadata::models::{CatalogCandidate, ImageRow, MatchRow};
use skycat_metadata::repos::{CatalogRepo, ImageRepo, MatchRepo};
use skycat_metadata::{MetadataError, MetadataStore};
use std::collections::HashSet;
use std::sync::Arc;
use time::OffsetDateTime;

/// Matching errors.
#[derive(Debug, thiserror::Error)]
pub enum MatchError {
    #[error("image {0} not found")]
    ImageNotFound(i64),

    #[error("every catalog query failed for image {0}")]
    AllCatalogsFailed(i64),

    #[error("metadata error: {0}")]
    Metadata(#[from] MetadataError),
}

/// Outcome of matching one image.
#[derive(Clone, Debug, Default, Serialize)]
pub struct MatchReport {
    pub image_id: i64,
    /// Automatic matches written.
    pub inserted: u64,
    /// Candidates surviving the bounds check, before deduplication.
    pub candidates: usize,
    pub failed_catalogs: Vec<CatalogKind>,
    /// No WCS could be built, so every radius candidate was accepted.
    pub degraded: bool,
}

/// Matches solved images against the reference catalogs.
pub struct CatalogMatcher {
    metadata: Arc<dyn MetadataStore>,
    config: MatchingConfig,
}

impl CatalogMatcher {
    pub fn new(metadata: Arc<dyn MetadataStore>, config: MatchingConfig) -> Self {
        Self { metadata, config }
    }

    /// Recompute the automatic matches of an image.
    ///
    /// Images that are not plate-solved, or have no center, are left alone
    /// and produce an empty report.
    pub async fn match_image(&self, image_id: i64) -> Result<MatchReport, MatchError> {
        let timer = metrics::MATCH_DURATION.start_timer();
        let image = self
            .metadata
            .get_image(image_id)
            .await?
            .ok_or(MatchError::ImageNotFound(image_id))?;

        let mut report = MatchReport {
            image_id,
            ..MatchReport::default()
        };
        let summary = image.summary();
        let Some((ra, dec)) = summary.center().filter(|_| image.is_solved()) else {
            tracing::debug!(image_id, "Image not plate-solved, skipping catalog match");
            timer.stop_and_discard();
            return Ok(report);
        };
        let radius = image
            .field_radius_degrees
            .unwrap_or(self.config.default_radius_degrees);

        let mut candidates: Vec<(CatalogKind, CatalogCandidate)> = Vec::new();
        for kind in CatalogKind::ALL {
            match self
                .metadata
                .find_within_radius(kind, ra, dec, radius, self.config.limit_for(kind))
                .await
            {
                Ok(found) => candidates.extend(found.into_iter().map(|c| (kind, c))),
                Err(e) => {
                    tracing::warn!(image_id, catalog = kind.as_str(), error = %e, "Catalog query failed");
                    metrics::CATALOG_QUERY_FAILURES
                        .with_label_values(&[kind.as_str()])
                        .inc();
                    report.failed_catalogs.push(kind);
                }
            }
        }
        if report.failed_catalogs.len() == CatalogKind::ALL.len() {
            return Err(MatchError::AllCatalogsFailed(image_id));
        }

        let footprint = self.footprint(&image);
        report.degraded = footprint.is_none();

        let mut seen = HashSet::new();
        let mut rows = Vec::new();
        let now = OffsetDateTime::now_utc();
        for (kind, candidate) in candidates {
            let designation = candidate.object.designation.clone();
            if let Some(footprint) = &footprint
                && !self.in_field(footprint, kind, &designation, image_id).await
            {
                continue;
            }
            report.candidates += 1;

            if !seen.insert((kind, designation.clone())) {
                continue;
            }
            let separation = candidate.separation_degrees;
            rows.push(MatchRow {
                image_id,
                catalog_kind: kind.as_str().to_string(),
                designation,
                angular_separation_degrees: Some(separation),
                confidence_score: Some(self.confidence(separation)),
                match_source: MatchSource::Automatic.as_str().to_string(),
                is_in_field: true,
                created_at: now,
            });
        }

        report.inserted = self
            .metadata
            .replace_automatic_matches(image_id, &rows)
            .await?;
        metrics::MATCHES_WRITTEN.inc_by(report.inserted);
        timer.observe_duration();

        tracing::info!(
            image_id,
            inserted = report.inserted,
            candidates = report.candidates,
            degraded = report.degraded,
            failed_catalogs = report.failed_catalogs.len(),
            "Catalog match complete"
        );
        Ok(report)
    }

    /// `max(0, 1 - separation / normalization)`.
    pub fn confidence(&self, separation_degrees: f64) -> f64 {
        (1.0 - separation_degrees / self.config.confidence_normalization_deg).max(0.0)
    }

    fn footprint(&self, image: &ImageRow) -> Option<Footprint> {
        // An unreadable column is skipped so the other sources still build a WCS
        let distortion = decode_or_log(image.image_id, "wcs_header", image.wcs_cards());
        let raw = decode_or_log(image.image_id, "raw_header", image.raw_cards());
        let summary = image.summary();

        let wcs = match Wcs::for_image(&summary, distortion.as_ref(), raw.as_ref()) {
            Ok(wcs) => wcs,
            Err(e) => {
                tracing::warn!(image_id = image.image_id, error = %e, "No usable WCS, accepting all radius candidates");
                return None;
            }
        };

        let size = summary
            .width_pixels
            .zip(summary.height_pixels)
            .map(|(w, h)| (f64::from(w), f64::from(h)))
            .or_else(|| header_size(distortion.as_ref()?));
        let Some((width, height)) = size else {
            tracing::warn!(image_id = image.image_id, "Image dimensions unknown, accepting all radius candidates");
            return None;
        };

        let (crval1, crval2) = wcs.reference();
        tracing::debug!(
            image_id = image.image_id,
            crval1,
            crval2,
            scale_arcsec = wcs.pixel_scale_arcsec(),
            sip = wcs.has_distortion(),
            width,
            height,
            "Built image footprint"
        );

        Some(Footprint { wcs, width, height })
    }

    async fn in_field(
        &self,
        footprint: &Footprint,
        kind: CatalogKind,
        designation: &str,
        image_id: i64,
    ) -> bool {
        let coordinates = match self.metadata.find_coordinates(kind, designation).await {
            Ok(Some(coordinates)) => coordinates,
            Ok(None) => {
                tracing::debug!(image_id, catalog = kind.as_str(), designation, "No coordinates for candidate");
                return false;
            }
            Err(e) => {
                tracing::warn!(image_id, catalog = kind.as_str(), designation, error = %e, "Coordinate lookup failed");
                return false;
            }
        };

        match footprint.wcs.contains(
            coordinates.0,
            coordinates.1,
            footprint.width,
            footprint.height,
            self.config.bounds_margin_px,
        ) {
            Ok(inside) => inside,
            Err(e) => {
                tracing::debug!(image_id, designation, error = %e, "Candidate not projectable");
                false
            }
        }
    }
}

struct Footprint {
    wcs: Wcs,
    width: f64,
    height: f64,
}

/// Stored header cards, or `None` when the column is empty or unreadable.
fn decode_or_log(
    image_id: i64,
    column: &str,
    decoded: Result<Option<HeaderCards>, MetadataError>,
) -> Option<HeaderCards> {
    match decoded {
        Ok(cards) => cards,
        Err(e) => {
            tracing::warn!(image_id, column, error = %e, "Stored header is not valid JSON");
            None
        }
    }
}

fn header_size(cards: &HeaderCards) -> Option<(f64, f64)> {
    let width = cards.get_f64("IMAGEW").or_else(|| cards.get_f64("NAXIS1"))?;
    let height = cards.get_f64("IMAGEH").or_else(|| cards.get_f64("NAXIS2"))?;
    (width > 0.0 && height > 0.0).then_some((width, height))
}
