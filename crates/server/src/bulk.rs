//! Bulk solve and match over a file path prefix.

use crate::matcher::CatalogMatcher;
use crate::workflow::{Workflow, WorkflowResult};
use serde::Serialize;
use skycat_core::AstrometryStatus;
use skycat_core::astrometry::PLATE_SOLVE_SOURCE_SOLVER;
use skycat_metadata::models::ImageRow;
use skycat_metadata::repos::ImageRepo;
use skycat_metadata::{MetadataResult, MetadataStore};
use time::OffsetDateTime;

/// Subtype never sent to the solver.
pub const PLANETARY_SUBTYPE: &str = "PLANETARY";

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize)]
pub struct BulkMatchReport {
    pub total: usize,
    pub processed: usize,
    pub skipped: usize,
    pub errors: usize,
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize)]
pub struct BulkSolveReport {
    pub total: usize,
    pub queued: usize,
    pub skipped: usize,
}

/// Re-match every plate-solved image under `prefix`.
pub async fn bulk_match(
    metadata: &dyn MetadataStore,
    matcher: &CatalogMatcher,
    prefix: &str,
) -> MetadataResult<BulkMatchReport> {
    let images = metadata.list_images_by_path_prefix(prefix).await?;
    let mut report = BulkMatchReport {
        total: images.len(),
        ..BulkMatchReport::default()
    };

    for image in images {
        if !image.is_solved() {
            report.skipped += 1;
            continue;
        }
        match matcher.match_image(image.image_id).await {
            Ok(_) => report.processed += 1,
            Err(e) => {
                tracing::warn!(image_id = image.image_id, error = %e, "Bulk match failed for image");
                report.errors += 1;
            }
        }
    }

    tracing::info!(
        prefix,
        total = report.total,
        processed = report.processed,
        skipped = report.skipped,
        errors = report.errors,
        "Bulk match complete"
    );
    Ok(report)
}

/// Queue a submit task for every eligible image under `prefix`.
///
/// Images that carry a solution from their own header are queued first so
/// the solver confirms them before unsolved ones are attempted.
pub async fn bulk_solve(
    metadata: &dyn MetadataStore,
    workflow: &Workflow,
    prefix: &str,
    force: bool,
) -> WorkflowResult<BulkSolveReport> {
    let images = metadata.list_images_by_path_prefix(prefix).await?;
    let mut report = BulkSolveReport {
        total: images.len(),
        ..BulkSolveReport::default()
    };

    let (priority, rest): (Vec<ImageRow>, Vec<ImageRow>) =
        images.into_iter().partition(imported_solution);

    let mut selected = Vec::new();
    for image in priority.into_iter().chain(rest) {
        if select(&image, force) {
            selected.push(image.image_id);
        } else {
            report.skipped += 1;
        }
    }

    let now = OffsetDateTime::now_utc();
    for image_id in selected {
        match workflow.enqueue_submit(image_id, force, now).await? {
            Some(_) => report.queued += 1,
            None => report.skipped += 1,
        }
    }

    tracing::info!(
        prefix,
        force,
        total = report.total,
        queued = report.queued,
        skipped = report.skipped,
        "Bulk solve queued"
    );
    Ok(report)
}

fn imported_solution(image: &ImageRow) -> bool {
    image.is_plate_solved && image.plate_solve_source.as_deref() != Some(PLATE_SOLVE_SOURCE_SOLVER)
}

fn select(image: &ImageRow, force: bool) -> bool {
    if image.subtype.as_deref() == Some(PLANETARY_SUBTYPE) {
        return false;
    }
    let Ok(status) = image.status() else {
        tracing::warn!(image_id = image.image_id, status = %image.astrometry_status, "Unknown astrometry status, skipping");
        return false;
    };
    // A running submission cannot be restarted, forced or not
    if status.is_in_flight() {
        return false;
    }
    if force || imported_solution(image) {
        return true;
    }
    match status {
        AstrometryStatus::Failed => true,
        AstrometryStatus::None => !image.is_plate_solved,
        _ => false,
    }
}
