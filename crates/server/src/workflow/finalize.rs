//! Finalizing solved jobs: calibration, matching and solver artifacts.

use super::{Workflow, WorkflowError, WorkflowResult};
use crate::metrics;
use skycat_core::{AstrometryStatus, HeaderCards};
use skycat_metadata::models::SolutionRecord;
use skycat_metadata::repos::ImageRepo;
use std::path::PathBuf;
use time::OffsetDateTime;

impl Workflow {
    /// Record a successful job and run everything downstream of it.
    ///
    /// Only the calibration is required. Matching, the preview and the
    /// distortion solution are best effort and only logged on failure.
    pub(crate) async fn finalize(
        &self,
        image_id: i64,
        submission_id: &str,
        job_id: &str,
    ) -> WorkflowResult<()> {
        let calibration = match self.solver.calibration(job_id).await {
            Ok(calibration) => calibration,
            Err(e) => {
                tracing::error!(image_id, job_id, error = %e, "Failed to fetch calibration");
                self.fail_submission(image_id, submission_id).await?;
                return Err(e.into());
            }
        };

        let solution = SolutionRecord {
            job_id: job_id.to_string(),
            ra_center_degrees: calibration.ra,
            dec_center_degrees: calibration.dec,
            field_radius_degrees: calibration.radius,
            pixel_scale_arcsec: calibration.pixscale,
            rotation_degrees: calibration.rotation_degrees(),
            parity: calibration.parity_sign(),
            astrometry_url: self.solver.status_page_url(submission_id),
        };
        let recorded = match self
            .metadata
            .record_solution(image_id, &solution, OffsetDateTime::now_utc())
            .await
        {
            Ok(recorded) => recorded,
            Err(e) => {
                tracing::error!(image_id, job_id, error = %e, "Failed to record solution");
                self.fail_submission(image_id, submission_id).await?;
                return Err(e.into());
            }
        };
        if !recorded {
            tracing::info!(image_id, job_id, "Image left flight before the solution landed");
            return Ok(());
        }
        metrics::record_transition(AstrometryStatus::Solved);
        tracing::info!(
            image_id,
            job_id,
            ra = calibration.ra,
            dec = calibration.dec,
            radius = calibration.radius,
            "Plate solve complete"
        );

        if let Err(e) = self.matcher.match_image(image_id).await {
            tracing::warn!(image_id, error = %e, "Catalog match after solve failed");
        }

        if let Err(e) = self.save_preview(image_id, job_id).await {
            tracing::warn!(image_id, job_id, error = %e, "Annotated preview unavailable");
        }

        match self.store_distortion(image_id, job_id).await {
            Ok(()) => {
                // The distortion terms tighten the footprint.
                if let Err(e) = self.matcher.match_image(image_id).await {
                    tracing::warn!(image_id, error = %e, "Re-match with distortion solution failed");
                }
            }
            Err(e) => tracing::warn!(image_id, job_id, error = %e, "Distortion solution unavailable"),
        }
        Ok(())
    }

    /// Download the annotated preview of a solved image on demand.
    pub async fn fetch_annotation(&self, image_id: i64) -> WorkflowResult<PathBuf> {
        let image = self
            .metadata
            .get_image(image_id)
            .await?
            .ok_or(WorkflowError::ImageNotFound(image_id))?;
        let job_id = image.job_id.ok_or(WorkflowError::NoJob(image_id))?;
        self.save_preview(image_id, &job_id).await
    }

    async fn save_preview(&self, image_id: i64, job_id: &str) -> WorkflowResult<PathBuf> {
        let bytes = self.solver.annotated_preview(job_id).await?;
        tokio::fs::create_dir_all(&self.config.preview_dir).await?;
        let path = self
            .config
            .preview_dir
            .join(format!("annotated_{image_id}.jpg"));
        tokio::fs::write(&path, &bytes).await?;
        tracing::info!(image_id, path = %path.display(), bytes = bytes.len(), "Annotated preview saved");
        Ok(path)
    }

    async fn store_distortion(&self, image_id: i64, job_id: &str) -> WorkflowResult<()> {
        let fits = self.solver.distortion_header(job_id).await?;
        let cards = HeaderCards::parse_fits(&fits)?;
        let json = cards.to_json_string()?;
        self.metadata
            .set_wcs_header(image_id, &json, OffsetDateTime::now_utc())
            .await?;
        tracing::debug!(image_id, cards = cards.len(), "Distortion solution stored");
        Ok(())
    }
}
