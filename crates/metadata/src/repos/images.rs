//! Image astrometry repository.

use crate::error::MetadataResult;
use crate::models::{ImageRow, NewImage, SolutionRecord};
use async_trait::async_trait;
use skycat_core::ProviderKind;
use time::OffsetDateTime;

/// Outcome of reserving an image for a new submission.
#[derive(Debug, Clone)]
pub enum SubmissionReservation {
    /// The image moved to SUBMITTED. Carries the row as it was before.
    Reserved(ImageRow),
    /// Another submission is in flight, or the image is solved and the
    /// caller did not force a re-solve. Carries the current row.
    AlreadyStarted(ImageRow),
    /// No image with this id.
    NotFound,
}

/// Repository for image records and their astrometry state.
///
/// Every state change is a single conditional statement so that concurrent
/// workers never overwrite each other's transitions.
#[async_trait]
pub trait ImageRepo: Send + Sync {
    /// Index a new image. Returns the assigned id.
    async fn insert_image(&self, image: &NewImage) -> MetadataResult<i64>;

    /// Get an image by id.
    async fn get_image(&self, image_id: i64) -> MetadataResult<Option<ImageRow>>;

    /// Compare-and-set the image into SUBMITTED for `provider`.
    ///
    /// Allowed from NONE or FAILED, and from SOLVED when `force` is set.
    /// Clears the previous submission and job ids.
    async fn begin_submission(
        &self,
        image_id: i64,
        provider: ProviderKind,
        force: bool,
        now: OffsetDateTime,
    ) -> MetadataResult<SubmissionReservation>;

    /// Record the solver's submission id. Status stays SUBMITTED.
    /// Returns false if the image is no longer SUBMITTED.
    async fn record_submission(
        &self,
        image_id: i64,
        submission_id: &str,
        now: OffsetDateTime,
    ) -> MetadataResult<bool>;

    /// Record the first job id and move SUBMITTED -> PROCESSING.
    /// Returns false if the image is not in flight with `submission_id`.
    async fn record_job(
        &self,
        image_id: i64,
        submission_id: &str,
        job_id: &str,
        now: OffsetDateTime,
    ) -> MetadataResult<bool>;

    /// Write a successful calibration and move the image to SOLVED.
    /// Only applies while the image is in flight with `solution.job_id`.
    async fn record_solution(
        &self,
        image_id: i64,
        solution: &SolutionRecord,
        now: OffsetDateTime,
    ) -> MetadataResult<bool>;

    /// Store the distortion solution (JSON header cards).
    async fn set_wcs_header(
        &self,
        image_id: i64,
        wcs_header: &str,
        now: OffsetDateTime,
    ) -> MetadataResult<()>;

    /// Move an in-flight image to FAILED. With `submission_id`, only if the
    /// image still belongs to that submission.
    async fn fail_in_flight(
        &self,
        image_id: i64,
        submission_id: Option<&str>,
        now: OffsetDateTime,
    ) -> MetadataResult<bool>;

    /// Heartbeat an in-flight image. Returns false if the image is no longer
    /// in flight with `submission_id`.
    async fn touch_image(
        &self,
        image_id: i64,
        submission_id: &str,
        now: OffsetDateTime,
    ) -> MetadataResult<bool>;

    /// Count images in SUBMITTED or PROCESSING.
    async fn count_in_flight(&self) -> MetadataResult<i64>;

    /// List images whose file path starts with `prefix`, ordered by id.
    async fn list_images_by_path_prefix(&self, prefix: &str) -> MetadataResult<Vec<ImageRow>>;

    /// Fail in-flight images not updated since `cutoff`. Returns their ids.
    async fn reap_stale(
        &self,
        cutoff: OffsetDateTime,
        now: OffsetDateTime,
    ) -> MetadataResult<Vec<i64>>;
}
