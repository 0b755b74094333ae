//! A metadata store whose catalog queries fail for chosen catalogs.

use async_trait::async_trait;
use skycat_core::{CatalogKind, ProviderKind};
use skycat_metadata::models::{
    CatalogCandidate, CatalogObjectRow, ImageRow, MatchRow, NewImage, SolutionRecord, TaskRow,
};
use skycat_metadata::repos::{
    CatalogRepo, ImageRepo, LeaseRepo, MatchRepo, SubmissionReservation, TaskKind, TaskRepo,
    TaskState,
};
use skycat_metadata::{MetadataError, MetadataResult, MetadataStore};
use std::sync::Arc;
use time::{Duration, OffsetDateTime};
use uuid::Uuid;

/// Delegates to `inner`, except `find_within_radius` errors for `failing`.
#[allow(dead_code)]
pub struct FailingCatalogStore {
    inner: Arc<dyn MetadataStore>,
    failing: Vec<CatalogKind>,
}

#[allow(dead_code)]
impl FailingCatalogStore {
    pub fn new(inner: Arc<dyn MetadataStore>, failing: &[CatalogKind]) -> Self {
        Self {
            inner,
            failing: failing.to_vec(),
        }
    }
}

#[async_trait]
impl CatalogRepo for FailingCatalogStore {
    async fn upsert_catalog_object(&self, object: &CatalogObjectRow) -> MetadataResult<()> {
        self.inner.upsert_catalog_object(object).await
    }

    async fn find_within_radius(
        &self,
        kind: CatalogKind,
        ra: f64,
        dec: f64,
        radius_degrees: f64,
        limit: Option<u32>,
    ) -> MetadataResult<Vec<CatalogCandidate>> {
        if self.failing.contains(&kind) {
            return Err(MetadataError::Internal(format!(
                "{} catalog unavailable",
                kind.as_str()
            )));
        }
        self.inner
            .find_within_radius(kind, ra, dec, radius_degrees, limit)
            .await
    }

    async fn find_coordinates(
        &self,
        kind: CatalogKind,
        designation: &str,
    ) -> MetadataResult<Option<(f64, f64)>> {
        self.inner.find_coordinates(kind, designation).await
    }

    async fn count_catalog_objects(&self, kind: Option<CatalogKind>) -> MetadataResult<i64> {
        self.inner.count_catalog_objects(kind).await
    }
}

#[async_trait]
impl ImageRepo for FailingCatalogStore {
    async fn insert_image(&self, image: &NewImage) -> MetadataResult<i64> {
        self.inner.insert_image(image).await
    }

    async fn get_image(&self, image_id: i64) -> MetadataResult<Option<ImageRow>> {
        self.inner.get_image(image_id).await
    }

    async fn begin_submission(
        &self,
        image_id: i64,
        provider: ProviderKind,
        force: bool,
        now: OffsetDateTime,
    ) -> MetadataResult<SubmissionReservation> {
        self.inner
            .begin_submission(image_id, provider, force, now)
            .await
    }

    async fn record_submission(
        &self,
        image_id: i64,
        submission_id: &str,
        now: OffsetDateTime,
    ) -> MetadataResult<bool> {
        self.inner
            .record_submission(image_id, submission_id, now)
            .await
    }

    async fn record_job(
        &self,
        image_id: i64,
        submission_id: &str,
        job_id: &str,
        now: OffsetDateTime,
    ) -> MetadataResult<bool> {
        self.inner
            .record_job(image_id, submission_id, job_id, now)
            .await
    }

    async fn record_solution(
        &self,
        image_id: i64,
        solution: &SolutionRecord,
        now: OffsetDateTime,
    ) -> MetadataResult<bool> {
        self.inner.record_solution(image_id, solution, now).await
    }

    async fn set_wcs_header(
        &self,
        image_id: i64,
        wcs_header: &str,
        now: OffsetDateTime,
    ) -> MetadataResult<()> {
        self.inner.set_wcs_header(image_id, wcs_header, now).await
    }

    async fn fail_in_flight(
        &self,
        image_id: i64,
        submission_id: Option<&str>,
        now: OffsetDateTime,
    ) -> MetadataResult<bool> {
        self.inner.fail_in_flight(image_id, submission_id, now).await
    }

    async fn touch_image(
        &self,
        image_id: i64,
        submission_id: &str,
        now: OffsetDateTime,
    ) -> MetadataResult<bool> {
        self.inner.touch_image(image_id, submission_id, now).await
    }

    async fn count_in_flight(&self) -> MetadataResult<i64> {
        self.inner.count_in_flight().await
    }

    async fn list_images_by_path_prefix(&self, prefix: &str) -> MetadataResult<Vec<ImageRow>> {
        self.inner.list_images_by_path_prefix(prefix).await
    }

    async fn reap_stale(
        &self,
        cutoff: OffsetDateTime,
        now: OffsetDateTime,
    ) -> MetadataResult<Vec<i64>> {
        self.inner.reap_stale(cutoff, now).await
    }
}

#[async_trait]
impl MatchRepo for FailingCatalogStore {
    async fn replace_automatic_matches(
        &self,
        image_id: i64,
        matches: &[MatchRow],
    ) -> MetadataResult<u64> {
        self.inner.replace_automatic_matches(image_id, matches).await
    }

    async fn insert_match(&self, record: &MatchRow) -> MetadataResult<bool> {
        self.inner.insert_match(record).await
    }

    async fn list_matches(&self, image_id: i64) -> MetadataResult<Vec<MatchRow>> {
        self.inner.list_matches(image_id).await
    }
}

#[async_trait]
impl TaskRepo for FailingCatalogStore {
    async fn enqueue_task(&self, task: &TaskRow) -> MetadataResult<()> {
        self.inner.enqueue_task(task).await
    }

    async fn claim_due_task(&self, now: OffsetDateTime) -> MetadataResult<Option<TaskRow>> {
        self.inner.claim_due_task(now).await
    }

    async fn reschedule_task(
        &self,
        task_id: Uuid,
        run_after: OffsetDateTime,
        attempt: i32,
        last_error: Option<&str>,
    ) -> MetadataResult<()> {
        self.inner
            .reschedule_task(task_id, run_after, attempt, last_error)
            .await
    }

    async fn complete_task(
        &self,
        task_id: Uuid,
        state: TaskState,
        last_error: Option<&str>,
    ) -> MetadataResult<()> {
        self.inner.complete_task(task_id, state, last_error).await
    }

    async fn get_task(&self, task_id: Uuid) -> MetadataResult<Option<TaskRow>> {
        self.inner.get_task(task_id).await
    }

    async fn list_tasks_for_image(&self, image_id: i64) -> MetadataResult<Vec<TaskRow>> {
        self.inner.list_tasks_for_image(image_id).await
    }

    async fn has_pending_task(&self, image_id: i64, kind: TaskKind) -> MetadataResult<bool> {
        self.inner.has_pending_task(image_id, kind).await
    }

    async fn recover_orphaned_tasks(&self, now: OffsetDateTime) -> MetadataResult<u64> {
        self.inner.recover_orphaned_tasks(now).await
    }
}

#[async_trait]
impl LeaseRepo for FailingCatalogStore {
    async fn try_acquire_lease(
        &self,
        name: &str,
        holder: &str,
        ttl: Duration,
        now: OffsetDateTime,
    ) -> MetadataResult<bool> {
        self.inner.try_acquire_lease(name, holder, ttl, now).await
    }

    async fn release_lease(&self, name: &str, holder: &str) -> MetadataResult<()> {
        self.inner.release_lease(name, holder).await
    }
}

#[async_trait]
impl MetadataStore for FailingCatalogStore {
    async fn migrate(&self) -> MetadataResult<()> {
        self.inner.migrate().await
    }

    async fn health_check(&self) -> MetadataResult<()> {
        self.inner.health_check().await
    }
}
