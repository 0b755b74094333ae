//! Upload step and durable submit tasks.

use super::hints::solve_hints;
use super::{TaskOutcome, Workflow, WorkflowResult, after};
use crate::admission::Admission;
use crate::metrics;
use skycat_core::AstrometryStatus;
use skycat_metadata::models::{ImageRow, TaskRow};
use skycat_metadata::repos::{ImageRepo, TaskKind, TaskRepo};
use std::path::Path;
use time::OffsetDateTime;

impl Workflow {
    /// Upload an admitted image and enqueue its monitor task.
    ///
    /// `previous` is the row as it was before admission. On any upload
    /// failure the image is moved to FAILED before the error is returned.
    pub(crate) async fn submit_now(&self, previous: &ImageRow) -> WorkflowResult<String> {
        let image_id = previous.image_id;
        let hints = solve_hints(previous);

        let uploaded = async {
            let session = self.solver.login().await?;
            self.solver
                .upload(&session, Path::new(&previous.file_path), &hints)
                .await
        }
        .await;

        let submission_id = match uploaded {
            Ok(id) => id,
            Err(e) => {
                tracing::warn!(image_id, error = %e, "Upload failed");
                if self
                    .metadata
                    .fail_in_flight(image_id, None, OffsetDateTime::now_utc())
                    .await?
                {
                    metrics::record_transition(AstrometryStatus::Failed);
                }
                return Err(e.into());
            }
        };

        let now = OffsetDateTime::now_utc();
        if !self
            .metadata
            .record_submission(image_id, &submission_id, now)
            .await?
        {
            tracing::warn!(image_id, submission_id, "Image left SUBMITTED before the submission id was recorded");
        }

        let monitor = TaskRow::queued(
            image_id,
            TaskKind::Monitor,
            Some(submission_id.clone()),
            false,
            now,
        );
        self.metadata.enqueue_task(&monitor).await?;

        tracing::info!(image_id, submission_id, task_id = %monitor.task_id, "Image submitted");
        Ok(submission_id)
    }

    /// One attempt of a deferred submission.
    pub(crate) async fn run_submit_task(&self, task: &TaskRow) -> WorkflowResult<TaskOutcome> {
        let image_id = task.image_id;
        let attempt = task.attempt.saturating_add(1);
        let provider = self.solver.provider();

        match self.admission.try_admit(image_id, provider, task.force).await? {
            Admission::Granted(previous) => match self.submit_now(&previous).await {
                Ok(_) => Ok(TaskOutcome::Done),
                Err(e) => {
                    let transient = matches!(&e, super::WorkflowError::Solver(s) if s.is_transient());
                    if transient && self.attempts_remaining(attempt) {
                        let delay = self.config.submit_backoff(attempt.unsigned_abs());
                        tracing::info!(
                            image_id,
                            attempt,
                            delay_secs = delay.as_secs(),
                            error = %e,
                            "Transient upload failure, retrying"
                        );
                        Ok(TaskOutcome::Retry {
                            run_after: after(delay),
                            attempt,
                            last_error: Some(e.to_string()),
                        })
                    } else {
                        Ok(TaskOutcome::Failed(e.to_string()))
                    }
                }
            },
            Admission::AlreadyStarted(row) => {
                tracing::debug!(image_id, status = %row.astrometry_status, "Deferred submission no longer needed");
                Ok(TaskOutcome::Done)
            }
            Admission::NotFound => Ok(TaskOutcome::Failed(format!("image {image_id} not found"))),
            // Denials do not count against the attempt budget.
            Admission::Denied {
                retry_after,
                reason,
            } => Ok(TaskOutcome::Retry {
                run_after: after(retry_after),
                attempt: task.attempt,
                last_error: Some(format!("admission denied: {}", reason.as_str())),
            }),
        }
    }

    fn attempts_remaining(&self, attempt: i32) -> bool {
        match self.config.submit_max_attempts {
            Some(max) => i64::from(attempt) < i64::from(max),
            None => true,
        }
    }
}
