//! Monitor tasks: one solver poll per execution.

use super::{TaskOutcome, Workflow, WorkflowResult, after};
use crate::metrics;
use skycat_core::AstrometryStatus;
use skycat_metadata::models::TaskRow;
use skycat_metadata::repos::ImageRepo;
use skycat_solver::{JobStatus, SolverResult};
use time::OffsetDateTime;

/// Result of asking the solver about a submission.
enum Poll {
    Pending,
    Solved(String),
    Failed(String),
}

impl Workflow {
    /// Execute one poll step for a monitored submission.
    ///
    /// The task ends when the image leaves flight under this submission,
    /// the job settles, or the poll budget runs out.
    pub(crate) async fn run_monitor_task(&self, task: &TaskRow) -> WorkflowResult<TaskOutcome> {
        let image_id = task.image_id;
        let Some(submission_id) = task.submission_id.as_deref() else {
            return Ok(TaskOutcome::Failed("monitor task without submission id".to_string()));
        };

        let Some(image) = self.metadata.get_image(image_id).await? else {
            tracing::info!(image_id, "Image deleted, stopping monitor");
            return Ok(TaskOutcome::Done);
        };
        let in_flight = image.status().map(|s| s.is_in_flight()).unwrap_or(false);
        if !in_flight || image.submission_id.as_deref() != Some(submission_id) {
            tracing::info!(
                image_id,
                submission_id,
                status = %image.astrometry_status,
                "Submission superseded, stopping monitor"
            );
            return Ok(TaskOutcome::Done);
        }

        let now = OffsetDateTime::now_utc();
        if !self.metadata.touch_image(image_id, submission_id, now).await? {
            return Ok(TaskOutcome::Done);
        }
        metrics::MONITOR_POLLS.inc();

        let attempt = task.attempt.saturating_add(1);
        let poll = self.poll(image_id, submission_id, image.job_id).await;

        match poll {
            Ok(Poll::Solved(job_id)) => {
                self.finalize(image_id, submission_id, &job_id).await?;
                Ok(TaskOutcome::Done)
            }
            Ok(Poll::Failed(job_id)) => {
                tracing::warn!(image_id, submission_id, job_id, "Solver job failed");
                self.fail_submission(image_id, submission_id).await?;
                Ok(TaskOutcome::Done)
            }
            Ok(Poll::Pending) => self.next_poll(task, attempt, None).await,
            Err(e) => {
                tracing::warn!(image_id, submission_id, attempt, error = %e, "Solver status query failed");
                self.next_poll(task, attempt, Some(e.to_string())).await
            }
        }
    }

    async fn poll(
        &self,
        image_id: i64,
        submission_id: &str,
        known_job: Option<String>,
    ) -> SolverResult<Poll> {
        let job_id = match known_job {
            Some(job_id) => job_id,
            None => {
                let status = self.solver.submission_status(submission_id).await?;
                let Some(job_id) = status.first_job() else {
                    tracing::debug!(image_id, submission_id, "No job assigned yet");
                    return Ok(Poll::Pending);
                };
                match self
                    .metadata
                    .record_job(image_id, submission_id, &job_id, OffsetDateTime::now_utc())
                    .await
                {
                    Ok(true) => {
                        tracing::info!(image_id, submission_id, job_id, "Job assigned");
                        metrics::record_transition(AstrometryStatus::Processing);
                    }
                    Ok(false) => {
                        tracing::debug!(image_id, submission_id, job_id, "Job already recorded")
                    }
                    Err(e) => {
                        tracing::warn!(image_id, job_id, error = %e, "Failed to record job id");
                        return Ok(Poll::Pending);
                    }
                }
                job_id
            }
        };

        Ok(match self.solver.job_status(&job_id).await? {
            JobStatus::Success => Poll::Solved(job_id),
            JobStatus::Failure => Poll::Failed(job_id),
            JobStatus::Other(state) => {
                tracing::debug!(image_id, job_id, state, "Job still running");
                Poll::Pending
            }
        })
    }

    async fn next_poll(
        &self,
        task: &TaskRow,
        attempt: i32,
        last_error: Option<String>,
    ) -> WorkflowResult<TaskOutcome> {
        let max = i64::from(self.config.max_poll_attempts);
        if i64::from(attempt) >= max {
            let submission_id = task.submission_id.as_deref().unwrap_or_default();
            tracing::warn!(
                image_id = task.image_id,
                submission_id,
                attempts = attempt,
                "Solver did not finish in time"
            );
            self.fail_submission(task.image_id, submission_id).await?;
            return Ok(TaskOutcome::Failed(format!(
                "timed out after {attempt} polls"
            )));
        }
        Ok(TaskOutcome::Retry {
            run_after: after(self.config.poll_interval()),
            attempt,
            last_error,
        })
    }

    pub(crate) async fn fail_submission(
        &self,
        image_id: i64,
        submission_id: &str,
    ) -> WorkflowResult<()> {
        if self
            .metadata
            .fail_in_flight(image_id, Some(submission_id), OffsetDateTime::now_utc())
            .await?
        {
            metrics::record_transition(AstrometryStatus::Failed);
        }
        Ok(())
    }
}
