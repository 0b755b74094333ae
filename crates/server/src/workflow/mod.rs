//! Plate-solve workflow.
//!
//! `NONE -> SUBMITTED -> PROCESSING -> {SOLVED | FAILED}`. A solve is admitted
//! and uploaded, then driven by durable monitor tasks that each perform one
//! poll step and re-enqueue themselves until the job settles.

pub mod finalize;
pub mod hints;
pub mod monitor;
pub mod submit;

use crate::admission::{Admission, AdmissionGate};
use crate::matcher::{CatalogMatcher, MatchError};
use crate::metrics;
use serde::Serialize;
use skycat_core::config::WorkflowConfig;
use skycat_metadata::models::TaskRow;
use skycat_metadata::repos::{TaskKind, TaskRepo};
use skycat_metadata::{MetadataError, MetadataStore};
use skycat_solver::{PlateSolver, SolverError};
use std::sync::Arc;
use std::time::Duration;
use time::OffsetDateTime;
use uuid::Uuid;

/// Workflow errors.
#[derive(Debug, thiserror::Error)]
pub enum WorkflowError {
    #[error("image {0} not found")]
    ImageNotFound(i64),

    #[error("image {0} has no solver job")]
    NoJob(i64),

    #[error("solver error: {0}")]
    Solver(#[from] SolverError),

    #[error("metadata error: {0}")]
    Metadata(#[from] MetadataError),

    #[error("match error: {0}")]
    Match(#[from] MatchError),

    #[error("invalid solver output: {0}")]
    Core(#[from] skycat_core::Error),

    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),
}

pub type WorkflowResult<T> = std::result::Result<T, WorkflowError>;

/// Outcome of `request_solve`.
#[derive(Clone, Debug, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum SolveRequestOutcome {
    /// Uploaded; a monitor task now follows the submission.
    Submitted { submission_id: String },
    /// Admission denied; a submit task will retry after `retry_after_secs`.
    Queued {
        retry_after_secs: u64,
        task_id: Option<Uuid>,
    },
    /// A submission is already running, or the image is solved.
    AlreadyStarted {
        status: String,
        submission_id: Option<String>,
    },
}

impl SolveRequestOutcome {
    fn label(&self) -> &'static str {
        match self {
            Self::Submitted { .. } => "submitted",
            Self::Queued { .. } => "queued",
            Self::AlreadyStarted { .. } => "already_started",
        }
    }
}

/// What the worker records for a task after one step.
#[derive(Clone, Debug, PartialEq)]
pub enum TaskOutcome {
    Done,
    Failed(String),
    Retry {
        run_after: OffsetDateTime,
        attempt: i32,
        last_error: Option<String>,
    },
}

/// `now + delay`, saturating on absurd delays.
pub(crate) fn after(delay: Duration) -> OffsetDateTime {
    let delay = time::Duration::try_from(delay).unwrap_or(time::Duration::MAX);
    OffsetDateTime::now_utc().saturating_add(delay)
}

/// Drives images through the solver.
pub struct Workflow {
    pub(crate) metadata: Arc<dyn MetadataStore>,
    pub(crate) solver: Arc<dyn PlateSolver>,
    pub(crate) admission: Arc<AdmissionGate>,
    pub(crate) matcher: Arc<CatalogMatcher>,
    pub(crate) config: WorkflowConfig,
}

impl Workflow {
    pub fn new(
        metadata: Arc<dyn MetadataStore>,
        solver: Arc<dyn PlateSolver>,
        admission: Arc<AdmissionGate>,
        matcher: Arc<CatalogMatcher>,
        config: WorkflowConfig,
    ) -> Self {
        Self {
            metadata,
            solver,
            admission,
            matcher,
            config,
        }
    }

    pub fn config(&self) -> &WorkflowConfig {
        &self.config
    }

    /// Request a plate solve for an image.
    ///
    /// Admitted requests are uploaded synchronously. Denied ones become a
    /// durable submit task scheduled after the gate's retry delay.
    pub async fn request_solve(
        &self,
        image_id: i64,
        force: bool,
    ) -> WorkflowResult<SolveRequestOutcome> {
        let result = self.request_solve_inner(image_id, force).await;
        let label = match &result {
            Ok(outcome) => outcome.label(),
            Err(_) => "error",
        };
        metrics::SOLVE_REQUESTS.with_label_values(&[label]).inc();
        result
    }

    async fn request_solve_inner(
        &self,
        image_id: i64,
        force: bool,
    ) -> WorkflowResult<SolveRequestOutcome> {
        let provider = self.solver.provider();
        match self.admission.try_admit(image_id, provider, force).await? {
            Admission::Granted(previous) => {
                let submission_id = self.submit_now(&previous).await?;
                Ok(SolveRequestOutcome::Submitted { submission_id })
            }
            Admission::AlreadyStarted(row) => {
                tracing::info!(image_id, status = %row.astrometry_status, "Solve already started or done");
                Ok(SolveRequestOutcome::AlreadyStarted {
                    status: row.astrometry_status,
                    submission_id: row.submission_id,
                })
            }
            Admission::NotFound => Err(WorkflowError::ImageNotFound(image_id)),
            Admission::Denied {
                retry_after,
                reason,
            } => {
                let task_id = self
                    .enqueue_submit(image_id, force, after(retry_after))
                    .await?;
                tracing::info!(
                    image_id,
                    reason = reason.as_str(),
                    retry_after_secs = retry_after.as_secs(),
                    "Solve deferred"
                );
                Ok(SolveRequestOutcome::Queued {
                    retry_after_secs: retry_after.as_secs(),
                    task_id,
                })
            }
        }
    }

    /// Enqueue a submit task unless one is already pending for the image.
    pub async fn enqueue_submit(
        &self,
        image_id: i64,
        force: bool,
        run_after: OffsetDateTime,
    ) -> WorkflowResult<Option<Uuid>> {
        if self
            .metadata
            .has_pending_task(image_id, TaskKind::Submit)
            .await?
        {
            tracing::debug!(image_id, "Submit task already pending");
            return Ok(None);
        }
        let task = TaskRow::queued(image_id, TaskKind::Submit, None, force, run_after);
        self.metadata.enqueue_task(&task).await?;
        Ok(Some(task.task_id))
    }

    /// Execute one step of a claimed task.
    pub async fn execute(&self, task: &TaskRow) -> TaskOutcome {
        let result = match TaskKind::parse(&task.kind) {
            Some(TaskKind::Submit) => self.run_submit_task(task).await,
            Some(TaskKind::Monitor) => self.run_monitor_task(task).await,
            None => Ok(TaskOutcome::Failed(format!("unknown task kind {}", task.kind))),
        };
        result.unwrap_or_else(|e| {
            tracing::error!(
                task_id = %task.task_id,
                image_id = task.image_id,
                kind = %task.kind,
                error = %e,
                "Task step failed"
            );
            TaskOutcome::Failed(e.to_string())
        })
    }
}
