//! Durable workflow task repository.

use crate::error::MetadataResult;
use crate::models::TaskRow;
use async_trait::async_trait;
use time::OffsetDateTime;
use uuid::Uuid;

/// Repository for durable workflow tasks.
#[async_trait]
pub trait TaskRepo: Send + Sync {
    /// Persist a new task.
    async fn enqueue_task(&self, task: &TaskRow) -> MetadataResult<()>;

    /// Atomically claim the oldest queued task due at `now`, moving it to
    /// running. Concurrent callers never claim the same task.
    async fn claim_due_task(&self, now: OffsetDateTime) -> MetadataResult<Option<TaskRow>>;

    /// Put a running task back in the queue.
    async fn reschedule_task(
        &self,
        task_id: Uuid,
        run_after: OffsetDateTime,
        attempt: i32,
        last_error: Option<&str>,
    ) -> MetadataResult<()>;

    /// Finish a task as done or failed.
    async fn complete_task(
        &self,
        task_id: Uuid,
        state: TaskState,
        last_error: Option<&str>,
    ) -> MetadataResult<()>;

    /// Get a task by id.
    async fn get_task(&self, task_id: Uuid) -> MetadataResult<Option<TaskRow>>;

    /// All tasks of an image, oldest first.
    async fn list_tasks_for_image(&self, image_id: i64) -> MetadataResult<Vec<TaskRow>>;

    /// Whether the image has a queued or running task of `kind`.
    async fn has_pending_task(&self, image_id: i64, kind: TaskKind) -> MetadataResult<bool>;

    /// Re-queue tasks left running by a process that stopped.
    /// Returns the number of tasks recovered.
    async fn recover_orphaned_tasks(&self, now: OffsetDateTime) -> MetadataResult<u64>;
}

/// Task kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskKind {
    /// Admit, log in and upload an image.
    Submit,
    /// Poll the solver once for an in-flight submission.
    Monitor,
}

impl TaskKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Submit => "submit",
            Self::Monitor => "monitor",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "submit" => Some(Self::Submit),
            "monitor" => Some(Self::Monitor),
            _ => None,
        }
    }
}

/// Task state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskState {
    Queued,
    Running,
    Done,
    Failed,
}

impl TaskState {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Queued => "queued",
            Self::Running => "running",
            Self::Done => "done",
            Self::Failed => "failed",
        }
    }
}
