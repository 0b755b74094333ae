//! Worker pool draining the durable task queue.

use crate::metrics;
use crate::state::TaskRegistry;
use crate::workflow::{TaskOutcome, Workflow};
use skycat_metadata::MetadataStore;
use skycat_metadata::models::TaskRow;
use skycat_metadata::repos::{ImageRepo, TaskRepo, TaskState};
use std::sync::Arc;
use std::time::Duration;
use time::OffsetDateTime;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;

/// Executes claimed tasks one step at a time.
pub struct WorkerPool {
    metadata: Arc<dyn MetadataStore>,
    workflow: Arc<Workflow>,
    registry: Arc<TaskRegistry>,
}

impl WorkerPool {
    pub fn new(
        metadata: Arc<dyn MetadataStore>,
        workflow: Arc<Workflow>,
        registry: Arc<TaskRegistry>,
    ) -> Self {
        Self {
            metadata,
            workflow,
            registry,
        }
    }

    /// Spawn `workflow.workers` worker loops.
    pub fn spawn(self: Arc<Self>) -> Vec<JoinHandle<()>> {
        let workers = self.workflow.config().workers;
        tracing::info!(workers, "Starting workflow workers");
        (0..workers)
            .map(|slot| {
                let pool = self.clone();
                tokio::spawn(async move { pool.run_slot(slot).await })
            })
            .collect()
    }

    async fn run_slot(&self, slot: usize) {
        let idle = self.workflow.config().idle_poll();
        tracing::debug!(slot, "Worker started");
        loop {
            match self.claim().await {
                Some(task) => self.run_tracked(task).await,
                None => tokio::time::sleep(idle).await,
            }
        }
    }

    async fn claim(&self) -> Option<TaskRow> {
        match self.metadata.claim_due_task(OffsetDateTime::now_utc()).await {
            Ok(task) => task,
            Err(e) => {
                tracing::error!(error = %e, "Failed to claim task");
                None
            }
        }
    }

    /// Run one step in its own tokio task so a panic is caught by the
    /// registry watchdog instead of killing the slot.
    async fn run_tracked(&self, task: TaskRow) {
        let (done_tx, done_rx) = oneshot::channel::<()>();
        let metadata = self.metadata.clone();
        let workflow = self.workflow.clone();
        let task_id = task.task_id;
        let image_id = task.image_id;

        metrics::WORKERS_BUSY.inc();
        let handle = tokio::spawn(async move {
            let outcome = workflow.execute(&task).await;
            apply_outcome(metadata.as_ref(), &task, outcome).await;
            let _ = done_tx.send(());
        });
        self.registry.register(task_id, image_id, handle).await;

        // Resolves with Err when the step panicked and dropped the sender.
        if done_rx.await.is_err() {
            tracing::warn!(task_id = %task_id, image_id, "Task step ended without reporting");
        }
        metrics::WORKERS_BUSY.dec();
    }

    /// Claim and execute a single due task inline. Returns false when
    /// nothing was due.
    pub async fn run_next(&self) -> bool {
        let Some(task) = self.claim().await else {
            return false;
        };
        let outcome = self.workflow.execute(&task).await;
        apply_outcome(self.metadata.as_ref(), &task, outcome).await;
        true
    }

    /// Drive an image's tasks inline until it leaves flight or `budget`
    /// elapses, sleeping between polls the way the pool would.
    pub async fn run_until_settled(&self, image_id: i64, budget: Duration) -> bool {
        let deadline = tokio::time::Instant::now() + budget;
        let idle = self.workflow.config().idle_poll();
        loop {
            if self.settled(image_id).await {
                return true;
            }
            if tokio::time::Instant::now() >= deadline {
                return false;
            }
            if !self.run_next().await {
                tokio::time::sleep(idle).await;
            }
        }
    }

    async fn settled(&self, image_id: i64) -> bool {
        let image = match self.metadata.get_image(image_id).await {
            Ok(Some(image)) => image,
            Ok(None) => return true,
            Err(e) => {
                tracing::warn!(image_id, error = %e, "Failed to read image state");
                return false;
            }
        };
        let in_flight = image.status().map(|s| s.is_in_flight()).unwrap_or(false);
        if in_flight {
            return false;
        }
        match self.metadata.list_tasks_for_image(image_id).await {
            Ok(tasks) => tasks.iter().all(|t| {
                t.state == TaskState::Done.as_str() || t.state == TaskState::Failed.as_str()
            }),
            Err(e) => {
                tracing::warn!(image_id, error = %e, "Failed to list image tasks");
                false
            }
        }
    }
}

/// Persist what a step decided about its task.
pub async fn apply_outcome(metadata: &dyn MetadataStore, task: &TaskRow, outcome: TaskOutcome) {
    let result = match &outcome {
        TaskOutcome::Done => metadata.complete_task(task.task_id, TaskState::Done, None).await,
        TaskOutcome::Failed(reason) => {
            metadata
                .complete_task(task.task_id, TaskState::Failed, Some(reason))
                .await
        }
        TaskOutcome::Retry {
            run_after,
            attempt,
            last_error,
        } => {
            metadata
                .reschedule_task(task.task_id, *run_after, *attempt, last_error.as_deref())
                .await
        }
    };
    if let Err(e) = result {
        tracing::error!(
            task_id = %task.task_id,
            image_id = task.image_id,
            outcome = ?outcome,
            error = %e,
            "Failed to record task outcome"
        );
    }
}
