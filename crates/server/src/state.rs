//! Application state shared across handlers and background loops.

use crate::admission::AdmissionGate;
use crate::matcher::CatalogMatcher;
use crate::workflow::Workflow;
use skycat_core::config::AppConfig;
use skycat_metadata::MetadataStore;
use skycat_metadata::repos::{ImageRepo, TaskRepo, TaskState};
use skycat_solver::PlateSolver;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use uuid::Uuid;

/// Registry for tracking spawned task steps and detecting panics.
///
/// A step that panics never reports its outcome, which would leave its task
/// running and its image in flight until the reaper caught up. The watchdog
/// marks both failed within ~10s.
pub struct TaskRegistry {
    /// Map of task_id -> (image_id, step handle)
    tasks: Arc<Mutex<HashMap<Uuid, (i64, JoinHandle<()>)>>>,
    metadata: Arc<dyn MetadataStore>,
}

impl TaskRegistry {
    pub fn new(metadata: Arc<dyn MetadataStore>) -> Self {
        Self {
            tasks: Arc::new(Mutex::new(HashMap::new())),
            metadata,
        }
    }

    /// Register a spawned step.
    pub async fn register(&self, task_id: Uuid, image_id: i64, handle: JoinHandle<()>) {
        self.tasks.lock().await.insert(task_id, (image_id, handle));
    }

    /// Number of steps not yet reaped by the watchdog.
    pub async fn tracked(&self) -> usize {
        self.tasks.lock().await.len()
    }

    /// Spawn a watchdog task that periodically checks for panicked steps.
    /// Returns the watchdog's JoinHandle (caller should keep it to prevent early termination).
    pub fn spawn_watchdog(self: Arc<Self>) -> JoinHandle<()> {
        tokio::spawn(async move {
            loop {
                tokio::time::sleep(Duration::from_secs(10)).await;
                self.check_tasks().await;
            }
        })
    }

    /// Check all tracked steps for completion or panics.
    pub async fn check_tasks(&self) {
        let mut finished = Vec::new();

        // Hold the mutex only while collecting finished handles
        {
            let mut tasks = self.tasks.lock().await;
            let done: Vec<Uuid> = tasks
                .iter()
                .filter(|(_, (_, handle))| handle.is_finished())
                .map(|(task_id, _)| *task_id)
                .collect();
            for task_id in done {
                if let Some((image_id, handle)) = tasks.remove(&task_id) {
                    finished.push((task_id, image_id, handle));
                }
            }
        }

        for (task_id, image_id, handle) in finished {
            match handle.await {
                Err(join_err) if join_err.is_panic() => {
                    tracing::error!(
                        task_id = %task_id,
                        image_id,
                        panic = ?join_err,
                        "Task step panicked, marking task and image failed"
                    );
                    crate::metrics::TASKS_PANICKED.inc();
                    self.fail_panicked(task_id, image_id).await;
                }
                Err(join_err) if join_err.is_cancelled() => {
                    tracing::warn!(task_id = %task_id, image_id, "Task step was cancelled");
                }
                Ok(()) => {
                    tracing::debug!(task_id = %task_id, "Task step completed");
                }
                Err(e) => {
                    tracing::error!(task_id = %task_id, error = ?e, "Task step failed with unknown error");
                }
            }
        }
    }

    async fn fail_panicked(&self, task_id: Uuid, image_id: i64) {
        if let Err(e) = self
            .metadata
            .complete_task(task_id, TaskState::Failed, Some("task step panicked"))
            .await
        {
            tracing::error!(task_id = %task_id, error = %e, "Failed to mark panicked task as failed");
        }
        match self
            .metadata
            .fail_in_flight(image_id, None, time::OffsetDateTime::now_utc())
            .await
        {
            Ok(true) => crate::metrics::record_transition(skycat_core::AstrometryStatus::Failed),
            Ok(false) => {}
            Err(e) => {
                tracing::error!(image_id, error = %e, "Failed to mark image of panicked task as failed")
            }
        }
    }
}

/// Shared application state.
#[derive(Clone)]
pub struct AppState {
    /// Application configuration.
    pub config: Arc<AppConfig>,
    /// Metadata store.
    pub metadata: Arc<dyn MetadataStore>,
    /// Plate-solving service client.
    pub solver: Arc<dyn PlateSolver>,
    /// Submission admission gate.
    pub admission: Arc<AdmissionGate>,
    /// Catalog matcher.
    pub matcher: Arc<CatalogMatcher>,
    /// Plate-solve workflow.
    pub workflow: Arc<Workflow>,
    /// Task step registry for panic detection.
    pub task_registry: Arc<TaskRegistry>,
}

impl AppState {
    /// Wire the workflow components around a store and a solver.
    pub fn new(
        config: AppConfig,
        metadata: Arc<dyn MetadataStore>,
        solver: Arc<dyn PlateSolver>,
    ) -> Self {
        let admission = Arc::new(AdmissionGate::new(
            metadata.clone(),
            config.admission.clone(),
        ));
        let matcher = Arc::new(CatalogMatcher::new(
            metadata.clone(),
            config.matching.clone(),
        ));
        let workflow = Arc::new(Workflow::new(
            metadata.clone(),
            solver.clone(),
            admission.clone(),
            matcher.clone(),
            config.workflow.clone(),
        ));
        let task_registry = Arc::new(TaskRegistry::new(metadata.clone()));

        Self {
            config: Arc::new(config),
            metadata,
            solver,
            admission,
            matcher,
            workflow,
            task_registry,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use skycat_metadata::SqliteStore;
    use skycat_metadata::models::{NewImage, TaskRow};
    use skycat_metadata::repos::TaskKind;
    use skycat_core::ProviderKind;
    use time::OffsetDateTime;

    #[tokio::test]
    async fn panicked_step_fails_task_and_image() {
        let metadata: Arc<dyn MetadataStore> =
            Arc::new(SqliteStore::new(":memory:", None).await.unwrap());
        let image_id = metadata
            .insert_image(&NewImage {
                file_path: "/lights/m1.fits".into(),
                ..NewImage::default()
            })
            .await
            .unwrap();
        let now = OffsetDateTime::now_utc();
        metadata
            .begin_submission(image_id, ProviderKind::Nova, false, now)
            .await
            .unwrap();
        let task = TaskRow::queued(image_id, TaskKind::Monitor, Some("7".into()), false, now);
        metadata.enqueue_task(&task).await.unwrap();
        let claimed = metadata.claim_due_task(now).await.unwrap().unwrap();

        let registry = TaskRegistry::new(metadata.clone());
        let handle = tokio::spawn(async { panic!("solver response exploded") });
        while !handle.is_finished() {
            tokio::task::yield_now().await;
        }
        registry.register(claimed.task_id, image_id, handle).await;
        registry.check_tasks().await;

        assert_eq!(registry.tracked().await, 0);
        let task = metadata.get_task(claimed.task_id).await.unwrap().unwrap();
        assert_eq!(task.state, "failed");
        let image = metadata.get_image(image_id).await.unwrap().unwrap();
        assert_eq!(image.astrometry_status, "FAILED");
    }

    #[tokio::test]
    async fn completed_steps_are_dropped_quietly() {
        let metadata: Arc<dyn MetadataStore> =
            Arc::new(SqliteStore::new(":memory:", None).await.unwrap());
        let registry = TaskRegistry::new(metadata);
        let handle = tokio::spawn(async {});
        while !handle.is_finished() {
            tokio::task::yield_now().await;
        }
        registry.register(Uuid::new_v4(), 1, handle).await;
        registry.check_tasks().await;
        assert_eq!(registry.tracked().await, 0);
    }
}
