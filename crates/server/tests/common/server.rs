//! Server test utilities.

use super::solver::MockSolver;
use skycat_core::config::{AppConfig, MetadataConfig};
use skycat_metadata::{MetadataStore, SqliteStore};
use skycat_server::{AppState, WorkerPool, create_router};
use skycat_solver::PlateSolver;
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;

/// A test server wrapper with all dependencies.
/// Note: #[allow(dead_code)] because each test file compiles common/ separately.
#[allow(dead_code)]
pub struct TestServer {
    pub router: axum::Router,
    pub state: AppState,
    pub solver: Arc<MockSolver>,
    _temp_dir: TempDir,
}

#[allow(dead_code)]
impl TestServer {
    /// Create a new test server backed by a temporary SQLite database.
    pub async fn new() -> Self {
        Self::with_config(|_| {}).await
    }

    /// Create a test server with custom config modifications.
    pub async fn with_config<F>(modifier: F) -> Self
    where
        F: FnOnce(&mut AppConfig),
    {
        let temp_dir = tempfile::tempdir().expect("Failed to create temp directory");

        let db_path = temp_dir.path().join("metadata.db");
        let metadata: Arc<dyn MetadataStore> = Arc::new(
            SqliteStore::new(&db_path, None)
                .await
                .expect("Failed to create metadata store"),
        );

        // Zero poll delays so tasks run back to back
        let mut config = AppConfig::for_testing();
        config.metadata = MetadataConfig::Sqlite {
            path: db_path,
            query_timeout_secs: None,
        };
        config.workflow.preview_dir = temp_dir.path().join("previews");
        config.server.metrics_enabled = true;

        modifier(&mut config);

        let solver = Arc::new(MockSolver::new());
        let plate_solver: Arc<dyn PlateSolver> = solver.clone();
        let state = AppState::new(config, metadata, plate_solver);

        let router = create_router(state.clone());

        Self {
            router,
            state,
            solver,
            _temp_dir: temp_dir,
        }
    }

    /// Get access to the underlying metadata.
    pub fn metadata(&self) -> Arc<dyn MetadataStore> {
        self.state.metadata.clone()
    }

    /// A worker pool sharing this server's state.
    pub fn worker_pool(&self) -> WorkerPool {
        WorkerPool::new(
            self.state.metadata.clone(),
            self.state.workflow.clone(),
            self.state.task_registry.clone(),
        )
    }

    /// Run tasks inline until the image settles; panics on timeout.
    pub async fn settle(&self, image_id: i64) {
        let settled = self
            .worker_pool()
            .run_until_settled(image_id, Duration::from_secs(10))
            .await;
        assert!(settled, "image {image_id} did not settle");
    }

    /// Run every due task once, returning how many ran.
    pub async fn drain(&self) -> usize {
        let pool = self.worker_pool();
        let mut ran = 0;
        while pool.run_next().await {
            ran += 1;
        }
        ran
    }
}
