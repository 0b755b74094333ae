//! Metadata backends for integration tests.

use skycat_metadata::{MetadataError, MetadataResult, MetadataStore, PostgresStore, SqliteStore};
use std::sync::Arc;
use tempfile::TempDir;
use testcontainers::{ContainerAsync, ImageExt, runners::AsyncRunner};
use testcontainers_modules::postgres::Postgres;

/// Marks errors raised while starting the container, so callers can skip
/// instead of failing when Docker is missing.
pub const POSTGRES_CONTAINER_START_ERR_PREFIX: &str = "postgres-container-start:";

/// File-backed SQLite store living in its own temp directory.
#[allow(dead_code)]
pub struct TestMetadata {
    store: Arc<dyn MetadataStore>,
    _temp_dir: TempDir,
}

#[allow(dead_code)]
impl TestMetadata {
    pub async fn new() -> MetadataResult<Self> {
        let temp_dir = tempfile::tempdir().map_err(|e| MetadataError::Config(e.to_string()))?;
        let store = SqliteStore::new(&temp_dir.path().join("skycat.db"), None).await?;
        Ok(Self {
            store: Arc::new(store),
            _temp_dir: temp_dir,
        })
    }

    pub fn store(&self) -> Arc<dyn MetadataStore> {
        self.store.clone()
    }
}

/// PostgreSQL store backed by a throwaway `postgres:15-alpine` container.
#[allow(dead_code)]
pub struct PostgresTestMetadata {
    store: Arc<dyn MetadataStore>,
    _container: ContainerAsync<Postgres>,
}

#[allow(dead_code)]
impl PostgresTestMetadata {
    pub async fn new() -> MetadataResult<Self> {
        let container = Postgres::default()
            .with_tag("15-alpine")
            .start()
            .await
            .map_err(|e| container_error("start", e))?;
        let host = container
            .get_host()
            .await
            .map_err(|e| container_error("resolve host", e))?;
        let port = container
            .get_host_port_ipv4(5432)
            .await
            .map_err(|e| container_error("resolve port", e))?;

        let url = format!("postgres://postgres:postgres@{host}:{port}/postgres");
        // Several connections so concurrency tests actually race
        let store = PostgresStore::from_url(&url, 8, None).await?;
        Ok(Self {
            store: Arc::new(store),
            _container: container,
        })
    }

    pub fn store(&self) -> Arc<dyn MetadataStore> {
        self.store.clone()
    }
}

fn container_error(step: &str, e: impl std::fmt::Display) -> MetadataError {
    MetadataError::Internal(format!(
        "{POSTGRES_CONTAINER_START_ERR_PREFIX} failed to {step} for PostgreSQL container: {e}"
    ))
}

/// Run a store test against SQLite, then PostgreSQL when Docker is available
/// and SKIP_POSTGRES_TESTS is unset.
#[allow(dead_code)]
pub async fn run_metadata_test_both<F, Fut>(test_fn: F)
where
    F: Fn(Arc<dyn MetadataStore>) -> Fut,
    Fut: std::future::Future<Output = ()>,
{
    let sqlite = TestMetadata::new()
        .await
        .expect("Failed to create SQLite test store");
    test_fn(sqlite.store()).await;

    if std::env::var("SKIP_POSTGRES_TESTS").is_ok() {
        return;
    }
    match PostgresTestMetadata::new().await {
        Ok(postgres) => test_fn(postgres.store()).await,
        Err(err) => eprintln!("Skipping PostgreSQL run: {err}"),
    }
}
