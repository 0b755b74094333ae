//! Metadata store trait and implementations.

use crate::error::{MetadataError, MetadataResult};
use crate::repos::{CatalogRepo, ImageRepo, LeaseRepo, MatchRepo, TaskRepo};
use async_trait::async_trait;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
use sqlx::{Pool, Sqlite};
use std::path::Path;
use std::str::FromStr;
use std::time::Duration;

/// Combined metadata store trait.
#[async_trait]
pub trait MetadataStore:
    ImageRepo + CatalogRepo + MatchRepo + TaskRepo + LeaseRepo + Send + Sync
{
    /// Run database migrations.
    async fn migrate(&self) -> MetadataResult<()>;

    /// Check database connectivity and health.
    async fn health_check(&self) -> MetadataResult<()>;
}

/// SQLite-based metadata store.
pub struct SqliteStore {
    pool: Pool<Sqlite>,
}

impl SqliteStore {
    /// Create a new SQLite store. `":memory:"` opens a private in-memory database.
    pub async fn new(
        path: impl AsRef<Path>,
        query_timeout_secs: Option<u64>,
    ) -> MetadataResult<Self> {
        let path = path.as_ref();

        let opts = if path.as_os_str() == ":memory:" {
            SqliteConnectOptions::from_str("sqlite::memory:")?
        } else {
            if let Some(parent) = path.parent() {
                std::fs::create_dir_all(parent)?;
            }
            SqliteConnectOptions::from_str(&format!("sqlite:{}?mode=rwc", path.display()))?
                .create_if_missing(true)
                .journal_mode(sqlx::sqlite::SqliteJournalMode::Wal)
        };
        let opts = opts
            .synchronous(sqlx::sqlite::SqliteSynchronous::Normal)
            .foreign_keys(true)
            .busy_timeout(Duration::from_secs(5));

        let pool = SqlitePoolOptions::new()
            // One connection serializes writers, which also makes the
            // select-then-update transactions below atomic.
            .max_connections(1)
            // An in-memory database lives only as long as its connection.
            .idle_timeout(None)
            .max_lifetime(None)
            .connect_with(opts)
            .await?;

        let store = Self { pool };
        store.migrate().await?;

        if let Some(secs) = query_timeout_secs {
            tracing::debug!(
                query_timeout_secs = secs,
                "SQLite query timeout is advisory only; use PostgreSQL for enforced statement timeouts"
            );
        }

        Ok(store)
    }

    /// Get a reference to the connection pool.
    pub fn pool(&self) -> &Pool<Sqlite> {
        &self.pool
    }
}

#[async_trait]
impl MetadataStore for SqliteStore {
    async fn migrate(&self) -> MetadataResult<()> {
        sqlx::query(SCHEMA_SQL).execute(&self.pool).await?;
        Ok(())
    }

    async fn health_check(&self) -> MetadataResult<()> {
        sqlx::query("SELECT 1").execute(&self.pool).await?;
        Ok(())
    }
}

// Implement all the repository traits for SqliteStore
mod sqlite_impl {
    use super::*;
    use crate::models::*;
    use crate::repos::catalogs::rank_candidates;
    use crate::repos::{SubmissionReservation, TaskKind, TaskState};
    use skycat_core::{CatalogKind, ProviderKind, normalize_designation, sphere::declination_band};
    use time::OffsetDateTime;
    use uuid::Uuid;

    #[async_trait]
    impl ImageRepo for SqliteStore {
        async fn insert_image(&self, image: &NewImage) -> MetadataResult<i64> {
            let now = OffsetDateTime::now_utc();
            let result = sqlx::query_scalar::<_, i64>(
                r#"
                INSERT INTO images (
                    file_path, subtype, width_pixels, height_pixels, astrometry_status,
                    is_plate_solved, plate_solve_source, ra_center_degrees, dec_center_degrees,
                    field_radius_degrees, pixel_scale_arcsec, rotation_degrees, parity,
                    raw_header, created_at, updated_at
                )
                VALUES (?, ?, ?, ?, 'NONE', ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
                RETURNING image_id
                "#,
            )
            .bind(&image.file_path)
            .bind(&image.subtype)
            .bind(image.width_pixels)
            .bind(image.height_pixels)
            .bind(image.is_plate_solved)
            .bind(&image.plate_solve_source)
            .bind(image.ra_center_degrees)
            .bind(image.dec_center_degrees)
            .bind(image.field_radius_degrees)
            .bind(image.pixel_scale_arcsec)
            .bind(image.rotation_degrees)
            .bind(image.parity)
            .bind(&image.raw_header)
            .bind(now)
            .bind(now)
            .fetch_one(&self.pool)
            .await;

            match result {
                Ok(id) => Ok(id),
                Err(sqlx::Error::Database(db_err))
                    if db_err.message().contains("UNIQUE constraint") =>
                {
                    Err(MetadataError::AlreadyExists(format!(
                        "image with file_path {}",
                        image.file_path
                    )))
                }
                Err(e) => Err(e.into()),
            }
        }

        async fn get_image(&self, image_id: i64) -> MetadataResult<Option<ImageRow>> {
            let row = sqlx::query_as::<_, ImageRow>("SELECT * FROM images WHERE image_id = ?")
                .bind(image_id)
                .fetch_optional(&self.pool)
                .await?;
            Ok(row)
        }

        async fn begin_submission(
            &self,
            image_id: i64,
            provider: ProviderKind,
            force: bool,
            now: OffsetDateTime,
        ) -> MetadataResult<SubmissionReservation> {
            let mut tx = self.pool.begin().await?;

            let Some(current) =
                sqlx::query_as::<_, ImageRow>("SELECT * FROM images WHERE image_id = ?")
                    .bind(image_id)
                    .fetch_optional(&mut *tx)
                    .await?
            else {
                return Ok(SubmissionReservation::NotFound);
            };

            if !current.status()?.can_submit(force) {
                return Ok(SubmissionReservation::AlreadyStarted(current));
            }

            let result = sqlx::query(
                r#"
                UPDATE images
                SET astrometry_status = 'SUBMITTED', astrometry_provider = ?,
                    submission_id = NULL, job_id = NULL, updated_at = ?
                WHERE image_id = ? AND astrometry_status = ?
                "#,
            )
            .bind(provider.as_str())
            .bind(now)
            .bind(image_id)
            .bind(&current.astrometry_status)
            .execute(&mut *tx)
            .await?;
            tx.commit().await?;

            if result.rows_affected() == 0 {
                return Ok(match self.get_image(image_id).await? {
                    Some(latest) => SubmissionReservation::AlreadyStarted(latest),
                    None => SubmissionReservation::NotFound,
                });
            }
            Ok(SubmissionReservation::Reserved(current))
        }

        async fn record_submission(
            &self,
            image_id: i64,
            submission_id: &str,
            now: OffsetDateTime,
        ) -> MetadataResult<bool> {
            let result = sqlx::query(
                "UPDATE images SET submission_id = ?, updated_at = ? WHERE image_id = ? AND astrometry_status = 'SUBMITTED'",
            )
            .bind(submission_id)
            .bind(now)
            .bind(image_id)
            .execute(&self.pool)
            .await?;
            Ok(result.rows_affected() > 0)
        }

        async fn record_job(
            &self,
            image_id: i64,
            submission_id: &str,
            job_id: &str,
            now: OffsetDateTime,
        ) -> MetadataResult<bool> {
            let result = sqlx::query(
                r#"
                UPDATE images
                SET job_id = ?, astrometry_status = 'PROCESSING', updated_at = ?
                WHERE image_id = ? AND submission_id = ?
                  AND astrometry_status IN ('SUBMITTED', 'PROCESSING')
                "#,
            )
            .bind(job_id)
            .bind(now)
            .bind(image_id)
            .bind(submission_id)
            .execute(&self.pool)
            .await?;
            Ok(result.rows_affected() > 0)
        }

        async fn record_solution(
            &self,
            image_id: i64,
            solution: &SolutionRecord,
            now: OffsetDateTime,
        ) -> MetadataResult<bool> {
            let result = sqlx::query(
                r#"
                UPDATE images
                SET astrometry_status = 'SOLVED', is_plate_solved = 1, plate_solve_source = ?,
                    ra_center_degrees = ?, dec_center_degrees = ?, field_radius_degrees = ?,
                    pixel_scale_arcsec = ?, rotation_degrees = ?, parity = ?,
                    astrometry_url = ?, updated_at = ?
                WHERE image_id = ? AND job_id = ?
                  AND astrometry_status IN ('SUBMITTED', 'PROCESSING')
                "#,
            )
            .bind(skycat_core::astrometry::PLATE_SOLVE_SOURCE_SOLVER)
            .bind(solution.ra_center_degrees)
            .bind(solution.dec_center_degrees)
            .bind(solution.field_radius_degrees)
            .bind(solution.pixel_scale_arcsec)
            .bind(solution.rotation_degrees)
            .bind(solution.parity)
            .bind(&solution.astrometry_url)
            .bind(now)
            .bind(image_id)
            .bind(&solution.job_id)
            .execute(&self.pool)
            .await?;
            Ok(result.rows_affected() > 0)
        }

        async fn set_wcs_header(
            &self,
            image_id: i64,
            wcs_header: &str,
            now: OffsetDateTime,
        ) -> MetadataResult<()> {
            let result =
                sqlx::query("UPDATE images SET wcs_header = ?, updated_at = ? WHERE image_id = ?")
                    .bind(wcs_header)
                    .bind(now)
                    .bind(image_id)
                    .execute(&self.pool)
                    .await?;
            if result.rows_affected() == 0 {
                return Err(MetadataError::NotFound(format!("image {image_id}")));
            }
            Ok(())
        }

        async fn fail_in_flight(
            &self,
            image_id: i64,
            submission_id: Option<&str>,
            now: OffsetDateTime,
        ) -> MetadataResult<bool> {
            let result = match submission_id {
                Some(sub) => {
                    sqlx::query(
                        r#"
                        UPDATE images SET astrometry_status = 'FAILED', updated_at = ?
                        WHERE image_id = ? AND submission_id = ?
                          AND astrometry_status IN ('SUBMITTED', 'PROCESSING')
                        "#,
                    )
                    .bind(now)
                    .bind(image_id)
                    .bind(sub)
                    .execute(&self.pool)
                    .await?
                }
                None => {
                    sqlx::query(
                        r#"
                        UPDATE images SET astrometry_status = 'FAILED', updated_at = ?
                        WHERE image_id = ? AND astrometry_status IN ('SUBMITTED', 'PROCESSING')
                        "#,
                    )
                    .bind(now)
                    .bind(image_id)
                    .execute(&self.pool)
                    .await?
                }
            };
            Ok(result.rows_affected() > 0)
        }

        async fn touch_image(
            &self,
            image_id: i64,
            submission_id: &str,
            now: OffsetDateTime,
        ) -> MetadataResult<bool> {
            let result = sqlx::query(
                r#"
                UPDATE images SET updated_at = ?
                WHERE image_id = ? AND submission_id = ?
                  AND astrometry_status IN ('SUBMITTED', 'PROCESSING')
                "#,
            )
            .bind(now)
            .bind(image_id)
            .bind(submission_id)
            .execute(&self.pool)
            .await?;
            Ok(result.rows_affected() > 0)
        }

        async fn count_in_flight(&self) -> MetadataResult<i64> {
            let count: i64 = sqlx::query_scalar(
                "SELECT COUNT(*) FROM images WHERE astrometry_status IN ('SUBMITTED', 'PROCESSING')",
            )
            .fetch_one(&self.pool)
            .await?;
            Ok(count)
        }

        async fn list_images_by_path_prefix(&self, prefix: &str) -> MetadataResult<Vec<ImageRow>> {
            let rows = sqlx::query_as::<_, ImageRow>(
                "SELECT * FROM images WHERE substr(file_path, 1, length(?)) = ? ORDER BY image_id",
            )
            .bind(prefix)
            .bind(prefix)
            .fetch_all(&self.pool)
            .await?;
            Ok(rows)
        }

        async fn reap_stale(
            &self,
            cutoff: OffsetDateTime,
            now: OffsetDateTime,
        ) -> MetadataResult<Vec<i64>> {
            let ids = sqlx::query_scalar::<_, i64>(
                r#"
                UPDATE images SET astrometry_status = 'FAILED', updated_at = ?
                WHERE astrometry_status IN ('SUBMITTED', 'PROCESSING') AND updated_at < ?
                RETURNING image_id
                "#,
            )
            .bind(now)
            .bind(cutoff)
            .fetch_all(&self.pool)
            .await?;
            Ok(ids)
        }
    }

    #[async_trait]
    impl CatalogRepo for SqliteStore {
        async fn upsert_catalog_object(&self, object: &CatalogObjectRow) -> MetadataResult<()> {
            sqlx::query(
                r#"
                INSERT INTO catalog_objects (
                    catalog_kind, designation, common_name, object_type, constellation,
                    magnitude, ra_degrees, dec_degrees
                )
                VALUES (?, ?, ?, ?, ?, ?, ?, ?)
                ON CONFLICT(catalog_kind, designation) DO UPDATE SET
                    common_name = excluded.common_name,
                    object_type = excluded.object_type,
                    constellation = excluded.constellation,
                    magnitude = excluded.magnitude,
                    ra_degrees = excluded.ra_degrees,
                    dec_degrees = excluded.dec_degrees
                "#,
            )
            .bind(&object.catalog_kind)
            .bind(&object.designation)
            .bind(&object.common_name)
            .bind(&object.object_type)
            .bind(&object.constellation)
            .bind(object.magnitude)
            .bind(object.ra_degrees)
            .bind(object.dec_degrees)
            .execute(&self.pool)
            .await?;
            Ok(())
        }

        async fn find_within_radius(
            &self,
            kind: CatalogKind,
            ra: f64,
            dec: f64,
            radius_degrees: f64,
            limit: Option<u32>,
        ) -> MetadataResult<Vec<CatalogCandidate>> {
            let (dec_min, dec_max) = declination_band(dec, radius_degrees);
            let rows = sqlx::query_as::<_, CatalogObjectRow>(
                "SELECT * FROM catalog_objects WHERE catalog_kind = ? AND dec_degrees BETWEEN ? AND ?",
            )
            .bind(kind.as_str())
            .bind(dec_min)
            .bind(dec_max)
            .fetch_all(&self.pool)
            .await?;
            Ok(rank_candidates(rows, ra, dec, radius_degrees, limit))
        }

        async fn find_coordinates(
            &self,
            kind: CatalogKind,
            designation: &str,
        ) -> MetadataResult<Option<(f64, f64)>> {
            let exact = sqlx::query_as::<_, (f64, f64)>(
                "SELECT ra_degrees, dec_degrees FROM catalog_objects WHERE catalog_kind = ? AND designation = ?",
            )
            .bind(kind.as_str())
            .bind(designation)
            .fetch_optional(&self.pool)
            .await?;
            if exact.is_some() || !kind.normalizes_designations() {
                return Ok(exact);
            }

            let normalized = sqlx::query_as::<_, (f64, f64)>(
                r#"
                SELECT ra_degrees, dec_degrees FROM catalog_objects
                WHERE catalog_kind = ? AND UPPER(REPLACE(designation, ' ', '')) = ?
                LIMIT 1
                "#,
            )
            .bind(kind.as_str())
            .bind(normalize_designation(designation))
            .fetch_optional(&self.pool)
            .await?;
            Ok(normalized)
        }

        async fn count_catalog_objects(&self, kind: Option<CatalogKind>) -> MetadataResult<i64> {
            let count: i64 = match kind {
                Some(kind) => {
                    sqlx::query_scalar("SELECT COUNT(*) FROM catalog_objects WHERE catalog_kind = ?")
                        .bind(kind.as_str())
                        .fetch_one(&self.pool)
                        .await?
                }
                None => {
                    sqlx::query_scalar("SELECT COUNT(*) FROM catalog_objects")
                        .fetch_one(&self.pool)
                        .await?
                }
            };
            Ok(count)
        }
    }

    #[async_trait]
    impl MatchRepo for SqliteStore {
        async fn replace_automatic_matches(
            &self,
            image_id: i64,
            matches: &[MatchRow],
        ) -> MetadataResult<u64> {
            let mut tx = self.pool.begin().await?;

            sqlx::query(
                "DELETE FROM image_catalog_matches WHERE image_id = ? AND match_source = 'AUTOMATIC'",
            )
            .bind(image_id)
            .execute(&mut *tx)
            .await?;

            let mut inserted = 0;
            for record in matches {
                let result = sqlx::query(
                    r#"
                    INSERT INTO image_catalog_matches (
                        image_id, catalog_kind, designation, angular_separation_degrees,
                        confidence_score, match_source, is_in_field, created_at
                    )
                    VALUES (?, ?, ?, ?, ?, 'AUTOMATIC', ?, ?)
                    ON CONFLICT(image_id, catalog_kind, designation) DO NOTHING
                    "#,
                )
                .bind(image_id)
                .bind(&record.catalog_kind)
                .bind(&record.designation)
                .bind(record.angular_separation_degrees)
                .bind(record.confidence_score)
                .bind(record.is_in_field)
                .bind(record.created_at)
                .execute(&mut *tx)
                .await?;
                inserted += result.rows_affected();
            }

            tx.commit().await?;
            Ok(inserted)
        }

        async fn insert_match(&self, record: &MatchRow) -> MetadataResult<bool> {
            let result = sqlx::query(
                r#"
                INSERT INTO image_catalog_matches (
                    image_id, catalog_kind, designation, angular_separation_degrees,
                    confidence_score, match_source, is_in_field, created_at
                )
                VALUES (?, ?, ?, ?, ?, ?, ?, ?)
                ON CONFLICT(image_id, catalog_kind, designation) DO NOTHING
                "#,
            )
            .bind(record.image_id)
            .bind(&record.catalog_kind)
            .bind(&record.designation)
            .bind(record.angular_separation_degrees)
            .bind(record.confidence_score)
            .bind(&record.match_source)
            .bind(record.is_in_field)
            .bind(record.created_at)
            .execute(&self.pool)
            .await?;
            Ok(result.rows_affected() > 0)
        }

        async fn list_matches(&self, image_id: i64) -> MetadataResult<Vec<MatchRow>> {
            let rows = sqlx::query_as::<_, MatchRow>(
                r#"
                SELECT * FROM image_catalog_matches WHERE image_id = ?
                ORDER BY angular_separation_degrees IS NULL, angular_separation_degrees, catalog_kind, designation
                "#,
            )
            .bind(image_id)
            .fetch_all(&self.pool)
            .await?;
            Ok(rows)
        }
    }

    #[async_trait]
    impl TaskRepo for SqliteStore {
        async fn enqueue_task(&self, task: &TaskRow) -> MetadataResult<()> {
            sqlx::query(
                r#"
                INSERT INTO workflow_tasks (
                    task_id, image_id, kind, state, submission_id, attempt, force,
                    run_after, last_error, created_at, updated_at
                )
                VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
                "#,
            )
            .bind(task.task_id)
            .bind(task.image_id)
            .bind(&task.kind)
            .bind(&task.state)
            .bind(&task.submission_id)
            .bind(task.attempt)
            .bind(task.force)
            .bind(task.run_after)
            .bind(&task.last_error)
            .bind(task.created_at)
            .bind(task.updated_at)
            .execute(&self.pool)
            .await?;
            Ok(())
        }

        async fn claim_due_task(&self, now: OffsetDateTime) -> MetadataResult<Option<TaskRow>> {
            let row = sqlx::query_as::<_, TaskRow>(
                r#"
                UPDATE workflow_tasks SET state = 'running', updated_at = ?
                WHERE task_id = (
                    SELECT task_id FROM workflow_tasks
                    WHERE state = 'queued' AND run_after <= ?
                    ORDER BY run_after, created_at
                    LIMIT 1
                )
                RETURNING *
                "#,
            )
            .bind(now)
            .bind(now)
            .fetch_optional(&self.pool)
            .await?;
            Ok(row)
        }

        async fn reschedule_task(
            &self,
            task_id: Uuid,
            run_after: OffsetDateTime,
            attempt: i32,
            last_error: Option<&str>,
        ) -> MetadataResult<()> {
            sqlx::query(
                r#"
                UPDATE workflow_tasks
                SET state = 'queued', run_after = ?, attempt = ?, last_error = ?, updated_at = ?
                WHERE task_id = ?
                "#,
            )
            .bind(run_after)
            .bind(attempt)
            .bind(last_error)
            .bind(OffsetDateTime::now_utc())
            .bind(task_id)
            .execute(&self.pool)
            .await?;
            Ok(())
        }

        async fn complete_task(
            &self,
            task_id: Uuid,
            state: TaskState,
            last_error: Option<&str>,
        ) -> MetadataResult<()> {
            if !matches!(state, TaskState::Done | TaskState::Failed) {
                return Err(MetadataError::InvalidStateTransition {
                    from: TaskState::Running.as_str().to_string(),
                    to: state.as_str().to_string(),
                });
            }
            sqlx::query(
                "UPDATE workflow_tasks SET state = ?, last_error = ?, updated_at = ? WHERE task_id = ?",
            )
            .bind(state.as_str())
            .bind(last_error)
            .bind(OffsetDateTime::now_utc())
            .bind(task_id)
            .execute(&self.pool)
            .await?;
            Ok(())
        }

        async fn get_task(&self, task_id: Uuid) -> MetadataResult<Option<TaskRow>> {
            let row =
                sqlx::query_as::<_, TaskRow>("SELECT * FROM workflow_tasks WHERE task_id = ?")
                    .bind(task_id)
                    .fetch_optional(&self.pool)
                    .await?;
            Ok(row)
        }

        async fn list_tasks_for_image(&self, image_id: i64) -> MetadataResult<Vec<TaskRow>> {
            let rows = sqlx::query_as::<_, TaskRow>(
                "SELECT * FROM workflow_tasks WHERE image_id = ? ORDER BY created_at",
            )
            .bind(image_id)
            .fetch_all(&self.pool)
            .await?;
            Ok(rows)
        }

        async fn has_pending_task(&self, image_id: i64, kind: TaskKind) -> MetadataResult<bool> {
            let exists: bool = sqlx::query_scalar(
                r#"
                SELECT EXISTS(
                    SELECT 1 FROM workflow_tasks
                    WHERE image_id = ? AND kind = ? AND state IN ('queued', 'running')
                )
                "#,
            )
            .bind(image_id)
            .bind(kind.as_str())
            .fetch_one(&self.pool)
            .await?;
            Ok(exists)
        }

        async fn recover_orphaned_tasks(&self, now: OffsetDateTime) -> MetadataResult<u64> {
            let result = sqlx::query(
                "UPDATE workflow_tasks SET state = 'queued', run_after = ?, updated_at = ? WHERE state = 'running'",
            )
            .bind(now)
            .bind(now)
            .execute(&self.pool)
            .await?;
            Ok(result.rows_affected())
        }
    }

    #[async_trait]
    impl LeaseRepo for SqliteStore {
        async fn try_acquire_lease(
            &self,
            name: &str,
            holder: &str,
            ttl: time::Duration,
            now: OffsetDateTime,
        ) -> MetadataResult<bool> {
            let result = sqlx::query(
                r#"
                INSERT INTO leases (name, holder, expires_at) VALUES (?, ?, ?)
                ON CONFLICT(name) DO UPDATE SET
                    holder = excluded.holder,
                    expires_at = excluded.expires_at
                WHERE leases.expires_at <= ? OR leases.holder = excluded.holder
                "#,
            )
            .bind(name)
            .bind(holder)
            .bind(now + ttl)
            .bind(now)
            .execute(&self.pool)
            .await?;
            Ok(result.rows_affected() > 0)
        }

        async fn release_lease(&self, name: &str, holder: &str) -> MetadataResult<()> {
            sqlx::query("DELETE FROM leases WHERE name = ? AND holder = ?")
                .bind(name)
                .bind(holder)
                .execute(&self.pool)
                .await?;
            Ok(())
        }
    }
}

impl std::convert::From<std::io::Error> for crate::MetadataError {
    fn from(e: std::io::Error) -> Self {
        crate::MetadataError::Config(e.to_string())
    }
}

/// SQL schema for SQLite.
const SCHEMA_SQL: &str = r#"
-- Images and their astrometry state
CREATE TABLE IF NOT EXISTS images (
    image_id INTEGER PRIMARY KEY AUTOINCREMENT,
    file_path TEXT NOT NULL UNIQUE,
    subtype TEXT,
    width_pixels INTEGER,
    height_pixels INTEGER,
    astrometry_status TEXT NOT NULL DEFAULT 'NONE',
    astrometry_provider TEXT,
    submission_id TEXT,
    job_id TEXT,
    astrometry_url TEXT,
    is_plate_solved INTEGER NOT NULL DEFAULT 0,
    plate_solve_source TEXT,
    ra_center_degrees REAL,
    dec_center_degrees REAL,
    field_radius_degrees REAL,
    pixel_scale_arcsec REAL,
    rotation_degrees REAL,
    parity INTEGER,
    wcs_header TEXT,
    raw_header TEXT,
    created_at TEXT NOT NULL,
    updated_at TEXT NOT NULL
);
CREATE INDEX IF NOT EXISTS idx_images_status ON images(astrometry_status, updated_at);

-- Reference catalogs
CREATE TABLE IF NOT EXISTS catalog_objects (
    catalog_kind TEXT NOT NULL,
    designation TEXT NOT NULL,
    common_name TEXT,
    object_type TEXT,
    constellation TEXT,
    magnitude REAL,
    ra_degrees REAL NOT NULL,
    dec_degrees REAL NOT NULL,
    PRIMARY KEY (catalog_kind, designation)
);
CREATE INDEX IF NOT EXISTS idx_catalog_objects_dec ON catalog_objects(catalog_kind, dec_degrees);

-- Image/catalog associations; one row per (image, catalog, designation)
CREATE TABLE IF NOT EXISTS image_catalog_matches (
    image_id INTEGER NOT NULL REFERENCES images(image_id) ON DELETE CASCADE,
    catalog_kind TEXT NOT NULL,
    designation TEXT NOT NULL,
    angular_separation_degrees REAL,
    confidence_score REAL,
    match_source TEXT NOT NULL,
    is_in_field INTEGER NOT NULL DEFAULT 1,
    created_at TEXT NOT NULL,
    PRIMARY KEY (image_id, catalog_kind, designation)
);
CREATE INDEX IF NOT EXISTS idx_matches_source ON image_catalog_matches(image_id, match_source);

-- Durable workflow queue
CREATE TABLE IF NOT EXISTS workflow_tasks (
    task_id BLOB PRIMARY KEY,
    image_id INTEGER NOT NULL REFERENCES images(image_id) ON DELETE CASCADE,
    kind TEXT NOT NULL,
    state TEXT NOT NULL DEFAULT 'queued',
    submission_id TEXT,
    attempt INTEGER NOT NULL DEFAULT 0,
    force INTEGER NOT NULL DEFAULT 0,
    run_after TEXT NOT NULL,
    last_error TEXT,
    created_at TEXT NOT NULL,
    updated_at TEXT NOT NULL
);
CREATE INDEX IF NOT EXISTS idx_workflow_tasks_due ON workflow_tasks(state, run_after);
CREATE INDEX IF NOT EXISTS idx_workflow_tasks_image ON workflow_tasks(image_id, kind, state);

-- Named lease locks
CREATE TABLE IF NOT EXISTS leases (
    name TEXT PRIMARY KEY,
    holder TEXT NOT NULL,
    expires_at TEXT NOT NULL
);
"#;
