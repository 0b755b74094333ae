//! PostgreSQL-based metadata store implementation.

use crate::error::{MetadataError, MetadataResult};
use crate::models::*;
use crate::repos::catalogs::rank_candidates;
use crate::repos::{
    CatalogRepo, ImageRepo, LeaseRepo, MatchRepo, SubmissionReservation, TaskKind, TaskRepo,
    TaskState,
};
use crate::store::MetadataStore;
use async_trait::async_trait;
use skycat_core::config::PgSslMode;
use skycat_core::{CatalogKind, ProviderKind, normalize_designation, sphere::declination_band};
use sqlx::postgres::{PgConnectOptions, PgPoolOptions, PgSslMode as SqlxPgSslMode};
use sqlx::{Pool, Postgres};
use std::str::FromStr;
use time::OffsetDateTime;
use uuid::Uuid;

/// PostgreSQL schema (embedded).
const POSTGRES_SCHEMA: &str = include_str!("postgres_schema.sql");

fn postgres_schema_statements(schema: &str) -> Vec<&str> {
    schema
        .split(';')
        .filter_map(|statement| {
            let trimmed = statement.trim();
            if trimmed.is_empty() {
                return None;
            }
            let has_sql = trimmed.lines().any(|line| {
                let line = line.trim();
                !line.is_empty() && !line.starts_with("--")
            });
            has_sql.then_some(trimmed)
        })
        .collect()
}

/// PostgreSQL-based metadata store.
pub struct PostgresStore {
    pool: Pool<Postgres>,
}

impl PostgresStore {
    /// Create a new PostgreSQL store from a connection URL.
    pub async fn from_url(
        url: &str,
        max_connections: u32,
        statement_timeout_ms: Option<u64>,
    ) -> MetadataResult<Self> {
        let opts = PgConnectOptions::from_str(url)?;
        Self::connect(opts, max_connections, statement_timeout_ms).await
    }

    /// Create a new PostgreSQL store from individual connection parameters,
    /// so the password can come from its own environment variable.
    #[allow(clippy::too_many_arguments)]
    pub async fn from_params(
        host: &str,
        port: u16,
        username: Option<&str>,
        password: Option<&str>,
        database: &str,
        ssl_mode: Option<PgSslMode>,
        max_connections: u32,
        statement_timeout_ms: Option<u64>,
    ) -> MetadataResult<Self> {
        let mut opts = PgConnectOptions::new()
            .host(host)
            .port(port)
            .database(database);

        if let Some(user) = username {
            opts = opts.username(user);
        }

        if let Some(pass) = password {
            opts = opts.password(pass);
        }

        if let Some(mode) = ssl_mode {
            let sqlx_mode = match mode {
                PgSslMode::Disable => SqlxPgSslMode::Disable,
                PgSslMode::Prefer => SqlxPgSslMode::Prefer,
                PgSslMode::Require => SqlxPgSslMode::Require,
            };
            opts = opts.ssl_mode(sqlx_mode);
        }

        // Log connection info without password
        tracing::info!(
            host = host,
            port = port,
            database = database,
            username = username.unwrap_or("<none>"),
            ssl_mode = ?ssl_mode,
            "Connecting to PostgreSQL with individual parameters"
        );

        Self::connect(opts, max_connections, statement_timeout_ms).await
    }

    async fn connect(
        mut opts: PgConnectOptions,
        max_connections: u32,
        statement_timeout_ms: Option<u64>,
    ) -> MetadataResult<Self> {
        if let Some(timeout_ms) = statement_timeout_ms {
            opts = opts.options([("statement_timeout", format!("{}ms", timeout_ms))]);
            tracing::info!("PostgreSQL statement_timeout set to {}ms", timeout_ms);
        }

        let pool = PgPoolOptions::new()
            .max_connections(max_connections)
            .connect_with(opts)
            .await?;

        let store = Self { pool };
        store.migrate().await?;

        Ok(store)
    }

    /// Get a reference to the connection pool.
    pub fn pool(&self) -> &Pool<Postgres> {
        &self.pool
    }
}

#[async_trait]
impl MetadataStore for PostgresStore {
    async fn migrate(&self) -> MetadataResult<()> {
        // PostgreSQL doesn't allow multiple statements in a single prepared statement,
        // so we split the schema and execute each statement separately.
        for statement in postgres_schema_statements(POSTGRES_SCHEMA) {
            sqlx::query(statement).execute(&self.pool).await?;
        }
        Ok(())
    }

    async fn health_check(&self) -> MetadataResult<()> {
        sqlx::query("SELECT 1").execute(&self.pool).await?;
        Ok(())
    }
}

#[async_trait]
impl ImageRepo for PostgresStore {
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
            VALUES ($1, $2, $3, $4, 'NONE', $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $14)
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
        .fetch_one(&self.pool)
        .await;

        match result {
            Ok(id) => Ok(id),
            Err(sqlx::Error::Database(db_err)) if db_err.is_unique_violation() => Err(
                MetadataError::AlreadyExists(format!("image with file_path {}", image.file_path)),
            ),
            Err(e) => Err(e.into()),
        }
    }

    async fn get_image(&self, image_id: i64) -> MetadataResult<Option<ImageRow>> {
        let row = sqlx::query_as::<_, ImageRow>("SELECT * FROM images WHERE image_id = $1")
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
            sqlx::query_as::<_, ImageRow>("SELECT * FROM images WHERE image_id = $1 FOR UPDATE")
                .bind(image_id)
                .fetch_optional(&mut *tx)
                .await?
        else {
            return Ok(SubmissionReservation::NotFound);
        };

        if !current.status()?.can_submit(force) {
            return Ok(SubmissionReservation::AlreadyStarted(current));
        }

        sqlx::query(
            r#"
            UPDATE images
            SET astrometry_status = 'SUBMITTED', astrometry_provider = $1,
                submission_id = NULL, job_id = NULL, updated_at = $2
            WHERE image_id = $3
            "#,
        )
        .bind(provider.as_str())
        .bind(now)
        .bind(image_id)
        .execute(&mut *tx)
        .await?;
        tx.commit().await?;

        Ok(SubmissionReservation::Reserved(current))
    }

    async fn record_submission(
        &self,
        image_id: i64,
        submission_id: &str,
        now: OffsetDateTime,
    ) -> MetadataResult<bool> {
        let result = sqlx::query(
            "UPDATE images SET submission_id = $1, updated_at = $2 WHERE image_id = $3 AND astrometry_status = 'SUBMITTED'",
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
            SET job_id = $1, astrometry_status = 'PROCESSING', updated_at = $2
            WHERE image_id = $3 AND submission_id = $4
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
            SET astrometry_status = 'SOLVED', is_plate_solved = TRUE, plate_solve_source = $1,
                ra_center_degrees = $2, dec_center_degrees = $3, field_radius_degrees = $4,
                pixel_scale_arcsec = $5, rotation_degrees = $6, parity = $7,
                astrometry_url = $8, updated_at = $9
            WHERE image_id = $10 AND job_id = $11
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
            sqlx::query("UPDATE images SET wcs_header = $1, updated_at = $2 WHERE image_id = $3")
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
                    UPDATE images SET astrometry_status = 'FAILED', updated_at = $1
                    WHERE image_id = $2 AND submission_id = $3
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
                    UPDATE images SET astrometry_status = 'FAILED', updated_at = $1
                    WHERE image_id = $2 AND astrometry_status IN ('SUBMITTED', 'PROCESSING')
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
            UPDATE images SET updated_at = $1
            WHERE image_id = $2 AND submission_id = $3
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
            "SELECT * FROM images WHERE left(file_path, char_length($1)) = $1 ORDER BY image_id",
        )
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
            UPDATE images SET astrometry_status = 'FAILED', updated_at = $1
            WHERE astrometry_status IN ('SUBMITTED', 'PROCESSING') AND updated_at < $2
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
impl CatalogRepo for PostgresStore {
    async fn upsert_catalog_object(&self, object: &CatalogObjectRow) -> MetadataResult<()> {
        sqlx::query(
            r#"
            INSERT INTO catalog_objects (
                catalog_kind, designation, common_name, object_type, constellation,
                magnitude, ra_degrees, dec_degrees
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
            ON CONFLICT(catalog_kind, designation) DO UPDATE SET
                common_name = EXCLUDED.common_name,
                object_type = EXCLUDED.object_type,
                constellation = EXCLUDED.constellation,
                magnitude = EXCLUDED.magnitude,
                ra_degrees = EXCLUDED.ra_degrees,
                dec_degrees = EXCLUDED.dec_degrees
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
            "SELECT * FROM catalog_objects WHERE catalog_kind = $1 AND dec_degrees BETWEEN $2 AND $3",
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
            "SELECT ra_degrees, dec_degrees FROM catalog_objects WHERE catalog_kind = $1 AND designation = $2",
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
            WHERE catalog_kind = $1 AND UPPER(REPLACE(designation, ' ', '')) = $2
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
                sqlx::query_scalar("SELECT COUNT(*) FROM catalog_objects WHERE catalog_kind = $1")
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
impl MatchRepo for PostgresStore {
    async fn replace_automatic_matches(
        &self,
        image_id: i64,
        matches: &[MatchRow],
    ) -> MetadataResult<u64> {
        let mut tx = self.pool.begin().await?;

        sqlx::query(
            "DELETE FROM image_catalog_matches WHERE image_id = $1 AND match_source = 'AUTOMATIC'",
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
                VALUES ($1, $2, $3, $4, $5, 'AUTOMATIC', $6, $7)
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
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
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
            SELECT * FROM image_catalog_matches WHERE image_id = $1
            ORDER BY angular_separation_degrees ASC NULLS LAST, catalog_kind, designation
            "#,
        )
        .bind(image_id)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows)
    }
}

#[async_trait]
impl TaskRepo for PostgresStore {
    async fn enqueue_task(&self, task: &TaskRow) -> MetadataResult<()> {
        sqlx::query(
            r#"
            INSERT INTO workflow_tasks (
                task_id, image_id, kind, state, submission_id, attempt, force,
                run_after, last_error, created_at, updated_at
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11)
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
        // SKIP LOCKED lets concurrent workers claim different rows without blocking.
        let row = sqlx::query_as::<_, TaskRow>(
            r#"
            UPDATE workflow_tasks SET state = 'running', updated_at = $1
            WHERE task_id = (
                SELECT task_id FROM workflow_tasks
                WHERE state = 'queued' AND run_after <= $1
                ORDER BY run_after, created_at
                LIMIT 1
                FOR UPDATE SKIP LOCKED
            )
            RETURNING *
            "#,
        )
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
            SET state = 'queued', run_after = $1, attempt = $2, last_error = $3, updated_at = $4
            WHERE task_id = $5
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
            "UPDATE workflow_tasks SET state = $1, last_error = $2, updated_at = $3 WHERE task_id = $4",
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
        let row = sqlx::query_as::<_, TaskRow>("SELECT * FROM workflow_tasks WHERE task_id = $1")
            .bind(task_id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(row)
    }

    async fn list_tasks_for_image(&self, image_id: i64) -> MetadataResult<Vec<TaskRow>> {
        let rows = sqlx::query_as::<_, TaskRow>(
            "SELECT * FROM workflow_tasks WHERE image_id = $1 ORDER BY created_at",
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
                WHERE image_id = $1 AND kind = $2 AND state IN ('queued', 'running')
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
            "UPDATE workflow_tasks SET state = 'queued', run_after = $1, updated_at = $1 WHERE state = 'running'",
        )
        .bind(now)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected())
    }
}

#[async_trait]
impl LeaseRepo for PostgresStore {
    async fn try_acquire_lease(
        &self,
        name: &str,
        holder: &str,
        ttl: time::Duration,
        now: OffsetDateTime,
    ) -> MetadataResult<bool> {
        let result = sqlx::query(
            r#"
            INSERT INTO leases (name, holder, expires_at) VALUES ($1, $2, $3)
            ON CONFLICT(name) DO UPDATE SET
                holder = EXCLUDED.holder,
                expires_at = EXCLUDED.expires_at
            WHERE leases.expires_at <= $4 OR leases.holder = EXCLUDED.holder
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
        sqlx::query("DELETE FROM leases WHERE name = $1 AND holder = $2")
            .bind(name)
            .bind(holder)
            .execute(&self.pool)
            .await?;
        Ok(())
    }
}
