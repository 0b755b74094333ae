//! Configuration types shared across crates.

use crate::astrometry::ProviderKind;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

/// HTTP server configuration.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ServerConfig {
    /// Bind address (e.g., "0.0.0.0:8080").
    #[serde(default = "default_bind")]
    pub bind: String,
    /// Enable the /metrics endpoint for Prometheus scraping (default: true).
    #[serde(default = "default_metrics_enabled")]
    pub metrics_enabled: bool,
}

fn default_bind() -> String {
    "127.0.0.1:8090".to_string()
}

fn default_metrics_enabled() -> bool {
    true
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: default_bind(),
            metrics_enabled: default_metrics_enabled(),
        }
    }
}

/// PostgreSQL SSL mode configuration.
#[derive(Clone, Copy, Debug, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum PgSslMode {
    /// Disable SSL/TLS entirely.
    Disable,
    /// Prefer SSL/TLS but allow unencrypted connections (default).
    #[default]
    Prefer,
    /// Require SSL/TLS for all connections.
    Require,
}

/// Metadata store configuration.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum MetadataConfig {
    /// SQLite database (single process deployments and tests).
    Sqlite {
        /// Database file path.
        path: PathBuf,
        /// Query timeout in seconds. Advisory only: slow queries are logged,
        /// not cancelled.
        #[serde(default = "default_sqlite_query_timeout_secs")]
        query_timeout_secs: Option<u64>,
    },
    /// PostgreSQL database.
    Postgres {
        /// Connection URL. Takes precedence over the individual fields.
        url: Option<String>,
        /// Database host.
        host: Option<String>,
        /// Database port (default: 5432).
        #[serde(default = "default_pg_port")]
        port: Option<u16>,
        /// Database username.
        username: Option<String>,
        /// Database password.
        /// Prefer SKYCAT_METADATA__PASSWORD over storing it in the file.
        password: Option<String>,
        /// Database name.
        database: Option<String>,
        /// SSL mode for connections.
        ssl_mode: Option<PgSslMode>,
        /// Maximum connections in the pool.
        #[serde(default = "default_max_connections")]
        max_connections: u32,
        /// Statement timeout in milliseconds.
        #[serde(default = "default_statement_timeout_ms")]
        statement_timeout_ms: Option<u64>,
    },
}

fn default_max_connections() -> u32 {
    10
}

fn default_pg_port() -> Option<u16> {
    Some(5432)
}

fn default_statement_timeout_ms() -> Option<u64> {
    Some(30_000) // 30 seconds
}

fn default_sqlite_query_timeout_secs() -> Option<u64> {
    Some(30)
}

impl Default for MetadataConfig {
    fn default() -> Self {
        Self::Sqlite {
            path: PathBuf::from("./data/skycat.db"),
            query_timeout_secs: default_sqlite_query_timeout_secs(),
        }
    }
}

impl MetadataConfig {
    /// Validate metadata configuration invariants.
    pub fn validate(&self) -> Result<(), String> {
        match self {
            MetadataConfig::Sqlite { .. } => Ok(()),
            MetadataConfig::Postgres {
                url,
                host,
                database,
                max_connections,
                ..
            } => {
                if *max_connections == 0 {
                    return Err("metadata.max_connections must be at least 1".to_string());
                }
                match (url.as_ref(), host.as_ref(), database.as_ref()) {
                    (Some(_), _, _) => Ok(()),
                    (None, Some(_), Some(_)) => Ok(()),
                    (None, None, _) => Err(
                        "postgres config requires either 'url' or 'host' + 'database'".to_string(),
                    ),
                    (None, Some(_), None) => Err(
                        "postgres config requires 'database' when using individual fields"
                            .to_string(),
                    ),
                }
            }
        }
    }
}

/// Endpoint of one astrometry.net-compatible service.
#[derive(Clone, Debug, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct ProviderEndpoint {
    /// API base URL, ending in `/api`.
    #[serde(default)]
    pub api_url: Option<String>,
    /// API key sent at login.
    #[serde(default)]
    pub api_key: Option<String>,
}

impl ProviderEndpoint {
    /// Both URL and key are present and non-blank.
    pub fn is_complete(&self) -> bool {
        let present = |v: &Option<String>| v.as_deref().is_some_and(|s| !s.trim().is_empty());
        present(&self.api_url) && present(&self.api_key)
    }
}

/// Plate solver configuration.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct SolverConfig {
    /// Which provider handles new submissions.
    #[serde(default)]
    pub provider: ProviderKind,
    /// nova.astrometry.net settings.
    #[serde(default = "default_nova_endpoint")]
    pub nova: ProviderEndpoint,
    /// Self-hosted astrometry.net settings.
    #[serde(default)]
    pub local: ProviderEndpoint,
    /// Timeout for a single HTTP request to the solver.
    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,
}

pub const NOVA_API_URL: &str = "http://nova.astrometry.net/api";

fn default_nova_endpoint() -> ProviderEndpoint {
    ProviderEndpoint {
        api_url: Some(NOVA_API_URL.to_string()),
        api_key: None,
    }
}

fn default_request_timeout_secs() -> u64 {
    60
}

impl Default for SolverConfig {
    fn default() -> Self {
        Self {
            provider: ProviderKind::default(),
            nova: default_nova_endpoint(),
            local: ProviderEndpoint::default(),
            request_timeout_secs: default_request_timeout_secs(),
        }
    }
}

impl SolverConfig {
    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    /// Validate solver configuration invariants.
    pub fn validate(&self) -> Result<(), String> {
        if self.request_timeout_secs == 0 {
            return Err("solver.request_timeout_secs cannot be 0".to_string());
        }
        Ok(())
    }
}

/// Admission control for submissions to the external solver.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct AdmissionConfig {
    /// Maximum number of images in SUBMITTED or PROCESSING at once.
    #[serde(default = "default_max_in_flight")]
    pub max_in_flight: u32,
    /// How long to wait for the submission lease.
    #[serde(default = "default_lock_timeout_secs")]
    pub lock_timeout_secs: u64,
    /// Lease lifetime; a crashed holder loses the lease after this.
    #[serde(default = "default_lock_ttl_secs")]
    pub lock_ttl_secs: u64,
    /// Retry delay after failing to get the lease.
    #[serde(default = "default_lock_retry_after_secs")]
    pub lock_retry_after_secs: u64,
    /// Retry delay when the ceiling is reached.
    #[serde(default = "default_retry_after_secs")]
    pub retry_after_secs: u64,
}

fn default_max_in_flight() -> u32 {
    8
}

fn default_lock_timeout_secs() -> u64 {
    10
}

fn default_lock_ttl_secs() -> u64 {
    10
}

fn default_lock_retry_after_secs() -> u64 {
    5
}

fn default_retry_after_secs() -> u64 {
    20
}

impl Default for AdmissionConfig {
    fn default() -> Self {
        Self {
            max_in_flight: default_max_in_flight(),
            lock_timeout_secs: default_lock_timeout_secs(),
            lock_ttl_secs: default_lock_ttl_secs(),
            lock_retry_after_secs: default_lock_retry_after_secs(),
            retry_after_secs: default_retry_after_secs(),
        }
    }
}

impl AdmissionConfig {
    pub fn lock_timeout(&self) -> Duration {
        Duration::from_secs(self.lock_timeout_secs)
    }

    pub fn lock_ttl(&self) -> Duration {
        Duration::from_secs(self.lock_ttl_secs)
    }

    pub fn validate(&self) -> Result<(), String> {
        if self.lock_ttl_secs == 0 {
            return Err("admission.lock_ttl_secs cannot be 0".to_string());
        }
        Ok(())
    }
}

/// Durable workflow (submit, monitor, reaper) configuration.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct WorkflowConfig {
    /// Concurrent worker slots.
    #[serde(default = "default_workers")]
    pub workers: usize,
    /// Delay between monitor polls.
    #[serde(default = "default_poll_interval_secs")]
    pub poll_interval_secs: u64,
    /// Monitor polls before an image is marked FAILED.
    #[serde(default = "default_max_poll_attempts")]
    pub max_poll_attempts: u32,
    /// First delay after a transient upload failure; doubles per attempt.
    #[serde(default = "default_submit_retry_base_secs")]
    pub submit_retry_base_secs: u64,
    /// Upper bound for the upload retry delay.
    #[serde(default = "default_submit_retry_max_secs")]
    pub submit_retry_max_secs: u64,
    /// Upload attempts before giving up (default: unlimited).
    #[serde(default)]
    pub submit_max_attempts: Option<u32>,
    /// How often idle workers look for due tasks, in milliseconds.
    #[serde(default = "default_idle_poll_ms")]
    pub idle_poll_ms: u64,
    /// Reaper sweep interval.
    #[serde(default = "default_reaper_interval_secs")]
    pub reaper_interval_secs: u64,
    /// In-flight images untouched for this long are reaped.
    #[serde(default = "default_stale_after_secs")]
    pub stale_after_secs: u64,
    /// Directory for downloaded annotated previews.
    #[serde(default = "default_preview_dir")]
    pub preview_dir: PathBuf,
}

fn default_workers() -> usize {
    4
}

fn default_poll_interval_secs() -> u64 {
    15
}

fn default_max_poll_attempts() -> u32 {
    45 // about 11 minutes at the default interval
}

fn default_submit_retry_base_secs() -> u64 {
    30
}

fn default_submit_retry_max_secs() -> u64 {
    600 // 10 minutes
}

fn default_idle_poll_ms() -> u64 {
    500
}

fn default_reaper_interval_secs() -> u64 {
    300 // 5 minutes
}

fn default_stale_after_secs() -> u64 {
    300 // 5 minutes
}

fn default_preview_dir() -> PathBuf {
    PathBuf::from("./data/previews")
}

impl Default for WorkflowConfig {
    fn default() -> Self {
        Self {
            workers: default_workers(),
            poll_interval_secs: default_poll_interval_secs(),
            max_poll_attempts: default_max_poll_attempts(),
            submit_retry_base_secs: default_submit_retry_base_secs(),
            submit_retry_max_secs: default_submit_retry_max_secs(),
            submit_max_attempts: None,
            idle_poll_ms: default_idle_poll_ms(),
            reaper_interval_secs: default_reaper_interval_secs(),
            stale_after_secs: default_stale_after_secs(),
            preview_dir: default_preview_dir(),
        }
    }
}

impl WorkflowConfig {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_secs(self.poll_interval_secs)
    }

    pub fn idle_poll(&self) -> Duration {
        Duration::from_millis(self.idle_poll_ms)
    }

    pub fn reaper_interval(&self) -> Duration {
        Duration::from_secs(self.reaper_interval_secs)
    }

    pub fn stale_after(&self) -> Duration {
        Duration::from_secs(self.stale_after_secs)
    }

    /// Delay before upload attempt `attempt + 1`, after `attempt` failures.
    pub fn submit_backoff(&self, attempt: u32) -> Duration {
        let factor = 1u64.checked_shl(attempt.saturating_sub(1)).unwrap_or(u64::MAX);
        let secs = self
            .submit_retry_base_secs
            .saturating_mul(factor)
            .min(self.submit_retry_max_secs);
        Duration::from_secs(secs)
    }

    /// Validate workflow configuration for settings that would stall or panic.
    pub fn validate(&self) -> Result<(), String> {
        if self.workers == 0 {
            return Err("workflow.workers must be at least 1".to_string());
        }
        if self.max_poll_attempts == 0 {
            return Err("workflow.max_poll_attempts must be at least 1".to_string());
        }
        // tokio::time::interval panics on a zero period
        if self.reaper_interval_secs == 0 {
            return Err("workflow.reaper_interval_secs cannot be 0".to_string());
        }
        if self.idle_poll_ms == 0 {
            return Err("workflow.idle_poll_ms cannot be 0".to_string());
        }
        if self.submit_retry_base_secs > self.submit_retry_max_secs {
            return Err(format!(
                "workflow.submit_retry_base_secs {} exceeds submit_retry_max_secs {}",
                self.submit_retry_base_secs, self.submit_retry_max_secs
            ));
        }
        Ok(())
    }
}

/// Catalog matching configuration.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct MatchingConfig {
    /// Search radius when the image has no field radius.
    #[serde(default = "default_radius_degrees")]
    pub default_radius_degrees: f64,
    /// Pixels outside the image edges that still count as in frame.
    #[serde(default = "default_bounds_margin_px")]
    pub bounds_margin_px: f64,
    /// Separation at which confidence reaches zero.
    #[serde(default = "default_confidence_normalization_deg")]
    pub confidence_normalization_deg: f64,
    /// Per-query cap for MESSIER (default: none).
    #[serde(default)]
    pub messier_limit: Option<u32>,
    /// Per-query cap for NGC (also holds IC objects).
    #[serde(default = "default_catalog_limit")]
    pub ngc_limit: Option<u32>,
    /// Per-query cap for NAMED_STAR.
    #[serde(default = "default_catalog_limit")]
    pub named_star_limit: Option<u32>,
}

fn default_radius_degrees() -> f64 {
    1.0
}

fn default_bounds_margin_px() -> f64 {
    100.0
}

fn default_confidence_normalization_deg() -> f64 {
    5.0
}

fn default_catalog_limit() -> Option<u32> {
    Some(50)
}

impl Default for MatchingConfig {
    fn default() -> Self {
        Self {
            default_radius_degrees: default_radius_degrees(),
            bounds_margin_px: default_bounds_margin_px(),
            confidence_normalization_deg: default_confidence_normalization_deg(),
            messier_limit: None,
            ngc_limit: default_catalog_limit(),
            named_star_limit: default_catalog_limit(),
        }
    }
}

impl MatchingConfig {
    /// Result cap for one catalog kind.
    pub fn limit_for(&self, kind: crate::catalog::CatalogKind) -> Option<u32> {
        use crate::catalog::CatalogKind;
        match kind {
            CatalogKind::Messier => self.messier_limit,
            CatalogKind::Ngc => self.ngc_limit,
            CatalogKind::NamedStar => self.named_star_limit,
        }
    }

    pub fn validate(&self) -> Result<(), String> {
        if !(self.default_radius_degrees > 0.0 && self.default_radius_degrees <= 180.0) {
            return Err(format!(
                "matching.default_radius_degrees {} must be in (0, 180]",
                self.default_radius_degrees
            ));
        }
        if !(self.confidence_normalization_deg > 0.0) {
            return Err("matching.confidence_normalization_deg must be positive".to_string());
        }
        if !(self.bounds_margin_px >= 0.0) {
            return Err("matching.bounds_margin_px cannot be negative".to_string());
        }
        Ok(())
    }
}

/// Complete application configuration.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct AppConfig {
    /// HTTP server configuration.
    #[serde(default)]
    pub server: ServerConfig,
    /// Metadata store configuration.
    #[serde(default)]
    pub metadata: MetadataConfig,
    /// Plate solver configuration.
    #[serde(default)]
    pub solver: SolverConfig,
    /// Submission admission control.
    #[serde(default)]
    pub admission: AdmissionConfig,
    /// Durable workflow configuration.
    #[serde(default)]
    pub workflow: WorkflowConfig,
    /// Catalog matching configuration.
    #[serde(default)]
    pub matching: MatchingConfig,
}

impl AppConfig {
    /// Create a test configuration with sensible defaults.
    ///
    /// **For testing only.** Uses SQLite metadata and short workflow delays.
    pub fn for_testing() -> Self {
        Self {
            workflow: WorkflowConfig {
                poll_interval_secs: 0,
                submit_retry_base_secs: 0,
                idle_poll_ms: 10,
                ..WorkflowConfig::default()
            },
            ..Self::default()
        }
    }

    /// Validate every section.
    pub fn validate(&self) -> Result<(), String> {
        self.metadata.validate()?;
        self.solver.validate()?;
        self.admission.validate()?;
        self.workflow.validate()?;
        self.matching.validate()?;
        Ok(())
    }
}
