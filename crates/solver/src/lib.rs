//! Plate-solving service client for skycat.
//!
//! [`PlateSolver`] is the seam the workflow drives; [`AstrometryClient`]
//! implements it over the astrometry.net HTTP API for both the public nova
//! service and self-hosted instances.

pub mod client;
pub mod error;
pub mod policy;

pub use client::AstrometryClient;
pub use error::{SolverError, SolverResult};

use async_trait::async_trait;
use bytes::Bytes;
use skycat_core::config::SolverConfig;
use skycat_core::{Calibration, ProviderKind, SolveHints};
use std::path::Path;
use std::sync::Arc;

/// Authenticated session key returned by login.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Session(String);

impl Session {
    pub fn new(key: impl Into<String>) -> Self {
        Self(key.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

/// Progress of a submission. Jobs appear once the solver picks it up.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct SubmissionStatus {
    pub jobs: Vec<Option<u64>>,
}

impl SubmissionStatus {
    /// First assigned job id, if any.
    pub fn first_job(&self) -> Option<String> {
        self.jobs.iter().flatten().next().map(|id| id.to_string())
    }
}

/// Outcome of a job as reported by the solver.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum JobStatus {
    Success,
    Failure,
    /// Still running, or any status the workflow keeps polling through.
    Other(String),
}

impl JobStatus {
    pub fn from_wire(status: &str) -> Self {
        match status {
            "success" => Self::Success,
            "failure" => Self::Failure,
            other => Self::Other(other.to_string()),
        }
    }
}

/// Operations of an astrometry.net-compatible plate solver.
#[async_trait]
pub trait PlateSolver: Send + Sync {
    /// Provider this solver talks to.
    fn provider(&self) -> ProviderKind;

    /// Exchange the API key for a session.
    async fn login(&self) -> SolverResult<Session>;

    /// Upload an image and return the submission id.
    async fn upload(
        &self,
        session: &Session,
        path: &Path,
        hints: &SolveHints,
    ) -> SolverResult<String>;

    /// Query a submission for assigned jobs.
    async fn submission_status(&self, submission_id: &str) -> SolverResult<SubmissionStatus>;

    /// Query the state of a job.
    async fn job_status(&self, job_id: &str) -> SolverResult<JobStatus>;

    /// Fetch the calibration of a solved job.
    async fn calibration(&self, job_id: &str) -> SolverResult<Calibration>;

    /// Download the FITS WCS file of a solved job.
    async fn distortion_header(&self, job_id: &str) -> SolverResult<Bytes>;

    /// Download the annotated preview image of a solved job.
    async fn annotated_preview(&self, job_id: &str) -> SolverResult<Bytes>;

    /// Human-facing status page for a submission.
    fn status_page_url(&self, submission_id: &str) -> String;
}

/// Build the configured solver.
///
/// A local provider missing its URL or key falls back to nova.
pub fn from_config(config: &SolverConfig) -> SolverResult<Arc<dyn PlateSolver>> {
    let provider = match config.provider {
        ProviderKind::Local if !config.local.is_complete() => {
            tracing::warn!("Local solver selected but api_url or api_key is missing, using nova");
            ProviderKind::Nova
        }
        provider => provider,
    };

    let endpoint = match provider {
        ProviderKind::Nova => &config.nova,
        ProviderKind::Local => &config.local,
    };
    let api_url = endpoint
        .api_url
        .as_deref()
        .unwrap_or(skycat_core::config::NOVA_API_URL);

    tracing::info!(provider = %provider, api_url = api_url, "Configured plate solver");
    let client = AstrometryClient::new(
        provider,
        api_url,
        endpoint.api_key.as_deref(),
        config.request_timeout(),
    )?;
    Ok(Arc::new(client) as Arc<dyn PlateSolver>)
}
