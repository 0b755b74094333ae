//! Scripted plate solver for workflow tests.

use async_trait::async_trait;
use bytes::Bytes;
use skycat_core::{Calibration, ProviderKind, SolveHints};
use skycat_solver::{JobStatus, PlateSolver, Session, SolverError, SolverResult, SubmissionStatus};
use std::collections::VecDeque;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

/// Job id handed out once a submission is picked up.
pub const MOCK_JOB_ID: u64 = 4242;

/// A `PlateSolver` whose answers are queued up front.
///
/// Scripted responses are consumed in order; once a script runs dry the
/// solver falls back to assigning `MOCK_JOB_ID` and reporting `success`.
/// Note: #[allow(dead_code)] because each test file compiles common/ separately.
#[allow(dead_code)]
pub struct MockSolver {
    provider: ProviderKind,
    next_submission: AtomicUsize,
    upload_errors: Mutex<VecDeque<SolverError>>,
    submission_script: Mutex<VecDeque<SolverResult<SubmissionStatus>>>,
    job_script: Mutex<VecDeque<JobStatus>>,
    calibration: Mutex<Option<Calibration>>,
    distortion: Mutex<Option<Bytes>>,
    preview: Mutex<Option<Bytes>>,
    panic_on_job_status: AtomicBool,
    pub logins: AtomicUsize,
    pub uploads: Mutex<Vec<(PathBuf, SolveHints)>>,
    pub submission_polls: AtomicUsize,
    pub job_polls: AtomicUsize,
}

#[allow(dead_code)]
impl MockSolver {
    pub fn new() -> Self {
        Self {
            provider: ProviderKind::Nova,
            next_submission: AtomicUsize::new(1000),
            upload_errors: Mutex::new(VecDeque::new()),
            submission_script: Mutex::new(VecDeque::new()),
            job_script: Mutex::new(VecDeque::new()),
            calibration: Mutex::new(Some(orion_calibration())),
            distortion: Mutex::new(None),
            preview: Mutex::new(None),
            panic_on_job_status: AtomicBool::new(false),
            logins: AtomicUsize::new(0),
            uploads: Mutex::new(Vec::new()),
            submission_polls: AtomicUsize::new(0),
            job_polls: AtomicUsize::new(0),
        }
    }

    pub fn fail_next_upload(&self, error: SolverError) {
        self.upload_errors.lock().unwrap().push_back(error);
    }

    /// Queue `n` submission polls that report no job yet.
    pub fn pending_submission_polls(&self, n: usize) {
        let mut script = self.submission_script.lock().unwrap();
        for _ in 0..n {
            script.push_back(Ok(SubmissionStatus { jobs: vec![] }));
        }
    }

    pub fn fail_next_submission_poll(&self, error: SolverError) {
        self.submission_script.lock().unwrap().push_back(Err(error));
    }

    pub fn push_job_status(&self, status: JobStatus) {
        self.job_script.lock().unwrap().push_back(status);
    }

    /// Report `status` for the next `polls` job polls.
    pub fn repeat_job_status(&self, status: JobStatus, polls: usize) {
        let mut script = self.job_script.lock().unwrap();
        for _ in 0..polls {
            script.push_back(status.clone());
        }
    }

    pub fn set_calibration(&self, calibration: Option<Calibration>) {
        *self.calibration.lock().unwrap() = calibration;
    }

    pub fn set_distortion(&self, fits: Bytes) {
        *self.distortion.lock().unwrap() = Some(fits);
    }

    pub fn set_preview(&self, jpeg: Bytes) {
        *self.preview.lock().unwrap() = Some(jpeg);
    }

    pub fn panic_on_job_status(&self) {
        self.panic_on_job_status.store(true, Ordering::SeqCst);
    }

    pub fn upload_count(&self) -> usize {
        self.uploads.lock().unwrap().len()
    }

    pub fn last_hints(&self) -> Option<SolveHints> {
        self.uploads.lock().unwrap().last().map(|(_, h)| h.clone())
    }
}

/// Calibration of a field centered on M42.
pub fn orion_calibration() -> Calibration {
    Calibration {
        ra: 83.82,
        dec: -5.39,
        radius: 1.2,
        pixscale: 1.8,
        orientation: -92.0,
        parity: 1.0,
    }
}

#[async_trait]
impl PlateSolver for MockSolver {
    fn provider(&self) -> ProviderKind {
        self.provider
    }

    async fn login(&self) -> SolverResult<Session> {
        self.logins.fetch_add(1, Ordering::SeqCst);
        Ok(Session::new("mock-session"))
    }

    async fn upload(
        &self,
        _session: &Session,
        path: &Path,
        hints: &SolveHints,
    ) -> SolverResult<String> {
        if let Some(err) = self.upload_errors.lock().unwrap().pop_front() {
            return Err(err);
        }
        self.uploads
            .lock()
            .unwrap()
            .push((path.to_path_buf(), hints.clone()));
        let id = self.next_submission.fetch_add(1, Ordering::SeqCst);
        Ok(id.to_string())
    }

    async fn submission_status(&self, _submission_id: &str) -> SolverResult<SubmissionStatus> {
        self.submission_polls.fetch_add(1, Ordering::SeqCst);
        let scripted = self.submission_script.lock().unwrap().pop_front();
        match scripted {
            Some(scripted) => scripted,
            None => Ok(SubmissionStatus {
                jobs: vec![None, Some(MOCK_JOB_ID)],
            }),
        }
    }

    async fn job_status(&self, _job_id: &str) -> SolverResult<JobStatus> {
        self.job_polls.fetch_add(1, Ordering::SeqCst);
        if self.panic_on_job_status.load(Ordering::SeqCst) {
            panic!("mock solver returned garbage");
        }
        Ok(self
            .job_script
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or(JobStatus::Success))
    }

    async fn calibration(&self, job_id: &str) -> SolverResult<Calibration> {
        self.calibration
            .lock()
            .unwrap()
            .clone()
            .ok_or_else(|| SolverError::Api {
                status: 404,
                body: format!("no calibration for job {job_id}"),
            })
    }

    async fn distortion_header(&self, job_id: &str) -> SolverResult<Bytes> {
        self.distortion
            .lock()
            .unwrap()
            .clone()
            .ok_or_else(|| SolverError::Api {
                status: 404,
                body: format!("no wcs file for job {job_id}"),
            })
    }

    async fn annotated_preview(&self, job_id: &str) -> SolverResult<Bytes> {
        self.preview
            .lock()
            .unwrap()
            .clone()
            .ok_or_else(|| SolverError::Rejected(format!("no preview for job {job_id}")))
    }

    fn status_page_url(&self, submission_id: &str) -> String {
        format!("http://nova.astrometry.net/status/{submission_id}")
    }
}
