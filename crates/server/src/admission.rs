//! Admission control for submissions to the external solver.
//!
//! A single named lease serializes the count-then-reserve step across every
//! worker and process sharing the metadata store.

use crate::metrics;
use skycat_core::ProviderKind;
use skycat_core::config::AdmissionConfig;
use skycat_metadata::models::ImageRow;
use skycat_metadata::repos::{ImageRepo, LeaseRepo, SubmissionReservation};
use skycat_metadata::{MetadataResult, MetadataStore};
use std::sync::Arc;
use std::sync::atomic::{AtomicU32, Ordering};
use std::time::Duration;
use time::OffsetDateTime;
use tokio::time::Instant;
use uuid::Uuid;

/// Lease guarding the in-flight count.
pub const SUBMISSION_LOCK: &str = "astrometry:submission_lock";

const LOCK_POLL_INTERVAL: Duration = Duration::from_millis(50);

/// Why a submission was turned away.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum DenialReason {
    /// The submission lease could not be acquired in time.
    LockTimeout,
    /// The in-flight ceiling is reached.
    AtCapacity,
}

impl DenialReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::LockTimeout => "lock_timeout",
            Self::AtCapacity => "at_capacity",
        }
    }
}

/// Result of an admission attempt.
#[derive(Debug)]
pub enum Admission {
    /// Reserved; the image is now SUBMITTED. Carries the row as it was
    /// before the transition.
    Granted(ImageRow),
    /// Another submission is running, or the image is solved and not forced.
    AlreadyStarted(ImageRow),
    NotFound,
    Denied {
        retry_after: Duration,
        reason: DenialReason,
    },
}

/// Gate bounding concurrent solver submissions.
pub struct AdmissionGate {
    metadata: Arc<dyn MetadataStore>,
    config: AdmissionConfig,
    ceiling: AtomicU32,
    holder_prefix: String,
}

impl AdmissionGate {
    pub fn new(metadata: Arc<dyn MetadataStore>, config: AdmissionConfig) -> Self {
        let ceiling = AtomicU32::new(config.max_in_flight);
        Self {
            metadata,
            config,
            ceiling,
            holder_prefix: format!("skycatd-{}", std::process::id()),
        }
    }

    /// Current in-flight ceiling.
    pub fn ceiling(&self) -> u32 {
        self.ceiling.load(Ordering::Relaxed)
    }

    /// Adjust the in-flight ceiling at runtime.
    pub fn set_ceiling(&self, ceiling: u32) {
        tracing::info!(ceiling, "Admission ceiling changed");
        self.ceiling.store(ceiling, Ordering::Relaxed);
    }

    /// Try to reserve a submission slot for an image.
    pub async fn try_admit(
        &self,
        image_id: i64,
        provider: ProviderKind,
        force: bool,
    ) -> MetadataResult<Admission> {
        // Unique per attempt: the lease is re-entrant for the same holder.
        let holder = format!("{}:{}", self.holder_prefix, Uuid::new_v4());

        if !self.acquire(&holder).await? {
            tracing::warn!(image_id, "Timed out waiting for the submission lock");
            return Ok(self.deny(
                DenialReason::LockTimeout,
                Duration::from_secs(self.config.lock_retry_after_secs),
            ));
        }

        let result = self.admit_locked(image_id, provider, force).await;

        if let Err(e) = self.metadata.release_lease(SUBMISSION_LOCK, &holder).await {
            // The lease expires on its own after the TTL.
            tracing::error!(error = %e, "Failed to release the submission lock");
        }
        result
    }

    async fn acquire(&self, holder: &str) -> MetadataResult<bool> {
        let ttl = time::Duration::try_from(self.config.lock_ttl())
            .unwrap_or(time::Duration::seconds(10));
        let deadline = Instant::now() + self.config.lock_timeout();

        loop {
            let now = OffsetDateTime::now_utc();
            if self
                .metadata
                .try_acquire_lease(SUBMISSION_LOCK, holder, ttl, now)
                .await?
            {
                return Ok(true);
            }
            if Instant::now() >= deadline {
                return Ok(false);
            }
            tokio::time::sleep(LOCK_POLL_INTERVAL).await;
        }
    }

    async fn admit_locked(
        &self,
        image_id: i64,
        provider: ProviderKind,
        force: bool,
    ) -> MetadataResult<Admission> {
        // A busy or finished image is reported as such even at capacity
        let Some(row) = self.metadata.get_image(image_id).await? else {
            return Ok(Admission::NotFound);
        };
        if !row.status()?.can_submit(force) {
            return Ok(Admission::AlreadyStarted(row));
        }

        let in_flight = self.metadata.count_in_flight().await?;
        let ceiling = self.ceiling();
        if in_flight >= i64::from(ceiling) {
            tracing::info!(image_id, in_flight, ceiling, "Solver at capacity, deferring submission");
            return Ok(self.deny(
                DenialReason::AtCapacity,
                Duration::from_secs(self.config.retry_after_secs),
            ));
        }

        let reservation = self
            .metadata
            .begin_submission(image_id, provider, force, OffsetDateTime::now_utc())
            .await?;
        Ok(match reservation {
            SubmissionReservation::Reserved(previous) => {
                tracing::debug!(image_id, previous = %previous.astrometry_status, "Submission reserved");
                metrics::record_transition(skycat_core::AstrometryStatus::Submitted);
                Admission::Granted(previous)
            }
            SubmissionReservation::AlreadyStarted(row) => Admission::AlreadyStarted(row),
            SubmissionReservation::NotFound => Admission::NotFound,
        })
    }

    fn deny(&self, reason: DenialReason, retry_after: Duration) -> Admission {
        metrics::ADMISSION_DENIED
            .with_label_values(&[reason.as_str()])
            .inc();
        Admission::Denied {
            retry_after,
            reason,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use skycat_metadata::SqliteStore;
    use futures::future::join_all;
    use skycat_metadata::models::NewImage;

    async fn gate_with(config: AdmissionConfig) -> (Arc<dyn MetadataStore>, AdmissionGate) {
        let store: Arc<dyn MetadataStore> = Arc::new(SqliteStore::new(":memory:", None).await.unwrap());
        let gate = AdmissionGate::new(store.clone(), config);
        (store, gate)
    }

    async fn image(store: &Arc<dyn MetadataStore>, path: &str) -> i64 {
        store
            .insert_image(&NewImage {
                file_path: path.to_string(),
                ..NewImage::default()
            })
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn grants_then_reports_already_started() {
        let (store, gate) = gate_with(AdmissionConfig::default()).await;
        let id = image(&store, "/lights/m42.fits").await;

        let first = gate.try_admit(id, ProviderKind::Nova, false).await.unwrap();
        assert!(matches!(first, Admission::Granted(ref prev) if prev.astrometry_status == "NONE"));

        let second = gate.try_admit(id, ProviderKind::Nova, false).await.unwrap();
        assert!(matches!(second, Admission::AlreadyStarted(_)));

        assert!(matches!(
            gate.try_admit(9999, ProviderKind::Nova, false).await.unwrap(),
            Admission::NotFound
        ));
    }

    #[tokio::test]
    async fn denies_at_capacity() {
        let (store, gate) = gate_with(AdmissionConfig::default()).await;
        gate.set_ceiling(1);
        let a = image(&store, "/a.fits").await;
        let b = image(&store, "/b.fits").await;

        assert!(matches!(
            gate.try_admit(a, ProviderKind::Nova, false).await.unwrap(),
            Admission::Granted(_)
        ));
        let denied = gate.try_admit(b, ProviderKind::Nova, false).await.unwrap();
        assert!(matches!(
            denied,
            Admission::Denied {
                reason: DenialReason::AtCapacity,
                retry_after
            } if retry_after == Duration::from_secs(20)
        ));
        let row = store.get_image(b).await.unwrap().unwrap();
        assert_eq!(row.astrometry_status, "NONE");
    }

    #[tokio::test]
    async fn lock_timeout_when_lease_is_held() {
        let config = AdmissionConfig {
            lock_timeout_secs: 0,
            ..AdmissionConfig::default()
        };
        let (store, gate) = gate_with(config).await;
        let id = image(&store, "/held.fits").await;
        assert!(
            store
                .try_acquire_lease(
                    SUBMISSION_LOCK,
                    "someone-else",
                    time::Duration::seconds(60),
                    OffsetDateTime::now_utc()
                )
                .await
                .unwrap()
        );

        let denied = gate.try_admit(id, ProviderKind::Nova, false).await.unwrap();
        assert!(matches!(
            denied,
            Admission::Denied {
                reason: DenialReason::LockTimeout,
                retry_after
            } if retry_after == Duration::from_secs(5)
        ));
    }

    #[tokio::test]
    async fn lease_is_released_after_admission() {
        let (store, gate) = gate_with(AdmissionConfig::default()).await;
        let id = image(&store, "/m31.fits").await;
        gate.try_admit(id, ProviderKind::Local, false).await.unwrap();

        assert!(
            store
                .try_acquire_lease(
                    SUBMISSION_LOCK,
                    "next-holder",
                    time::Duration::seconds(1),
                    OffsetDateTime::now_utc()
                )
                .await
                .unwrap()
        );
    }

    #[tokio::test]
    async fn in_flight_image_at_capacity_is_already_started() {
        let (store, gate) = gate_with(AdmissionConfig::default()).await;
        gate.set_ceiling(1);
        let id = image(&store, "/busy.fits").await;
        assert!(matches!(
            gate.try_admit(id, ProviderKind::Nova, false).await.unwrap(),
            Admission::Granted(_)
        ));

        for force in [false, true] {
            let again = gate.try_admit(id, ProviderKind::Nova, force).await.unwrap();
            assert!(
                matches!(again, Admission::AlreadyStarted(ref row) if row.astrometry_status == "SUBMITTED"),
                "force={force}: {again:?}"
            );
        }
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_admissions_never_exceed_the_ceiling() {
        const CEILING: u32 = 3;
        let temp_dir = tempfile::tempdir().unwrap();
        let store: Arc<dyn MetadataStore> = Arc::new(
            SqliteStore::new(&temp_dir.path().join("admission.db"), None)
                .await
                .unwrap(),
        );
        let gate = Arc::new(AdmissionGate::new(store.clone(), AdmissionConfig::default()));
        gate.set_ceiling(CEILING);

        let mut ids = Vec::new();
        for n in 0..CEILING * 3 {
            ids.push(image(&store, &format!("/race/{n}.fits")).await);
        }

        let attempts = ids.into_iter().map(|id| {
            let gate = gate.clone();
            tokio::spawn(async move { gate.try_admit(id, ProviderKind::Nova, false).await })
        });
        let results: Vec<Admission> = join_all(attempts)
            .await
            .into_iter()
            .map(|joined| joined.unwrap().unwrap())
            .collect();

        let granted = results
            .iter()
            .filter(|r| matches!(r, Admission::Granted(_)))
            .count();
        assert_eq!(granted, CEILING as usize);
        assert!(
            results
                .iter()
                .all(|r| matches!(r, Admission::Granted(_) | Admission::Denied { .. }))
        );
        let in_flight = store.count_in_flight().await.unwrap();
        assert!(in_flight <= i64::from(CEILING), "{in_flight}");
        assert_eq!(in_flight, i64::from(CEILING));
    }
}
