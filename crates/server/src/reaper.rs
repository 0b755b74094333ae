//! Stale submission reaper.
//!
//! Images whose in-flight submission has not been heartbeated for
//! `workflow.stale_after_secs` are forced to FAILED so they can be resubmitted.

use crate::metrics;
use skycat_core::AstrometryStatus;
use skycat_metadata::repos::ImageRepo;
use skycat_metadata::{MetadataResult, MetadataStore};
use std::sync::Arc;
use std::time::Duration;
use time::OffsetDateTime;
use tokio::task::JoinHandle;

/// Fail every in-flight image idle for longer than `stale_after`.
/// Returns the reaped image ids.
pub async fn reap_once(
    metadata: &dyn MetadataStore,
    stale_after: Duration,
) -> MetadataResult<Vec<i64>> {
    let now = OffsetDateTime::now_utc();
    let stale_after = time::Duration::try_from(stale_after).unwrap_or(time::Duration::MAX);
    let cutoff = now.saturating_sub(stale_after);

    let reaped = metadata.reap_stale(cutoff, now).await?;
    if !reaped.is_empty() {
        tracing::warn!(count = reaped.len(), images = ?reaped, "Reaped stale submissions");
        let count = reaped.len() as u64;
        metrics::IMAGES_REAPED.inc_by(count);
        metrics::WORKFLOW_TRANSITIONS
            .with_label_values(&[AstrometryStatus::Failed.as_str()])
            .inc_by(count);
    }
    Ok(reaped)
}

/// Spawn the periodic reaper loop.
pub fn spawn_reaper(
    metadata: Arc<dyn MetadataStore>,
    interval: Duration,
    stale_after: Duration,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        tracing::info!(
            interval_secs = interval.as_secs(),
            stale_after_secs = stale_after.as_secs(),
            "Stale submission reaper enabled"
        );
        let mut ticker = tokio::time::interval(interval);
        // The first tick completes immediately; startup recovery already ran.
        ticker.tick().await;
        loop {
            ticker.tick().await;
            if let Err(e) = reap_once(metadata.as_ref(), stale_after).await {
                tracing::error!(error = %e, "Reaper run failed");
            }
        }
    })
}
