//! Named lease locks.

use crate::error::MetadataResult;
use async_trait::async_trait;
use time::{Duration, OffsetDateTime};

/// Repository for named, expiring locks shared by every process using the
/// same database.
#[async_trait]
pub trait LeaseRepo: Send + Sync {
    /// Take lease `name` for `holder` until `now + ttl`.
    ///
    /// Succeeds when the lease is free, expired, or already held by `holder`.
    async fn try_acquire_lease(
        &self,
        name: &str,
        holder: &str,
        ttl: Duration,
        now: OffsetDateTime,
    ) -> MetadataResult<bool>;

    /// Release lease `name` if `holder` still owns it.
    async fn release_lease(&self, name: &str, holder: &str) -> MetadataResult<()>;
}
