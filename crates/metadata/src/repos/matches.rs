//! Image/catalog match repository.

use crate::error::MetadataResult;
use crate::models::MatchRow;
use async_trait::async_trait;

/// Repository for image/catalog associations.
#[async_trait]
pub trait MatchRepo: Send + Sync {
    /// Atomically delete the image's AUTOMATIC matches and insert `matches`.
    ///
    /// Rows whose key is already held by a MANUAL or HEADER match are skipped.
    /// Returns the number of rows inserted.
    async fn replace_automatic_matches(
        &self,
        image_id: i64,
        matches: &[MatchRow],
    ) -> MetadataResult<u64>;

    /// Insert a single match. Returns false if the key already exists.
    async fn insert_match(&self, record: &MatchRow) -> MetadataResult<bool>;

    /// Matches of an image, nearest first.
    async fn list_matches(&self, image_id: i64) -> MetadataResult<Vec<MatchRow>>;
}
