//! Snapshot provider abstraction
//!
//! The broadcast loop only needs one read from the datastore: the latest
//! record per company. Anything that can answer that query can feed clients.

use async_trait::async_trait;
use liveview_core::{LiveviewResult, Snapshot};
use std::sync::Arc;

/// Source of per-company latest prices
#[async_trait]
pub trait SnapshotProvider: Send + Sync {
    /// Fetch the most recent record for each company, sorted by company
    ///
    /// Returns an empty snapshot when the dataset holds no records. Errors
    /// are reserved for connectivity and query failures.
    async fn fetch_latest_per_entity(&self) -> LiveviewResult<Snapshot>;
}

#[async_trait]
impl<P: SnapshotProvider + ?Sized> SnapshotProvider for Arc<P> {
    async fn fetch_latest_per_entity(&self) -> LiveviewResult<Snapshot> {
        (**self).fetch_latest_per_entity().await
    }
}
