//! The local library: reconciling remotely listed entries into the store.

mod reconcile;

use anyhow::Result;
use async_trait::async_trait;

use crate::storage::Entry;

pub use reconcile::Reconciler;

/// Persistence the reconciler needs.
#[async_trait]
pub trait EntryStore: Send + Sync {
    async fn find_by_identity(&self, url: &str, source_id: i64) -> Result<Option<Entry>>;

    /// Insert a new entry and return its id.
    ///
    /// Returns `Ok(None)` when the store already holds an entry with the same
    /// `(url, source_id)`; the existing entry is left as it was.
    async fn insert(&self, entry: &Entry) -> Result<Option<i64>>;
}
