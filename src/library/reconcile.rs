use anyhow::{anyhow, Context, Result};
use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};
use tokio::sync::OwnedMutexGuard;

use super::EntryStore;
use crate::source::SourceEntry;
use crate::storage::Entry;

type Identity = (String, i64);

/// Merges remotely listed entries into the local store, once per identity.
///
/// Lookup-then-insert for one `(url, source_id)` runs under a per-identity
/// lock, so concurrent reconciliations of the same entry never insert twice.
/// If the store still reports a uniqueness conflict (another process got
/// there first) the existing row is re-read.
pub struct Reconciler<S> {
    store: Arc<S>,
    locks: IdentityLocks,
}

impl<S: EntryStore> Reconciler<S> {
    pub fn new(store: Arc<S>) -> Self {
        Self {
            store,
            locks: IdentityLocks::default(),
        }
    }

    /// Return the canonical local entry for `remote`.
    ///
    /// - unknown identity: insert `remote`, return it with the new id
    /// - known, not favorite: local entry with the source's current title
    /// - known, favorite: local entry unchanged
    ///
    /// `remote.id` is ignored.
    pub async fn reconcile(&self, remote: &Entry) -> Result<Entry> {
        let _guard = self.locks.lock(&remote.url, remote.source_id).await;

        let local = self
            .store
            .find_by_identity(&remote.url, remote.source_id)
            .await
            .with_context(|| format!("Failed to look up entry {}", remote.url))?;

        if let Some(local) = local {
            return Ok(merge(local, remote));
        }

        let inserted = self
            .store
            .insert(remote)
            .await
            .with_context(|| format!("Failed to insert entry {}", remote.url))?;

        match inserted {
            Some(id) => {
                tracing::debug!(entry_id = id, source_id = remote.source_id, url = %remote.url, "New entry added to library");
                Ok(Entry {
                    id,
                    ..remote.clone()
                })
            }
            None => {
                tracing::debug!(source_id = remote.source_id, url = %remote.url, "Insert conflict, re-reading entry");
                let local = self
                    .store
                    .find_by_identity(&remote.url, remote.source_id)
                    .await?
                    .ok_or_else(|| anyhow!("Entry {} conflicted on insert but is missing", remote.url))?;
                Ok(merge(local, remote))
            }
        }
    }

    /// Reconcile a page of listed entries, preserving order.
    pub async fn reconcile_all(&self, source_id: i64, listed: &[SourceEntry]) -> Result<Vec<Entry>> {
        let mut entries = Vec::with_capacity(listed.len());
        for item in listed {
            entries.push(self.reconcile(&item.to_entry(source_id)).await?);
        }
        Ok(entries)
    }
}

/// Favorited entries keep the title they were saved with; the rest follow
/// the source.
fn merge(local: Entry, remote: &Entry) -> Entry {
    if local.favorite {
        local
    } else {
        Entry {
            title: remote.title.clone(),
            ..local
        }
    }
}

/// One async mutex per identity, created on demand and dropped once no task
/// holds or waits on it. Entries orphaned by a cancelled waiter are pruned on
/// the next `lock`.
#[derive(Default)]
struct IdentityLocks {
    inner: Mutex<HashMap<Identity, Arc<tokio::sync::Mutex<()>>>>,
}

impl IdentityLocks {
    async fn lock(&self, url: &str, source_id: i64) -> IdentityGuard<'_> {
        let key = (url.to_string(), source_id);
        let mutex = {
            let mut map = self.inner.lock().unwrap_or_else(PoisonError::into_inner);
            // Waiters cancelled after the holder left skip the guard's cleanup
            map.retain(|_, mutex| Arc::strong_count(mutex) > 1);
            map.entry(key.clone()).or_default().clone()
        };
        let guard = mutex.lock_owned().await;
        IdentityGuard {
            locks: self,
            key,
            guard: Some(guard),
        }
    }

    #[cfg(test)]
    fn len(&self) -> usize {
        self.inner
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }
}

struct IdentityGuard<'a> {
    locks: &'a IdentityLocks,
    key: Identity,
    guard: Option<OwnedMutexGuard<()>>,
}

impl Drop for IdentityGuard<'_> {
    fn drop(&mut self) {
        let mut map = self
            .locks
            .inner
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        drop(self.guard.take());
        // Only the map's own handle left: nobody holds or waits on it
        if map
            .get(&self.key)
            .is_some_and(|mutex| Arc::strong_count(mutex) == 1)
        {
            map.remove(&self.key);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::Database;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    async fn test_db() -> Arc<Database> {
        Arc::new(Database::open(":memory:").await.unwrap())
    }

    fn remote(url: &str, title: &str) -> Entry {
        SourceEntry {
            url: url.to_string(),
            title: title.to_string(),
            thumbnail_url: Some(format!("https://img.example.com{url}.jpg")),
            author: None,
            description: None,
        }
        .to_entry(42)
    }

    #[tokio::test]
    async fn test_first_reconcile_inserts_entry() {
        let db = test_db().await;
        let reconciler = Reconciler::new(db.clone());

        let entry = reconciler.reconcile(&remote("/s/1", "One")).await.unwrap();
        assert!(entry.id > 0);
        assert_eq!(entry.title, "One");

        let stored = db.get_entry(entry.id).await.unwrap().unwrap();
        assert_eq!(stored.url, "/s/1");
        assert_eq!(stored.title, "One");
        assert_eq!(stored.thumbnail_url, entry.thumbnail_url);
    }

    #[tokio::test]
    async fn test_reconcile_twice_keeps_one_entry() {
        let db = test_db().await;
        let reconciler = Reconciler::new(db.clone());

        let first = reconciler.reconcile(&remote("/s/1", "One")).await.unwrap();
        let second = reconciler.reconcile(&remote("/s/1", "One")).await.unwrap();

        assert_eq!(first.id, second.id);
        assert_eq!(db.count_entries_for_identity("/s/1", 42).await.unwrap(), 1);
        assert_eq!(reconciler.locks.len(), 0);
    }

    #[tokio::test]
    async fn test_non_favorite_title_follows_source() {
        let db = test_db().await;
        let reconciler = Reconciler::new(db.clone());
        let first = reconciler.reconcile(&remote("/s/1", "A")).await.unwrap();

        let again = reconciler.reconcile(&remote("/s/1", "B")).await.unwrap();
        assert_eq!(again.id, first.id);
        assert_eq!(again.title, "B");
    }

    #[tokio::test]
    async fn test_favorite_title_is_preserved() {
        let db = test_db().await;
        let reconciler = Reconciler::new(db.clone());
        let first = reconciler.reconcile(&remote("/s/1", "A")).await.unwrap();
        db.set_entry_favorite(first.id, true, None).await.unwrap();

        let again = reconciler.reconcile(&remote("/s/1", "B")).await.unwrap();
        assert_eq!(again.title, "A");
        assert!(again.favorite);
    }

    #[tokio::test]
    async fn test_concurrent_reconcile_same_identity() {
        let db = test_db().await;
        let reconciler = Arc::new(Reconciler::new(db.clone()));

        let handles: Vec<_> = (0..8)
            .map(|_| {
                let reconciler = reconciler.clone();
                tokio::spawn(async move { reconciler.reconcile(&remote("/s/1", "One")).await })
            })
            .collect();

        let mut ids = Vec::new();
        for handle in handles {
            ids.push(handle.await.unwrap().unwrap().id);
        }

        ids.sort_unstable();
        ids.dedup();
        assert_eq!(ids.len(), 1);
        assert_eq!(db.count_entries_for_identity("/s/1", 42).await.unwrap(), 1);
        assert_eq!(reconciler.locks.len(), 0);
    }

    #[tokio::test]
    async fn test_cancelled_waiter_entry_is_pruned() {
        use futures::FutureExt;

        let locks = IdentityLocks::default();
        let held = locks.lock("/s/1", 42).await;

        let mut waiter = Box::pin(locks.lock("/s/1", 42));
        assert!((&mut waiter).now_or_never().is_none());

        drop(held);
        drop(waiter);
        assert_eq!(locks.len(), 1);

        let other = locks.lock("/s/2", 42).await;
        assert_eq!(locks.len(), 1);
        drop(other);
        assert_eq!(locks.len(), 0);
    }

    /// Store whose lookups never see rows, so every insert conflicts after
    /// the first, like a second process racing us.
    struct BlindStore {
        db: Arc<Database>,
        lookups: AtomicUsize,
    }

    #[async_trait]
    impl EntryStore for BlindStore {
        async fn find_by_identity(&self, url: &str, source_id: i64) -> Result<Option<Entry>> {
            // The first lookup of each reconcile is blind, the re-read is not
            if self.lookups.fetch_add(1, Ordering::SeqCst) % 2 == 0 {
                return Ok(None);
            }
            self.db.find_entry_by_identity(url, source_id).await
        }

        async fn insert(&self, entry: &Entry) -> Result<Option<i64>> {
            self.db.insert_entry(entry).await
        }
    }

    #[tokio::test]
    async fn test_insert_conflict_falls_back_to_reread() {
        let db = test_db().await;
        let existing = db.insert_entry(&remote("/s/1", "Stored")).await.unwrap().unwrap();
        db.set_entry_favorite(existing, true, None).await.unwrap();

        let store = Arc::new(BlindStore {
            db: db.clone(),
            lookups: AtomicUsize::new(0),
        });
        let reconciler = Reconciler::new(store);

        let entry = reconciler.reconcile(&remote("/s/1", "Listed")).await.unwrap();
        assert_eq!(entry.id, existing);
        assert_eq!(entry.title, "Stored");
    }

    struct FailingStore;

    #[async_trait]
    impl EntryStore for FailingStore {
        async fn find_by_identity(&self, _url: &str, _source_id: i64) -> Result<Option<Entry>> {
            tokio::time::sleep(Duration::from_millis(1)).await;
            Err(anyhow!("disk on fire"))
        }

        async fn insert(&self, _entry: &Entry) -> Result<Option<i64>> {
            unreachable!("insert must not run after a failed lookup")
        }
    }

    #[tokio::test]
    async fn test_store_failure_is_reported() {
        let reconciler = Reconciler::new(Arc::new(FailingStore));

        let err = reconciler.reconcile(&remote("/s/1", "One")).await.unwrap_err();
        assert!(format!("{err:#}").contains("disk on fire"));
        assert_eq!(reconciler.locks.len(), 0);
    }

    #[tokio::test]
    async fn test_reconcile_all_preserves_order() {
        let db = test_db().await;
        let reconciler = Reconciler::new(db.clone());
        let listed: Vec<SourceEntry> = ["/a", "/b", "/c"]
            .iter()
            .map(|url| SourceEntry {
                url: url.to_string(),
                title: url.trim_start_matches('/').to_uppercase(),
                thumbnail_url: None,
                author: None,
                description: None,
            })
            .collect();

        let entries = reconciler.reconcile_all(42, &listed).await.unwrap();
        let titles: Vec<_> = entries.iter().map(|e| e.title.as_str()).collect();
        assert_eq!(titles, vec!["A", "B", "C"]);
        assert!(entries.iter().all(|e| e.id > 0));
    }
}
