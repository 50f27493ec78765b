//! The in-memory `KVStore`: a concurrent hash map that is itself
//! authoritative over entry timestamps.
use std::hash::Hash;
use std::sync::Arc;
use std::time::Instant;

use async_trait::async_trait;
use dashmap::DashMap;

use crate::entry::Entry;

use super::{InvalidateFn, KVStore, SweepResult};

/// Concurrent, in-memory implementation of [`KVStore`].
///
/// Backed by [`DashMap`], whose sharded `entry` API gives the atomic
/// per-key compare-and-swap spec §4.2 calls for, and whose `iter` gives
/// the weakly-consistent snapshot spec §3 requires of `entries()`.
#[derive(Default)]
pub struct InMemoryStore<K, V>
where
    K: Eq + Hash,
{
    map: DashMap<K, Entry<V>>,
}

impl<K, V> InMemoryStore<K, V>
where
    K: Eq + Hash,
{
    pub fn new() -> Self {
        InMemoryStore { map: DashMap::new() }
    }

    pub fn with_capacity(capacity: usize) -> Self {
        InMemoryStore {
            map: DashMap::with_capacity(capacity),
        }
    }
}

#[async_trait]
impl<K, V> KVStore<K, V> for InMemoryStore<K, V>
where
    K: Eq + Hash + Clone + Send + Sync + 'static,
    V: Send + Sync + 'static,
{
    async fn try_get(&self, key: &K) -> Option<Entry<V>> {
        self.map.get(key).map(|r| r.value().clone())
    }

    async fn try_add(&self, key: K, value: V) -> bool {
        match self.map.entry(key) {
            dashmap::mapref::entry::Entry::Occupied(_) => false,
            dashmap::mapref::entry::Entry::Vacant(slot) => {
                slot.insert(Entry::new(value));
                true
            }
        }
    }

    async fn add_or_update(
        &self,
        key: K,
        fallback: Arc<V>,
        update: Box<dyn Fn(&K, &Arc<V>) -> Arc<V> + Send + Sync>,
    ) -> Option<Entry<V>> {
        match self.map.entry(key) {
            dashmap::mapref::entry::Entry::Vacant(slot) => {
                let inserted = slot.insert(Entry::from_arc(fallback));
                Some(inserted.value().clone())
            }
            dashmap::mapref::entry::Entry::Occupied(mut slot) => {
                let new_value = update(slot.key(), slot.get().value());
                slot.insert(Entry::from_arc(new_value));
                Some(slot.get().clone())
            }
        }
    }

    async fn try_remove(&self, key: &K) -> Option<Entry<V>> {
        self.map.remove(key).map(|(_, v)| v)
    }

    async fn touch(&self, key: &K, reset_expiry: bool) -> bool {
        match self.map.get_mut(key) {
            Some(mut entry) => {
                if reset_expiry {
                    entry.reset_expiry();
                } else {
                    entry.touch();
                }
                true
            }
            None => false,
        }
    }

    fn entries(&self) -> Vec<(K, Entry<V>)> {
        self.map
            .iter()
            .map(|r| (r.key().clone(), r.value().clone()))
            .collect()
    }

    async fn flush_invalidated(&self, max_size: usize, cutoff: Instant, invalidate: &InvalidateFn<K>) -> SweepResult {
        let snapshot = self.entries();

        let mut surviving: Vec<(K, Entry<V>)> = Vec::with_capacity(snapshot.len());
        let mut flushed = 0usize;
        for (key, entry) in snapshot {
            if entry.time_loaded() < cutoff {
                if invalidate(key.clone()).await {
                    flushed += 1;
                } else {
                    // Already removed by someone else; don't double-count
                    // it but don't keep charging it against max_size either.
                    surviving.push((key, entry));
                }
            } else {
                surviving.push((key, entry));
            }
        }

        if surviving.len() > max_size {
            let over = surviving.len() - max_size;
            surviving.sort_by_key(|(_, e)| (e.time_loaded(), e.time_last_accessed()));
            for (key, _) in surviving.drain(..over) {
                if invalidate(key).await {
                    flushed += 1;
                }
            }
        }

        SweepResult {
            remaining: surviving.len(),
            flushed,
        }
    }

    async fn invalidate_all(&self, invalidate: &InvalidateFn<K>) {
        for (key, _) in self.entries() {
            invalidate(key).await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn always_remove<K: Send + 'static>() -> Box<InvalidateFn<K>> {
        Box::new(|_| Box::pin(async { true }))
    }

    #[tokio::test]
    async fn try_add_then_try_get_round_trips() {
        let store: InMemoryStore<u32, String> = InMemoryStore::new();
        assert!(store.try_add(1, "x".to_string()).await);
        let entry = store.try_get(&1).await.unwrap();
        assert_eq!(entry.value().as_str(), "x");
    }

    #[tokio::test]
    async fn try_add_does_not_overwrite() {
        let store: InMemoryStore<u32, String> = InMemoryStore::new();
        assert!(store.try_add(1, "x".to_string()).await);
        assert!(!store.try_add(1, "y".to_string()).await);
        assert_eq!(store.try_get(&1).await.unwrap().value().as_str(), "x");
    }

    #[tokio::test]
    async fn add_or_update_inserts_fallback_when_absent() {
        let store: InMemoryStore<u32, i32> = InMemoryStore::new();
        let entry = store
            .add_or_update(1, Arc::new(10), Box::new(|_, old| Arc::new(**old + 1)))
            .await
            .unwrap();
        assert_eq!(**entry.value(), 10);
    }

    #[tokio::test]
    async fn add_or_update_applies_updater_when_present() {
        let store: InMemoryStore<u32, i32> = InMemoryStore::new();
        store
            .add_or_update(1, Arc::new(10), Box::new(|_, old| Arc::new(**old + 1)))
            .await;
        let entry = store
            .add_or_update(1, Arc::new(10), Box::new(|_, old| Arc::new(**old + 1)))
            .await
            .unwrap();
        assert_eq!(**entry.value(), 11);
    }

    #[tokio::test]
    async fn touch_updates_last_accessed_only_unless_reset() {
        let store: InMemoryStore<u32, u32> = InMemoryStore::new();
        store.try_add(1, 1).await;
        let loaded = store.try_get(&1).await.unwrap().time_loaded();

        tokio::time::sleep(Duration::from_millis(5)).await;
        assert!(store.touch(&1, false).await);
        assert_eq!(store.try_get(&1).await.unwrap().time_loaded(), loaded);

        tokio::time::sleep(Duration::from_millis(5)).await;
        assert!(store.touch(&1, true).await);
        assert!(store.try_get(&1).await.unwrap().time_loaded() > loaded);

        assert!(!store.touch(&999, false).await);
    }

    #[tokio::test]
    async fn try_remove_removes_and_returns_entry() {
        let store: InMemoryStore<u32, &str> = InMemoryStore::new();
        store.try_add(1, "x").await;
        let removed = store.try_remove(&1).await.unwrap();
        assert_eq!(*removed.value().as_ref(), "x");
        assert!(store.try_get(&1).await.is_none());
    }

    #[tokio::test]
    async fn sweep_removes_stale_before_trimming_size() {
        let store: InMemoryStore<u32, u32> = InMemoryStore::new();
        for i in 0..5 {
            store.try_add(i, i).await;
        }
        // Nothing is stale yet, so sweeping with a far-past cutoff and a
        // tight max size only trims by size, oldest-loaded first.
        let result = store
            .flush_invalidated(3, Instant::now() - Duration::from_secs(3600), &*always_remove())
            .await;
        assert_eq!(result.remaining, 3);
        assert_eq!(result.flushed, 2);
        assert_eq!(store.entries().len(), 3);
    }

    #[tokio::test]
    async fn sweep_is_idempotent() {
        let store: InMemoryStore<u32, u32> = InMemoryStore::new();
        for i in 0..5 {
            store.try_add(i, i).await;
        }
        let cutoff = Instant::now() + Duration::from_secs(1);
        let first = store.flush_invalidated(100, cutoff, &*always_remove()).await;
        let second = store.flush_invalidated(100, cutoff, &*always_remove()).await;
        assert_eq!(first.remaining, 0);
        assert_eq!(second.remaining, 0);
        assert_eq!(second.flushed, 0);
    }

    #[tokio::test]
    async fn invalidate_all_empties_store() {
        let store: InMemoryStore<u32, u32> = InMemoryStore::new();
        for i in 0..5 {
            store.try_add(i, i).await;
        }
        store.invalidate_all(&*always_remove()).await;
        assert_eq!(store.entries().len(), 0);
    }
}
