//! The `KVStore` abstraction and its implementations.
//!
//! A [`KVStore`] is an opaque key→[`Entry`] map. The coordinator
//! ([`crate::cache::Cache`]) only ever talks to its store through this
//! trait, so the same coordinator logic works unchanged over an
//! in-memory store ([`memory::InMemoryStore`]) or a remote one
//! (`remote::RemoteStore`, behind the `remote_store` feature).
use std::future::Future;
use std::hash::Hash;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Instant;

use async_trait::async_trait;

use crate::entry::Entry;

pub mod memory;
#[cfg(feature = "remote_store")]
pub mod remote;

pub use memory::InMemoryStore;
#[cfg(feature = "remote_store")]
pub use remote::{KeyCodec, RemoteBackend, RemoteStore};

/// Outcome of a sweep (spec §4.1 `flushInvalidated`): how many entries
/// remain, and how many were removed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SweepResult {
    pub remaining: usize,
    pub flushed: usize,
}

/// A future boxed for storage behind a trait object, as returned by
/// [`InvalidateFn`].
pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// Per-key eviction callback a [`KVStore`] invokes during a sweep or a
/// bulk invalidation (spec §4.2). It's async because the coordinator's
/// own implementation (`Cache::invalidate`, spec §4.3) needs to talk back
/// to this very store to actually remove the key and run disposal — the
/// store itself doesn't remove anything on the sweep's behalf, it only
/// decides *which* keys qualify and lets the coordinator do the removing,
/// so eviction and direct invalidation share one code path.
pub type InvalidateFn<K> = dyn Fn(K) -> BoxFuture<'static, bool> + Send + Sync;

/// Abstract key→value map backing a [`crate::cache::Cache`].
///
/// Implementors must be safe under concurrent access from any number of
/// callers (spec §3, invariant i). `entries` is a lock-free, possibly
/// moving snapshot (invariant iii) — callers must not assume every pair
/// it yields is still present by the time they act on it.
#[async_trait]
pub trait KVStore<K, V>: Send + Sync
where
    K: Eq + Hash + Clone + Send + Sync + 'static,
    V: Send + Sync + 'static,
{
    /// Fetch an entry without regard to freshness.
    async fn try_get(&self, key: &K) -> Option<Entry<V>>;

    /// Insert `value` only if `key` is absent. Returns whether the insert
    /// happened.
    async fn try_add(&self, key: K, value: V) -> bool;

    /// Atomically insert-or-update: if `key` is absent, store `fallback`;
    /// if present, replace the entry's value with `update(&key, &old_value)`.
    /// Returns the resulting entry, or `None` if the backing store refused
    /// the write (spec §7, "store write rejection").
    async fn add_or_update(
        &self,
        key: K,
        fallback: Arc<V>,
        update: Box<dyn Fn(&K, &Arc<V>) -> Arc<V> + Send + Sync>,
    ) -> Option<Entry<V>>;

    /// Remove and return the entry for `key`, if present.
    async fn try_remove(&self, key: &K) -> Option<Entry<V>>;

    /// Update an existing entry's timestamps in place without touching its
    /// value: `reset_expiry` bumps `time_loaded` (a cache hit with
    /// `resetExpiryOnHit`), otherwise only `time_last_accessed` moves.
    /// Returns whether `key` was present. A no-op for stores that don't
    /// keep local timestamps (e.g. a remote store).
    async fn touch(&self, key: &K, reset_expiry: bool) -> bool;

    /// Snapshot of the current `(key, entry)` pairs. See trait docs for
    /// the consistency contract.
    fn entries(&self) -> Vec<(K, Entry<V>)>;

    /// Sweep the store (spec §4.2): drop everything whose `time_loaded`
    /// predates `cutoff`, then trim any surplus over `max_size` by
    /// `(time_loaded, time_last_accessed)` ascending. `invalidate` is
    /// invoked for every key actually removed and must return whether a
    /// removal occurred (a `false` means another caller already removed
    /// it, which must not be double-counted).
    async fn flush_invalidated(&self, max_size: usize, cutoff: Instant, invalidate: &InvalidateFn<K>) -> SweepResult;

    /// Remove everything, invoking `invalidate` for each key removed.
    async fn invalidate_all(&self, invalidate: &InvalidateFn<K>);
}
