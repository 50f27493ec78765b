//! The unit of storage held by a [`crate::store::KVStore`].
use std::sync::Arc;
use std::time::Instant;

/// A cached value plus the two timestamps the coordinator needs to judge
/// freshness and, during a size-trim, recency.
///
/// The payload is held behind an `Arc` so that "is this the same value
/// instance" (used to guard disposal, spec §4.3/§9) can be answered with
/// `Arc::ptr_eq` instead of requiring `V: PartialEq`.
#[derive(Debug)]
pub struct Entry<V> {
    value: Arc<V>,
    time_loaded: Instant,
    time_last_accessed: Instant,
}

impl<V> Entry<V> {
    /// Create a fresh entry for a just-loaded (or just-put) value.
    pub fn new(value: V) -> Self {
        Self::from_arc(Arc::new(value))
    }

    /// Create a fresh entry from an already-shared value.
    pub fn from_arc(value: Arc<V>) -> Self {
        let now = Instant::now();
        Entry {
            value,
            time_loaded: now,
            time_last_accessed: now,
        }
    }

    pub fn value(&self) -> &Arc<V> {
        &self.value
    }

    /// Consume the entry, yielding its value handle.
    pub fn into_value(self) -> Arc<V> {
        self.value
    }

    pub fn time_loaded(&self) -> Instant {
        self.time_loaded
    }

    pub fn time_last_accessed(&self) -> Instant {
        self.time_last_accessed
    }

    /// Mark the entry as having been read just now.
    pub fn touch(&mut self) {
        self.time_last_accessed = Instant::now();
    }

    /// Reset the freshness clock as though the value had just been reloaded,
    /// without actually invoking the loader.
    pub fn reset_expiry(&mut self) {
        self.time_loaded = Instant::now();
    }

    /// Whether `self` is considered fresh relative to `cutoff`: loaded at
    /// or after the cutoff instant.
    pub fn is_fresh(&self, cutoff: Instant) -> bool {
        self.time_loaded >= cutoff
    }
}

impl<V> Clone for Entry<V> {
    fn clone(&self) -> Self {
        Entry {
            value: Arc::clone(&self.value),
            time_loaded: self.time_loaded,
            time_last_accessed: self.time_last_accessed,
        }
    }
}

/// Values that hold a resource which must be explicitly released rather
/// than simply dropped (file handles, connections, and the like).
///
/// There is no runtime "does V implement this trait" check in Rust (unlike
/// the reference implementation's `is IDisposable`), so disposal is opt-in
/// at build time via [`crate::cache::CacheBuilder::disposer`] rather than
/// detected automatically at eviction time. See DESIGN.md.
pub trait Disposable {
    fn dispose(self);
}

/// Build a disposer closure for any `Disposable` value, for use with
/// [`crate::cache::CacheBuilder::disposer`].
pub fn disposer_for<V>() -> Arc<dyn Fn(V) + Send + Sync>
where
    V: Disposable,
{
    Arc::new(|v: V| v.dispose())
}
