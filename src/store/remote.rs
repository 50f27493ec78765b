//! `KVStore` adapter over a remote keyspace.
//!
//! The concrete remote driver (Redis, HTTP, or otherwise) is out of
//! scope for this crate (spec §1) — callers supply one by implementing
//! [`RemoteBackend`]. Values are serialized as JSON, matching the
//! reference implementation; keys are converted to/from strings via
//! [`KeyCodec`].
use std::hash::Hash;
use std::marker::PhantomData;
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::entry::Entry;

use super::{InvalidateFn, KVStore, SweepResult};

/// Minimal interface a remote keyspace must provide. Expiry (if any) is
/// the remote system's concern — this trait doesn't expose a TTL
/// parameter because the reference's remote store treats expiry as
/// best-effort and deferred to the remote system (spec §2, §6).
#[async_trait]
pub trait RemoteBackend: Send + Sync {
    type Error: std::error::Error + Send + Sync + 'static;

    async fn get(&self, key: &str) -> Result<Option<String>, Self::Error>;
    async fn set(&self, key: &str, value: String) -> Result<(), Self::Error>;
    async fn delete(&self, key: &str) -> Result<bool, Self::Error>;
    /// List every key currently stored under this backend's keyspace, if
    /// the backend can do so cheaply. Backends that can't enumerate
    /// cheaply (most remote KV systems) return an empty vec; `entries()`
    /// degrades to an empty snapshot in that case, which is documented
    /// as acceptable for a remote store (spec §6, "no-ops" clause).
    async fn scan_keys(&self) -> Result<Vec<String>, Self::Error>;
}

/// Converts a cache key to and from the string representation a
/// [`RemoteBackend`] stores it under (spec §6: "Key conversion is via a
/// caller-supplied string-to-key converter").
///
/// Implemented for the fixed-width integers, `f32`/`f64`, `String`, and
/// `std::time::Duration`; non-primitive keys require a custom impl. In
/// Rust this requirement is enforced at compile time rather than by a
/// runtime "non-overridden key stringification" error (spec §6/§7):
/// omitting the impl is a compile error, not a runtime one.
pub trait KeyCodec: Sized {
    fn encode(&self) -> String;
    fn decode(s: &str) -> Option<Self>;
}

macro_rules! impl_key_codec_display_fromstr {
    ($($t:ty),* $(,)?) => {
        $(
            impl KeyCodec for $t {
                fn encode(&self) -> String {
                    self.to_string()
                }
                fn decode(s: &str) -> Option<Self> {
                    s.parse().ok()
                }
            }
        )*
    };
}

impl_key_codec_display_fromstr!(
    i8, i16, i32, i64, i128, isize, u8, u16, u32, u64, u128, usize, f32, f64
);

impl KeyCodec for String {
    fn encode(&self) -> String {
        self.clone()
    }
    fn decode(s: &str) -> Option<Self> {
        Some(s.to_owned())
    }
}

impl KeyCodec for Duration {
    fn encode(&self) -> String {
        self.as_nanos().to_string()
    }
    fn decode(s: &str) -> Option<Self> {
        s.parse::<u128>().ok().map(|nanos| Duration::from_nanos(nanos as u64))
    }
}

/// A [`KVStore`] over a remote keyspace.
///
/// `time_loaded`/`time_last_accessed` on the returned [`Entry`] are
/// best-effort: they're stamped locally at read/write time rather than
/// sourced from the remote system, since the remote system is
/// authoritative for its own expiry (spec §2). `flush_invalidated` and
/// `invalidate_all` are no-ops here, as the spec explicitly allows (§6):
/// the remote system owns eviction, so `maximum_cache_size_indicator`
/// and the local cutoff have no effect in this mode.
pub struct RemoteStore<K, V, B> {
    backend: B,
    prefix: String,
    _marker: PhantomData<(K, V)>,
}

impl<K, V, B> RemoteStore<K, V, B>
where
    B: RemoteBackend,
{
    pub fn new(backend: B, prefix: impl Into<String>) -> Self {
        RemoteStore {
            backend,
            prefix: prefix.into(),
            _marker: PhantomData,
        }
    }

    fn remote_key(&self, key: &K) -> String
    where
        K: KeyCodec,
    {
        format!("{}{}", self.prefix, key.encode())
    }
}

#[async_trait]
impl<K, V, B> KVStore<K, V> for RemoteStore<K, V, B>
where
    K: Eq + Hash + Clone + KeyCodec + Send + Sync + 'static,
    V: Serialize + DeserializeOwned + Clone + Send + Sync + 'static,
    B: RemoteBackend + 'static,
{
    async fn try_get(&self, key: &K) -> Option<Entry<V>> {
        let raw = self.backend.get(&self.remote_key(key)).await.ok().flatten()?;
        let value: V = serde_json::from_str(&raw).ok()?;
        Some(Entry::new(value))
    }

    async fn try_add(&self, key: K, value: V) -> bool {
        let remote_key = self.remote_key(&key);
        if matches!(self.backend.get(&remote_key).await, Ok(Some(_))) {
            return false;
        }
        let Ok(serialized) = serde_json::to_string(&value) else {
            return false;
        };
        self.backend.set(&remote_key, serialized).await.is_ok()
    }

    async fn add_or_update(
        &self,
        key: K,
        fallback: Arc<V>,
        update: Box<dyn Fn(&K, &Arc<V>) -> Arc<V> + Send + Sync>,
    ) -> Option<Entry<V>> {
        let remote_key = self.remote_key(&key);
        let existing = self.backend.get(&remote_key).await.ok().flatten();
        let new_value = match existing.and_then(|raw| serde_json::from_str::<V>(&raw).ok()) {
            Some(old) => update(&key, &Arc::new(old)),
            None => fallback,
        };
        let serialized = serde_json::to_string(new_value.as_ref()).ok()?;
        self.backend.set(&remote_key, serialized).await.ok()?;
        Some(Entry::from_arc(new_value))
    }

    async fn try_remove(&self, key: &K) -> Option<Entry<V>> {
        let remote_key = self.remote_key(key);
        let raw = self.backend.get(&remote_key).await.ok().flatten()?;
        if !self.backend.delete(&remote_key).await.unwrap_or(false) {
            return None;
        }
        let value: V = serde_json::from_str(&raw).ok()?;
        Some(Entry::new(value))
    }

    async fn touch(&self, key: &K, _reset_expiry: bool) -> bool {
        matches!(self.backend.get(&self.remote_key(key)).await, Ok(Some(_)))
    }

    fn entries(&self) -> Vec<(K, Entry<V>)> {
        // Synchronous by trait signature; a remote backend can't be
        // scanned without an async round trip, so this always reports
        // empty. Coordinator operations that rely on `entries()` (count,
        // self-refresh, flush) are documented as degraded in remote mode.
        Vec::new()
    }

    async fn flush_invalidated(&self, _max_size: usize, _cutoff: Instant, _invalidate: &InvalidateFn<K>) -> SweepResult {
        SweepResult {
            remaining: 0,
            flushed: 0,
        }
    }

    async fn invalidate_all(&self, invalidate: &InvalidateFn<K>) {
        if let Ok(keys) = self.backend.scan_keys().await {
            for raw_key in keys {
                if let Some(key) = raw_key.strip_prefix(&self.prefix).and_then(K::decode) {
                    invalidate(key).await;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;
    use std::collections::HashMap;

    #[derive(Default)]
    struct InMemoryBackend {
        data: Mutex<HashMap<String, String>>,
    }

    #[derive(Debug, thiserror::Error)]
    #[error("in-memory backend error")]
    struct BackendError;

    #[async_trait]
    impl RemoteBackend for InMemoryBackend {
        type Error = BackendError;

        async fn get(&self, key: &str) -> Result<Option<String>, Self::Error> {
            Ok(self.data.lock().unwrap().get(key).cloned())
        }

        async fn set(&self, key: &str, value: String) -> Result<(), Self::Error> {
            self.data.lock().unwrap().insert(key.to_owned(), value);
            Ok(())
        }

        async fn delete(&self, key: &str) -> Result<bool, Self::Error> {
            Ok(self.data.lock().unwrap().remove(key).is_some())
        }

        async fn scan_keys(&self) -> Result<Vec<String>, Self::Error> {
            Ok(self.data.lock().unwrap().keys().cloned().collect())
        }
    }

    #[tokio::test]
    async fn round_trips_through_json() {
        let store: RemoteStore<u32, String, _> = RemoteStore::new(InMemoryBackend::default(), "rc-");
        assert!(store.try_add(1, "hello".to_string()).await);
        let entry = store.try_get(&1).await.unwrap();
        assert_eq!(entry.value().as_str(), "hello");
    }

    #[tokio::test]
    async fn try_add_respects_existing_key() {
        let store: RemoteStore<u32, String, _> = RemoteStore::new(InMemoryBackend::default(), "rc-");
        assert!(store.try_add(1, "a".to_string()).await);
        assert!(!store.try_add(1, "b".to_string()).await);
        assert_eq!(store.try_get(&1).await.unwrap().value().as_str(), "a");
    }

    #[tokio::test]
    async fn try_remove_deletes_from_backend() {
        let store: RemoteStore<u32, String, _> = RemoteStore::new(InMemoryBackend::default(), "rc-");
        store.try_add(1, "a".to_string()).await;
        let removed = store.try_remove(&1).await.unwrap();
        assert_eq!(removed.value().as_str(), "a");
        assert!(store.try_get(&1).await.is_none());
    }

    #[tokio::test]
    async fn flush_invalidated_is_a_noop() {
        let store: RemoteStore<u32, String, _> = RemoteStore::new(InMemoryBackend::default(), "rc-");
        store.try_add(1, "a".to_string()).await;
        let always_remove: Box<InvalidateFn<u32>> = Box::new(|_| Box::pin(async { true }));
        let result = store.flush_invalidated(0, Instant::now(), &*always_remove).await;
        assert_eq!(result, SweepResult { remaining: 0, flushed: 0 });
        assert!(store.try_get(&1).await.is_some());
    }

    #[test]
    fn key_codec_round_trips_integers() {
        assert_eq!(u32::decode(&42u32.encode()), Some(42));
        assert_eq!(i64::decode(&(-7i64).encode()), Some(-7));
    }
}
