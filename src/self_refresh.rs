//! Proactive, self-refreshing variant of [`Cache`] (spec §5).
use std::fmt;
use std::hash::Hash;
use std::sync::Arc;
use std::time::Duration;

use futures::future::join_all;

use crate::cache::{Cache, CacheBuilder, LoaderFn};
use crate::options::SelfRefreshingCacheOptions;
use crate::store::KVStore;

/// Wraps a [`Cache`] with a background task that proactively re-runs
/// `get_or_load` over every key currently held, at `refresh_interval`
/// (spec §5). Since `get_or_load` only actually invokes the loader for
/// stale entries, `refresh_interval` should be configured shorter than
/// the wrapped cache's `cache_item_expiry` so a caller never observes a
/// miss — the refresh keeps reloading keys before they go stale.
pub struct SelfRefreshingCache<K, V, S, E = std::convert::Infallible> {
    cache: Arc<Cache<K, V, S, E>>,
    refresh_task: std::sync::Mutex<Option<tokio::task::JoinHandle<()>>>,
}

impl<K, V, S, E> SelfRefreshingCache<K, V, S, E>
where
    K: Eq + Hash + Clone + Send + Sync + fmt::Display + 'static,
    V: Send + Sync + 'static,
    S: KVStore<K, V> + 'static,
    E: fmt::Display + Send + Sync + 'static,
{
    /// Build a self-refreshing cache. `default_loader` is mandatory here
    /// (unlike a plain [`Cache`]) since the background task has no other
    /// way to reload a key.
    pub fn new(store: S, options: SelfRefreshingCacheOptions, default_loader: LoaderFn<K, V, E>) -> Arc<Self> {
        let cache = CacheBuilder::new(store, options.cache_options().clone())
            .default_loader(default_loader)
            .build();
        Self::wrap(cache, options.refresh_interval())
    }

    /// Wrap an already-built [`Cache`], driving its refresh at `refresh_interval`.
    pub fn wrap(cache: Arc<Cache<K, V, S, E>>, refresh_interval: Duration) -> Arc<Self> {
        let wrapper = Arc::new(SelfRefreshingCache {
            cache,
            refresh_task: std::sync::Mutex::new(None),
        });
        wrapper.start_refresh(refresh_interval);
        wrapper
    }

    pub fn cache(&self) -> &Arc<Cache<K, V, S, E>> {
        &self.cache
    }

    fn start_refresh(self: &Arc<Self>, refresh_interval: Duration) {
        let weak = Arc::downgrade(self);
        let handle = tokio::spawn(async move {
            loop {
                tokio::time::sleep(refresh_interval).await;
                let Some(wrapper) = weak.upgrade() else {
                    break;
                };
                wrapper.refresh_once().await;
            }
        });
        *self.refresh_task.lock().unwrap() = Some(handle);
    }

    /// Refresh every key currently held, one `get_or_load` per key, run
    /// concurrently (spec §5). A failed reload is logged and otherwise
    /// ignored — one bad key must not stall the rest or kill the loop.
    async fn refresh_once(self: &Arc<Self>) {
        let keys: Vec<K> = self.cache.items().into_iter().map(|(k, _)| k).collect();
        let cache_name = self.cache.name().to_owned();
        let futures = keys.into_iter().map(|key| {
            let cache = Arc::clone(&self.cache);
            let cache_name = cache_name.clone();
            async move {
                if let Err(err) = cache.get_or_load(key.clone(), true).await {
                    log::warn!("{cache_name}: self-refresh failed for key `{key}`: {err}");
                }
            }
        });
        join_all(futures).await;
    }

    /// Stop the refresh task and dispose the underlying cache (spec §5/§4.3).
    pub async fn dispose(self: &Arc<Self>) {
        if let Some(handle) = self.refresh_task.lock().unwrap().take() {
            handle.abort();
        }
        self.cache.dispose().await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::loader_fn;
    use crate::options::CacheOptions;
    use crate::store::InMemoryStore;
    use std::convert::Infallible;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[tokio::test]
    async fn refresh_reloads_stale_keys_proactively() {
        let loads = Arc::new(AtomicUsize::new(0));
        let loads_cb = Arc::clone(&loads);
        let cache_options = CacheOptions::new(
            "self-refresh",
            Duration::from_millis(30),
            0,
            Duration::from_secs(60),
            100,
            Some(Duration::from_secs(5)),
            false,
        )
        .unwrap();
        let options = SelfRefreshingCacheOptions::new(cache_options, Duration::from_millis(15)).unwrap();

        let wrapper = SelfRefreshingCache::new(
            InMemoryStore::<u32, u32>::new(),
            options,
            loader_fn(move |key: u32| {
                let loads_cb = Arc::clone(&loads_cb);
                async move {
                    loads_cb.fetch_add(1, Ordering::SeqCst);
                    Ok::<u32, Infallible>(key)
                }
            }),
        );

        wrapper.cache().get_or_load(1, false).await.unwrap();
        assert_eq!(loads.load(Ordering::SeqCst), 1);

        tokio::time::sleep(Duration::from_millis(120)).await;
        assert!(loads.load(Ordering::SeqCst) >= 2);
        wrapper.dispose().await;
    }
}
