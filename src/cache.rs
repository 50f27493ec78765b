//! The read-through coordinator: single-flight loading, freshness
//! jitter, disposal, and the background sweep.
use std::fmt;
use std::future::Future;
use std::hash::Hash;
use std::sync::Arc;
use std::time::{Duration, Instant};

use rand::Rng;

use crate::entry::Entry;
use crate::error::CacheError;
use crate::gate::KeyGateRegistry;
use crate::options::CacheOptions;
use crate::store::{BoxFuture, InvalidateFn, KVStore};

/// A loader function: given a key, asynchronously produce its value or an
/// error of type `E` (spec §3, §4.3).
pub type LoaderFn<K, V, E> = Arc<dyn Fn(K) -> BoxFuture<'static, Result<V, E>> + Send + Sync>;

/// Wrap a plain async closure as a [`LoaderFn`].
pub fn loader_fn<K, V, E, F, Fut>(f: F) -> LoaderFn<K, V, E>
where
    F: Fn(K) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<V, E>> + Send + 'static,
{
    Arc::new(move |k| Box::pin(f(k)))
}

type HitCallback<K, V> = Arc<dyn Fn(&K, &Entry<V>) + Send + Sync>;
type MissedCallback<K, V> = Arc<dyn Fn(&K, &Entry<V>, u64) + Send + Sync>;
type FlushCallback = Arc<dyn Fn(usize, usize, u64) + Send + Sync>;
type Disposer<V> = Arc<dyn Fn(V) + Send + Sync>;

/// Builds a [`Cache`], mirroring the reference implementation's
/// constructor-with-many-optional-callbacks shape as a chained builder
/// (the idiom the pack's remote-store builders — e.g. a Redis or disk
/// cache builder — use for the same kind of optional configuration).
pub struct CacheBuilder<K, V, S, E> {
    store: S,
    options: CacheOptions,
    default_loader: Option<LoaderFn<K, V, E>>,
    disposer: Option<Disposer<V>>,
    hit_callback: Option<HitCallback<K, V>>,
    missed_callback: Option<MissedCallback<K, V>>,
    flush_callback: Option<FlushCallback>,
}

impl<K, V, S, E> CacheBuilder<K, V, S, E>
where
    K: Eq + Hash + Clone + Send + Sync + 'static,
    V: Send + Sync + 'static,
    S: KVStore<K, V> + 'static,
    E: Send + Sync + 'static,
{
    pub fn new(store: S, options: CacheOptions) -> Self {
        CacheBuilder {
            store,
            options,
            default_loader: None,
            disposer: None,
            hit_callback: None,
            missed_callback: None,
            flush_callback: None,
        }
    }

    /// Loader used by [`Cache::get_or_load`]. Not required if every caller
    /// goes through [`Cache::get_or_load_with`] instead.
    pub fn default_loader(mut self, loader: LoaderFn<K, V, E>) -> Self {
        self.default_loader = Some(loader);
        self
    }

    /// Release hook for evicted/overwritten values (spec §4.3, §9). See
    /// [`crate::entry::disposer_for`] to build one from a [`crate::entry::Disposable`] type.
    pub fn disposer(mut self, disposer: Disposer<V>) -> Self {
        self.disposer = Some(disposer);
        self
    }

    pub fn on_hit(mut self, callback: HitCallback<K, V>) -> Self {
        self.hit_callback = Some(callback);
        self
    }

    pub fn on_missed(mut self, callback: MissedCallback<K, V>) -> Self {
        self.missed_callback = Some(callback);
        self
    }

    pub fn on_flush(mut self, callback: FlushCallback) -> Self {
        self.flush_callback = Some(callback);
        self
    }

    /// Build the cache and start its background sweep task.
    pub fn build(self) -> Arc<Cache<K, V, S, E>> {
        let cache = Arc::new(Cache {
            name: self.options.cache_name().to_owned(),
            options: self.options,
            store: Arc::new(self.store),
            gates: KeyGateRegistry::new(),
            default_loader: self.default_loader,
            disposer: self.disposer,
            hit_callback: self.hit_callback,
            missed_callback: self.missed_callback,
            flush_callback: self.flush_callback,
            sweep_task: std::sync::Mutex::new(None),
        });
        cache.start_sweep();
        cache
    }
}

/// The read-through, single-flighted cache coordinator (spec §3-4).
///
/// Always lives behind an `Arc` — `get_or_load` needs to hand a clone of
/// itself to the background sweep task, so construction goes through
/// [`CacheBuilder::build`] rather than a bare constructor.
pub struct Cache<K, V, S, E = std::convert::Infallible> {
    name: String,
    options: CacheOptions,
    store: Arc<S>,
    gates: KeyGateRegistry<K>,
    default_loader: Option<LoaderFn<K, V, E>>,
    disposer: Option<Disposer<V>>,
    hit_callback: Option<HitCallback<K, V>>,
    missed_callback: Option<MissedCallback<K, V>>,
    flush_callback: Option<FlushCallback>,
    sweep_task: std::sync::Mutex<Option<tokio::task::JoinHandle<()>>>,
}

impl<K, V, S, E> Cache<K, V, S, E>
where
    K: Eq + Hash + Clone + Send + Sync + 'static,
    V: Send + Sync + 'static,
    S: KVStore<K, V> + 'static,
    E: Send + Sync + 'static,
{
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn options(&self) -> &CacheOptions {
        &self.options
    }

    fn start_sweep(self: &Arc<Self>) {
        let weak = Arc::downgrade(self);
        let interval = self.options.flush_interval();
        let handle = tokio::spawn(async move {
            loop {
                tokio::time::sleep(interval).await;
                let Some(cache) = weak.upgrade() else {
                    break;
                };
                cache.flush_invalidated_entries().await;
            }
        });
        *self.sweep_task.lock().unwrap() = Some(handle);
    }

    /// The instant before which an entry is considered stale (spec §3's
    /// `cacheItemExpiry`, with the optional jitter window applied). Each
    /// call draws a fresh random offset, so repeated reads of the same
    /// key see a slightly different cutoff — this is the point of the
    /// jitter, spreading reload storms instead of preventing them.
    fn freshness_cutoff(&self) -> Instant {
        let expiry_ms = self.options.cache_item_expiry().as_millis() as u64;
        if self.options.cache_item_expiry_percentage_randomization() == 0 {
            return Instant::now() - self.options.cache_item_expiry();
        }
        let window_ms = self.options.cache_item_expiry_percentage_randomization_milliseconds();
        let half = window_ms / 2;
        let draw_window = window_ms.max(1);
        let offset = rand::thread_rng().gen_range(0..draw_window);
        let effective_ms = expiry_ms.saturating_sub(half) + offset;
        Instant::now() - Duration::from_millis(effective_ms)
    }

    fn fire_hit(&self, key: &K, entry: &Entry<V>) {
        if let Some(callback) = &self.hit_callback {
            let callback = Arc::clone(callback);
            let key = key.clone();
            let entry = entry.clone();
            if std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| callback(&key, &entry))).is_err() {
                log::warn!("{}: on_hit callback panicked", self.name);
            }
        }
    }

    fn fire_missed(&self, key: &K, entry: &Entry<V>, load_millis: u64) {
        if let Some(callback) = &self.missed_callback {
            let callback = Arc::clone(callback);
            let key = key.clone();
            let entry = entry.clone();
            if std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| callback(&key, &entry, load_millis))).is_err()
            {
                log::warn!("{}: on_missed callback panicked", self.name);
            }
        }
    }

    fn fire_flush(&self, remaining: usize, flushed: usize, sweep_millis: u64) {
        if let Some(callback) = &self.flush_callback {
            let callback = Arc::clone(callback);
            if std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
                callback(remaining, flushed, sweep_millis)
            }))
            .is_err()
            {
                log::warn!("{}: on_flush callback panicked", self.name);
            }
        }
    }

    /// Release `value` through the configured disposer, if any, and only
    /// if this was the last handle to it (spec §4.3/§9: a value still
    /// referenced by an in-flight reader must not be disposed out from
    /// under it).
    fn maybe_dispose(&self, value: Arc<V>) {
        if !self.options.dispose_expired_values_if_disposable() {
            return;
        }
        let Some(disposer) = &self.disposer else {
            return;
        };
        match Arc::try_unwrap(value) {
            Ok(owned) => disposer(owned),
            Err(_) => {
                log::debug!("{}: skipping dispose, value still has outstanding references", self.name);
            }
        }
    }

    /// Spec §4.3 `tryGetEntry`: a fresh cache hit, shared by the fast path
    /// in `get_or_load` and the re-check made after acquiring the key
    /// gate. Never removes a stale entry — that's the sweep's job.
    async fn try_get_entry(&self, key: &K, reset_expiry_on_hit: bool) -> Option<Arc<V>> {
        let cutoff = self.freshness_cutoff();
        let entry = self.store.try_get(key).await?;
        if !entry.is_fresh(cutoff) {
            return None;
        }
        self.store.touch(key, reset_expiry_on_hit).await;
        self.fire_hit(key, &entry);
        Some(Arc::clone(entry.value()))
    }

    /// Fetch `key` without loading: a fresh hit returns `Some`, anything
    /// else (absent or stale) returns `None` (spec §4.3 `tryGet`).
    pub async fn try_get(&self, key: &K) -> Option<Arc<V>> {
        self.try_get_entry(key, false).await
    }

    /// Insert `value` only if `key` is absent or stale. Returns whether
    /// the insert happened.
    pub async fn try_add(&self, key: K, value: V) -> bool {
        if self.try_get_entry(&key, false).await.is_some() {
            return false;
        }
        self.store.try_add(key, value).await
    }

    pub async fn has_key(&self, key: &K) -> bool {
        self.store.try_get(key).await.is_some()
    }

    /// Number of entries currently held, fresh or stale (spec §4.3
    /// `count`: materializes the same snapshot `items` does).
    pub fn count(&self) -> usize {
        self.store.entries().len()
    }

    /// Snapshot of every `(key, value)` pair currently held, regardless of
    /// freshness (spec §4.3 `items`, used by self-refresh).
    pub fn items(&self) -> Vec<(K, Arc<V>)> {
        self.store
            .entries()
            .into_iter()
            .map(|(k, e)| (k, Arc::clone(e.value())))
            .collect()
    }

    /// Remove a single key, disposing its value if configured to (spec
    /// §4.3 `invalidate`). Returns whether a key was actually present.
    pub async fn invalidate(&self, key: &K) -> bool {
        match self.store.try_remove(key).await {
            Some(entry) => {
                self.maybe_dispose(entry.into_value());
                true
            }
            None => false,
        }
    }

    /// Remove everything (spec §4.3 `invalidateAll`), disposing each value
    /// through the same path [`Cache::invalidate`] uses.
    pub async fn invalidate_all(self: &Arc<Self>) {
        let invalidate = self.invalidate_fn();
        self.store.invalidate_all(&*invalidate).await;
    }

    /// Build the async per-key eviction callback handed to the store's
    /// sweep/`invalidate_all` (spec §4.2): it simply calls back into this
    /// cache's own `invalidate`, so a sweep-evicted key and a
    /// directly-invalidated key are disposed through one code path.
    fn invalidate_fn(self: &Arc<Self>) -> Box<InvalidateFn<K>> {
        let cache = Arc::clone(self);
        Box::new(move |key: K| -> BoxFuture<'static, bool> {
            let cache = Arc::clone(&cache);
            Box::pin(async move { cache.invalidate(&key).await })
        })
    }

    /// Run one sweep pass now (spec §4.2): drop stale entries, then trim
    /// by size if still over `maximum_cache_size_indicator`. Also what the
    /// background task calls on its own schedule.
    pub async fn flush_invalidated_entries(self: &Arc<Self>) {
        let cutoff = Instant::now() - self.options.cache_item_expiry();
        let max_size = self.options.maximum_cache_size_indicator();
        let start = Instant::now();
        let invalidate = self.invalidate_fn();
        let result = self.store.flush_invalidated(max_size, cutoff, &*invalidate).await;
        let sweep_millis = start.elapsed().as_millis() as u64;
        self.fire_flush(result.remaining, result.flushed, sweep_millis);
    }

    /// The part of `get_or_load` that runs with the per-key gate held:
    /// re-check freshness (someone may have loaded it while we waited for
    /// the gate), otherwise call the loader and write the result back.
    async fn load_locked(
        &self,
        key: &K,
        reset_expiry_on_hit: bool,
        loader: &LoaderFn<K, V, E>,
    ) -> Result<Arc<V>, CacheError<E>> {
        if let Some(value) = self.try_get_entry(key, reset_expiry_on_hit).await {
            return Ok(value);
        }

        let prior_entry = self.store.try_get(key).await;

        let start = Instant::now();
        let loaded = loader(key.clone()).await.map_err(CacheError::Loader)?;
        let load_millis = start.elapsed().as_millis() as u64;

        let loaded_arc = Arc::new(loaded);
        let update_value = Arc::clone(&loaded_arc);
        let written = self
            .store
            .add_or_update(key.clone(), Arc::clone(&loaded_arc), Box::new(move |_, _| Arc::clone(&update_value)))
            .await;

        let (value, entry_for_callback) = match written {
            Some(entry) => (Arc::clone(entry.value()), entry),
            None => (Arc::clone(&loaded_arc), Entry::from_arc(Arc::clone(&loaded_arc))),
        };

        if let Some(prior) = prior_entry {
            if !Arc::ptr_eq(prior.value(), &value) {
                self.maybe_dispose(prior.into_value());
            }
        }

        self.fire_missed(key, &entry_for_callback, load_millis);
        Ok(value)
    }

    /// Fetch `key`'s value, loading it through `loader` on a miss or
    /// staleness, with at most one in-flight load per key (spec §4.3/§4.4).
    ///
    /// `reset_expiry_on_hit` mirrors `cacheItemExpiryOnHit` semantics at
    /// the call site rather than construction time: a fresh hit still
    /// bumps `time_loaded` to now when `true`, restarting the key's
    /// freshness window without reloading it.
    pub async fn get_or_load_with(
        self: &Arc<Self>,
        key: K,
        reset_expiry_on_hit: bool,
        loader: LoaderFn<K, V, E>,
    ) -> Result<Arc<V>, CacheError<E>>
    where
        K: fmt::Display,
    {
        if let Some(value) = self.try_get_entry(&key, reset_expiry_on_hit).await {
            return Ok(value);
        }

        let timeout = self.options.circuit_breaker_timeout_for_additional_threads_per_key();
        let _gate = self
            .gates
            .acquire(&key, timeout)
            .await
            .map_err(|_| CacheError::circuit_breaker_timeout(&self.name, &key, timeout.unwrap_or(Duration::MAX)))?;

        self.load_locked(&key, reset_expiry_on_hit, &loader).await
    }

    /// [`Cache::get_or_load_with`] using the loader configured on this
    /// cache at build time. A cache built without a `default_loader` has no
    /// way to satisfy this call, which spec §7 classifies as an
    /// invalid-argument condition (the "null loader" case, alongside null
    /// key/updater/options) rather than a reason to panic.
    pub async fn get_or_load(self: &Arc<Self>, key: K, reset_expiry_on_hit: bool) -> Result<Arc<V>, CacheError<E>>
    where
        K: fmt::Display,
    {
        let Some(loader) = self.default_loader.clone() else {
            return Err(CacheError::invalid_argument(format!(
                "cache `{}` has no default_loader configured; use get_or_load_with",
                self.name
            )));
        };
        self.get_or_load_with(key, reset_expiry_on_hit, loader).await
    }

    /// Stop the background sweep, drain every key gate, and invalidate
    /// (and dispose) every entry. After this the cache is still usable —
    /// `get_or_load` will simply start from empty and the sweep stays off
    /// — but is meant as a terminal shutdown (spec §4.3 `dispose`).
    pub async fn dispose(self: &Arc<Self>) {
        if let Some(handle) = self.sweep_task.lock().unwrap().take() {
            handle.abort();
        }
        self.invalidate_all().await;
        self.gates.dispose();
    }
}
