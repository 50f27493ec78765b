//! Per-key single-flight gate registry.
use std::hash::Hash;
use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use tokio::sync::{Mutex, OwnedMutexGuard};
use tokio::time::error::Elapsed;

/// A per-key mutual-exclusion token (spec §3, `KeyGate<K>`).
type Gate = Arc<Mutex<()>>;

/// Concurrent map from key to [`Gate`], bounding in-flight loads per key
/// to one (spec §4.4).
///
/// Gates are never removed between uses — only drained wholesale on
/// [`KeyGateRegistry::dispose`] — matching the reference implementation
/// (spec §9, Open Question a). The registry therefore grows
/// monotonically with the distinct key population over the cache's
/// lifetime; this is bounded in practice by the same sweep that bounds
/// the store, since a key that's been evicted and never looked up again
/// stops accumulating new holders (even though its gate lingers).
pub struct KeyGateRegistry<K>
where
    K: Eq + Hash,
{
    gates: DashMap<K, Gate>,
}

impl<K> KeyGateRegistry<K>
where
    K: Eq + Hash + Clone,
{
    pub fn new() -> Self {
        KeyGateRegistry { gates: DashMap::new() }
    }

    /// Get-or-create the gate for `key`. `DashMap::entry().or_insert_with`
    /// only constructs the tentative `Mutex` when the slot is actually
    /// empty, so there is never a discarded loser to clean up (spec §4.4,
    /// §9 note a) — a strictly stronger version of "construct tentative,
    /// insert-if-absent, discard on race".
    fn ensure_key_gate(&self, key: &K) -> Gate {
        Arc::clone(&self.gates.entry(key.clone()).or_insert_with(|| Arc::new(Mutex::new(()))))
    }

    /// Acquire the gate for `key`, bounded by `timeout`. `None` means
    /// "wait forever" (spec §3: `circuitBreakerTimeoutForAdditionalThreadsPerKey`
    /// = "infinite").
    pub async fn acquire(&self, key: &K, timeout: Option<Duration>) -> Result<OwnedMutexGuard<()>, Elapsed> {
        let gate = self.ensure_key_gate(key);
        match timeout {
            None => Ok(gate.lock_owned().await),
            Some(duration) => tokio::time::timeout(duration, gate.lock_owned()).await,
        }
    }

    /// Drain every gate from the registry. Gates already held by a caller
    /// remain valid for that caller until released (spec §3) — dropping
    /// our `Arc` here only removes the registry's own reference.
    pub fn dispose(&self) {
        self.gates.clear();
    }

    pub fn len(&self) -> usize {
        self.gates.len()
    }

    pub fn is_empty(&self) -> bool {
        self.gates.is_empty()
    }
}

impl<K> Default for KeyGateRegistry<K>
where
    K: Eq + Hash + Clone,
{
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[tokio::test]
    async fn acquire_creates_gate_lazily() {
        let registry: KeyGateRegistry<&str> = KeyGateRegistry::new();
        assert_eq!(registry.len(), 0);
        let _guard = registry.acquire(&"k", None).await.unwrap();
        assert_eq!(registry.len(), 1);
    }

    #[tokio::test]
    async fn second_acquire_waits_for_first_release() {
        let registry = Arc::new(KeyGateRegistry::<&str>::new());
        let order = Arc::new(AtomicUsize::new(0));

        let first_guard = registry.acquire(&"k", None).await.unwrap();

        let registry2 = Arc::clone(&registry);
        let order2 = Arc::clone(&order);
        let handle = tokio::spawn(async move {
            let _guard = registry2.acquire(&"k", None).await.unwrap();
            order2.fetch_add(1, Ordering::SeqCst);
        });

        tokio::time::sleep(Duration::from_millis(20)).await;
        assert_eq!(order.load(Ordering::SeqCst), 0);

        drop(first_guard);
        handle.await.unwrap();
        assert_eq!(order.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn zero_timeout_fails_fast_when_already_held() {
        let registry = Arc::new(KeyGateRegistry::<&str>::new());
        let _held = registry.acquire(&"k", None).await.unwrap();
        let result = registry.acquire(&"k", Some(Duration::ZERO)).await;
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn dispose_clears_registry() {
        let registry: KeyGateRegistry<&str> = KeyGateRegistry::new();
        let _guard = registry.acquire(&"k", None).await.unwrap();
        registry.dispose();
        assert!(registry.is_empty());
    }
}
