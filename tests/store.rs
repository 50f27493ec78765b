//! Integration tests for `KVStore` round-trip and idempotence laws (spec §8).
use std::sync::Arc;
use std::time::{Duration, Instant};

use recache::store::InvalidateFn;
use recache::{InMemoryStore, KVStore};

fn always_remove<K: Send + 'static>() -> Box<InvalidateFn<K>> {
    Box::new(|_| Box::pin(async { true }))
}

#[tokio::test]
async fn try_add_then_try_get_yields_the_same_value() {
    let store: InMemoryStore<u32, String> = InMemoryStore::new();
    assert!(store.try_add(1, "hello".to_string()).await);
    let entry = store.try_get(&1).await.unwrap();
    assert_eq!(entry.value().as_str(), "hello");
}

#[tokio::test]
async fn get_or_load_analogue_is_idempotent_while_fresh() {
    let store: InMemoryStore<u32, u32> = InMemoryStore::new();
    let fallback = Arc::new(99);
    let first = store
        .add_or_update(1, Arc::clone(&fallback), Box::new(|_, old| Arc::clone(old)))
        .await
        .unwrap();
    let second = store
        .add_or_update(1, Arc::clone(&fallback), Box::new(|_, old| Arc::clone(old)))
        .await
        .unwrap();
    assert_eq!(**first.value(), 99);
    assert_eq!(**second.value(), 99);
}

#[tokio::test]
async fn invalidate_all_then_enumeration_is_empty() {
    let store: InMemoryStore<u32, u32> = InMemoryStore::new();
    for i in 0..10u32 {
        store.try_add(i, i).await;
    }
    assert_eq!(store.entries().len(), 10);
    store.invalidate_all(&*always_remove()).await;
    assert_eq!(store.entries().len(), 0);
}

#[tokio::test]
async fn sweep_is_idempotent_on_an_empty_store() {
    let store: InMemoryStore<u32, u32> = InMemoryStore::new();
    let first = store.flush_invalidated(10, Instant::now(), &*always_remove()).await;
    let second = store.flush_invalidated(10, Instant::now(), &*always_remove()).await;
    assert_eq!(first.remaining, 0);
    assert_eq!(second.remaining, 0);
    assert_eq!(second.flushed, 0);
}

#[tokio::test]
async fn sweep_respects_size_indicator_after_a_larger_population() {
    let store: InMemoryStore<u32, u32> = InMemoryStore::new();
    for i in 0..200u32 {
        store.try_add(i, i).await;
    }
    let result = store
        .flush_invalidated(99, Instant::now() - Duration::from_secs(3600), &*always_remove())
        .await;
    assert_eq!(result.remaining, 99);
    assert_eq!(store.entries().len(), 99);
}
