use std::time::Duration;

use recache::{loader_fn, CacheBuilder, CacheOptions, InMemoryStore};
use simple_logger::SimpleLogger;

#[tokio::main]
async fn main() {
    // enable logs for demo purposes
    SimpleLogger::new().init().unwrap();

    let options = CacheOptions::new(
        "demo",
        Duration::from_secs(5),
        20,
        Duration::from_millis(500),
        100_000,
        Some(Duration::from_secs(2)),
        false,
    )
    .unwrap();

    let cache = CacheBuilder::new(InMemoryStore::<u64, u64>::new(), options)
        .default_loader(loader_fn(|key: u64| async move { Ok::<_, std::convert::Infallible>(key * key) }))
        .build();

    // load 100K entries through the cache
    for i in 0..100_000u64 {
        cache.get_or_load(i, false).await.unwrap();
    }

    println!("cached {} entries", cache.count());

    // let the background sweep run for a bit, trimming expired entries
    tokio::time::sleep(Duration::from_secs(6)).await;
    println!("after expiry: {} entries", cache.count());
}
