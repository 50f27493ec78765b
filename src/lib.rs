#![doc = include_str!("../README.md")]

pub mod cache;
pub mod entry;
pub mod error;
pub mod gate;
pub mod options;
pub mod self_refresh;
pub mod store;

pub use crate::cache::{loader_fn, Cache, CacheBuilder, LoaderFn};
pub use crate::entry::{disposer_for, Disposable, Entry};
pub use crate::error::CacheError;
pub use crate::options::{CacheOptions, SelfRefreshingCacheOptions};
pub use crate::self_refresh::SelfRefreshingCache;
pub use crate::store::{InMemoryStore, KVStore, SweepResult};
