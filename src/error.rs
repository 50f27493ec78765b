//! Error types returned by cache operations.
use std::fmt;
use std::time::Duration;

/// Errors raised by a [`crate::Cache`].
///
/// Generic over `E`, the error type of the loader function supplied to
/// `get_or_load`, so loader failures propagate with their original type
/// intact rather than being stringified.
#[derive(thiserror::Error, Debug)]
pub enum CacheError<E> {
    /// A constructor or option was given an invalid value (blank cache
    /// name, non-positive duration, out-of-range jitter percentage).
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    /// `get_or_load` could not acquire the per-key gate within the
    /// configured `circuit_breaker_timeout`.
    #[error("cache `{cache_name}` timed out after {timeout:?} waiting for key gate on key `{key}`")]
    CircuitBreakerTimeout {
        cache_name: String,
        key: String,
        timeout: Duration,
    },

    /// The loader function returned an error. Propagated verbatim.
    #[error(transparent)]
    Loader(E),
}

impl<E> CacheError<E> {
    pub(crate) fn circuit_breaker_timeout(cache_name: &str, key: impl fmt::Display, timeout: Duration) -> Self {
        CacheError::CircuitBreakerTimeout {
            cache_name: cache_name.to_owned(),
            key: key.to_string(),
            timeout,
        }
    }

    pub(crate) fn invalid_argument(msg: impl Into<String>) -> Self {
        CacheError::InvalidArgument(msg.into())
    }
}
