//! Validated configuration for a [`crate::cache::Cache`].
use std::convert::Infallible;
use std::time::Duration;

use crate::error::CacheError;

/// Options controlling a single [`crate::cache::Cache`] instance.
///
/// Constructed via [`CacheOptions::new`], which validates eagerly so a
/// misconfigured cache fails at construction rather than surprising a
/// caller deep inside `get_or_load`.
#[derive(Debug, Clone)]
pub struct CacheOptions {
    cache_name: String,
    cache_item_expiry: Duration,
    cache_item_expiry_percentage_randomization: u8,
    flush_interval: Duration,
    maximum_cache_size_indicator: usize,
    circuit_breaker_timeout_for_additional_threads_per_key: Option<Duration>,
    dispose_expired_values_if_disposable: bool,
}

impl CacheOptions {
    /// Build and validate a new set of options.
    ///
    /// `circuit_breaker_timeout` of `None` means "wait forever" for a
    /// secondary caller on a key that is already loading; `Some(Duration::ZERO)`
    /// means "never wait beyond the first holder" (fail fast).
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        cache_name: impl Into<String>,
        cache_item_expiry: Duration,
        cache_item_expiry_percentage_randomization: u8,
        flush_interval: Duration,
        maximum_cache_size_indicator: usize,
        circuit_breaker_timeout_for_additional_threads_per_key: Option<Duration>,
        dispose_expired_values_if_disposable: bool,
    ) -> Result<Self, CacheError<Infallible>> {
        let cache_name = cache_name.into();
        if cache_name.trim().is_empty() {
            return Err(CacheError::invalid_argument("cache_name must not be blank"));
        }
        if cache_item_expiry.is_zero() {
            return Err(CacheError::invalid_argument("cache_item_expiry must be > 0"));
        }
        if flush_interval.is_zero() {
            return Err(CacheError::invalid_argument("flush_interval must be > 0"));
        }
        if cache_item_expiry_percentage_randomization > 100 {
            return Err(CacheError::invalid_argument(
                "cache_item_expiry_percentage_randomization must be in 0..=100",
            ));
        }

        Ok(CacheOptions {
            cache_name,
            cache_item_expiry,
            cache_item_expiry_percentage_randomization,
            flush_interval,
            maximum_cache_size_indicator,
            circuit_breaker_timeout_for_additional_threads_per_key,
            dispose_expired_values_if_disposable,
        })
    }

    pub fn cache_name(&self) -> &str {
        &self.cache_name
    }

    pub fn cache_item_expiry(&self) -> Duration {
        self.cache_item_expiry
    }

    pub fn cache_item_expiry_percentage_randomization(&self) -> u8 {
        self.cache_item_expiry_percentage_randomization
    }

    pub fn flush_interval(&self) -> Duration {
        self.flush_interval
    }

    pub fn maximum_cache_size_indicator(&self) -> usize {
        self.maximum_cache_size_indicator
    }

    pub fn circuit_breaker_timeout_for_additional_threads_per_key(&self) -> Option<Duration> {
        self.circuit_breaker_timeout_for_additional_threads_per_key
    }

    pub fn dispose_expired_values_if_disposable(&self) -> bool {
        self.dispose_expired_values_if_disposable
    }

    /// `cacheItemExpiryPercentageRandomizationMilliseconds` from spec §3:
    /// the jitter window, in milliseconds, as a percentage of the expiry.
    pub fn cache_item_expiry_percentage_randomization_milliseconds(&self) -> u64 {
        let expiry_ms = self.cache_item_expiry.as_millis() as u64;
        expiry_ms * self.cache_item_expiry_percentage_randomization as u64 / 100
    }
}

/// Options for a [`crate::self_refresh::SelfRefreshingCache`]: a
/// [`CacheOptions`] plus the proactive refresh cadence.
#[derive(Debug, Clone)]
pub struct SelfRefreshingCacheOptions {
    cache_options: CacheOptions,
    refresh_interval: Duration,
}

impl SelfRefreshingCacheOptions {
    pub fn new(cache_options: CacheOptions, refresh_interval: Duration) -> Result<Self, CacheError<Infallible>> {
        if refresh_interval.is_zero() {
            return Err(CacheError::invalid_argument("refresh_interval must be > 0"));
        }
        Ok(SelfRefreshingCacheOptions {
            cache_options,
            refresh_interval,
        })
    }

    pub fn cache_options(&self) -> &CacheOptions {
        &self.cache_options
    }

    pub fn refresh_interval(&self) -> Duration {
        self.refresh_interval
    }
}
