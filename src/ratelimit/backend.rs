//! Rate limiter trait for abstracting local and distributed implementations.

use std::time::Duration;

use async_trait::async_trait;

use super::bucket::BucketConfig;

/// Trait for token bucket strategies.
///
/// This trait abstracts over the in-process [`LocalRateLimiter`] and the
/// store-backed [`DistributedRateLimiter`] so callers such as the HTTP
/// middleware can work with either. Implementations never return an error:
/// an internal failure admits the request.
///
/// [`LocalRateLimiter`]: super::LocalRateLimiter
/// [`DistributedRateLimiter`]: super::DistributedRateLimiter
#[async_trait]
pub trait RateLimiterBackend: Send + Sync {
    /// Decide whether a request for `key` may proceed under the strategy's
    /// bound bucket configuration.
    async fn allow(&self, key: &str) -> bool;

    /// Decide whether a request for `key` may proceed under an explicit fill
    /// interval and capacity. A zero value for either admits unconditionally.
    async fn allow_with(&self, key: &str, fill_interval: Duration, capacity: u64) -> bool;

    /// The resolved bucket shape used by [`RateLimiterBackend::allow`].
    fn bucket(&self) -> &BucketConfig;
}
