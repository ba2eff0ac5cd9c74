//! Distributed token bucket strategy backed by a shared store.
//!
//! No bucket state is held in process: each decision is one atomic
//! [`TakeRequest`] executed by a [`BucketStore`], using the store's clock so
//! callers with drifting clocks still agree on refill timing.

use std::time::Duration;

use async_trait::async_trait;
use tracing::{debug, error, trace, warn};

use super::backend::RateLimiterBackend;
use super::bucket::{limiting_disabled, BucketConfig};
use super::store::{BucketStore, RedisBucketStore, TakeRequest};

/// Default upper bound on one store round trip.
pub const DEFAULT_COMMAND_TIMEOUT: Duration = Duration::from_millis(250);

/// Tuning for the distributed strategy.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DistributedOptions {
    /// Deadline for one store round trip; `None` waits for the store.
    pub command_timeout: Option<Duration>,
}

impl Default for DistributedOptions {
    fn default() -> Self {
        Self {
            command_timeout: Some(DEFAULT_COMMAND_TIMEOUT),
        }
    }
}

/// A token bucket limiter whose buckets live in a shared store.
///
/// Failures never reach the caller: a store error, an unexpected reply or an
/// elapsed deadline is logged and the request is admitted.
#[derive(Debug)]
pub struct DistributedRateLimiter<S = RedisBucketStore> {
    store: S,
    bucket: BucketConfig,
    options: DistributedOptions,
}

impl<S: BucketStore> DistributedRateLimiter<S> {
    /// Create a distributed limiter with default options.
    pub fn new(store: S, bucket: BucketConfig) -> Self {
        Self::with_options(store, bucket, DistributedOptions::default())
    }

    /// Create a distributed limiter with explicit options.
    pub fn with_options(store: S, bucket: BucketConfig, options: DistributedOptions) -> Self {
        Self {
            store,
            bucket: bucket.resolved(),
            options,
        }
    }

    /// The bucket shape used by [`DistributedRateLimiter::allow`].
    pub fn bucket(&self) -> &BucketConfig {
        &self.bucket
    }

    /// The underlying store.
    pub fn store(&self) -> &S {
        &self.store
    }

    /// Decide whether a request for `key` may proceed, using the bound
    /// bucket configuration.
    pub async fn allow(&self, key: &str) -> bool {
        self.take(TakeRequest::new(key, &self.bucket)).await
    }

    /// Decide whether a request for `key` may proceed under the given fill
    /// interval and capacity.
    ///
    /// A zero `fill_interval` or `capacity` admits without contacting the store.
    pub async fn allow_with(&self, key: &str, fill_interval: Duration, capacity: u64) -> bool {
        if limiting_disabled(fill_interval, capacity) {
            trace!(key = %key, "Limiting disabled for call");
            return true;
        }

        let bucket = BucketConfig::new(capacity, fill_interval, self.bucket.expiry);
        self.take(TakeRequest::new(key, &bucket)).await
    }

    async fn take(&self, request: TakeRequest) -> bool {
        let result = match self.options.command_timeout {
            Some(deadline) => {
                match tokio::time::timeout(deadline, self.store.take(&request)).await {
                    Ok(result) => result,
                    Err(_) => {
                        warn!(
                            key = %request.key,
                            timeout = ?deadline,
                            "Bucket store call timed out, admitting request"
                        );
                        return true;
                    }
                }
            }
            None => self.store.take(&request).await,
        };

        match result {
            Ok(outcome) => {
                trace!(
                    key = %request.key,
                    is_limited = outcome.is_limited,
                    remaining = outcome.remaining_tokens,
                    last_refill_us = outcome.last_refill_us,
                    now_us = outcome.now_us,
                    fill_rate = request.tokens_per_fill as f64 / request.fill_interval_us as f64,
                    "Distributed bucket decision"
                );
                if outcome.is_limited {
                    debug!(key = %request.key, "Distributed rate limit exceeded");
                }
                outcome.allowed()
            }
            Err(e) => {
                error!(
                    key = %request.key,
                    error = %e,
                    "Bucket store call failed, admitting request"
                );
                true
            }
        }
    }
}

#[async_trait]
impl<S: BucketStore> RateLimiterBackend for DistributedRateLimiter<S> {
    async fn allow(&self, key: &str) -> bool {
        DistributedRateLimiter::allow(self, key).await
    }

    async fn allow_with(&self, key: &str, fill_interval: Duration, capacity: u64) -> bool {
        DistributedRateLimiter::allow_with(self, key, fill_interval, capacity).await
    }

    fn bucket(&self) -> &BucketConfig {
        DistributedRateLimiter::bucket(self)
    }
}
