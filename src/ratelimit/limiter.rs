//! Rate limiter facade.

use std::sync::Arc;
use std::time::Duration;

use tracing::info;

use super::backend::RateLimiterBackend;
use super::bucket::BucketConfig;
use super::distributed::{DistributedOptions, DistributedRateLimiter};
use super::local::LocalRateLimiter;
use super::store::{BucketStore, RedisBucketStore};
use crate::config::{Backend, LimiterConfig};
use crate::error::Result;

/// Uniform entry point over the local and distributed strategies.
///
/// The facade resolves the bucket configuration once (zero fields become
/// defaults) and forwards every decision to its strategy. It is cheap to
/// share behind an [`Arc`] across request handlers.
#[derive(Clone)]
pub struct RateLimiter {
    /// The strategy making decisions
    backend: Arc<dyn RateLimiterBackend>,
    /// Resolved bucket shape bound to [`RateLimiter::allow`]
    bucket: BucketConfig,
}

impl RateLimiter {
    /// Create a limiter keeping buckets in process memory.
    ///
    /// When called inside a Tokio runtime, idle buckets are swept once per
    /// expiry period; otherwise they are only reset on their next use.
    pub fn local(bucket: BucketConfig) -> Self {
        let every = bucket.resolved().expiry;
        Self::local_with_sweep(bucket, every)
    }

    /// Create a local limiter sweeping idle buckets every `every`.
    pub fn local_with_sweep(bucket: BucketConfig, every: Duration) -> Self {
        let local = Arc::new(LocalRateLimiter::new(bucket));
        local.start_eviction_sweep(every);
        Self::from_backend(local)
    }

    /// Create a limiter whose buckets live in `store`.
    pub fn distributed<S>(store: S, bucket: BucketConfig, options: DistributedOptions) -> Self
    where
        S: BucketStore + 'static,
    {
        let distributed = DistributedRateLimiter::with_options(store, bucket, options);
        Self::from_backend(Arc::new(distributed))
    }

    /// Wrap an already built strategy, reporting the bucket it resolved.
    pub fn from_backend(backend: Arc<dyn RateLimiterBackend>) -> Self {
        let bucket = *backend.bucket();
        Self { backend, bucket }
    }

    /// Build the limiter described by `config`, connecting to the store when
    /// the Redis backend is selected.
    pub async fn from_config(config: &LimiterConfig) -> Result<Self> {
        let bucket = config.bucket.to_bucket_config().resolved();

        let limiter = match config.backend {
            Backend::Local => Self::local_with_sweep(bucket, config.sweep_interval()),
            Backend::Redis => {
                let store = RedisBucketStore::connect(&config.redis_url, &config.key_prefix).await?;
                let options = DistributedOptions {
                    command_timeout: config.command_timeout(),
                };
                Self::distributed(store, bucket, options)
            }
        };

        info!(
            backend = ?config.backend,
            capacity = bucket.capacity,
            fill_interval = ?bucket.fill_interval,
            expiry = ?bucket.expiry,
            "Rate limiter initialized"
        );
        Ok(limiter)
    }

    /// Decide whether a request for `key` may proceed under the bound bucket
    /// configuration.
    pub async fn allow(&self, key: &str) -> bool {
        self.backend.allow(key).await
    }

    /// Decide whether a request for `key` may proceed under an explicit fill
    /// interval and capacity. A zero value for either admits unconditionally.
    pub async fn allow_with(&self, key: &str, fill_interval: Duration, capacity: u64) -> bool {
        self.backend.allow_with(key, fill_interval, capacity).await
    }

    /// The resolved bucket configuration.
    pub fn bucket(&self) -> &BucketConfig {
        &self.bucket
    }
}

impl std::fmt::Debug for RateLimiter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RateLimiter")
            .field("bucket", &self.bucket)
            .finish_non_exhaustive()
    }
}

impl Default for RateLimiter {
    fn default() -> Self {
        Self::local(BucketConfig::default())
    }
}
