//! In-process token bucket strategy.

use std::sync::{Arc, Weak};
use std::time::Duration;

use async_trait::async_trait;
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use parking_lot::Mutex;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, trace};

use super::backend::RateLimiterBackend;
use super::bucket::{limiting_disabled, micros, BucketConfig, TokenBucket};
use super::clock::{Clock, SystemClock};

/// A bucket plus the time it was last touched, for idle expiry.
#[derive(Debug, Clone, Copy)]
struct Slot {
    bucket: TokenBucket,
    last_seen_us: i64,
}

impl Slot {
    fn fresh(capacity: u64, now_us: i64) -> Self {
        Self {
            bucket: TokenBucket::fresh(capacity, now_us),
            last_seen_us: now_us,
        }
    }
}

/// Token bucket limiter keeping every bucket in process memory.
///
/// Buckets live in a [`DashMap`], which shards keys by hash; a decision for a
/// key runs while holding that key's shard lock, so two callers can never
/// spend the same token. Buckets idle for longer than the configured expiry
/// are treated as new on their next use and removed by
/// [`LocalRateLimiter::evict_expired`] or the background sweep.
#[derive(Debug)]
pub struct LocalRateLimiter {
    bucket: BucketConfig,
    clock: Arc<dyn Clock>,
    slots: DashMap<String, Slot>,
    sweep: Mutex<Option<JoinHandle<()>>>,
}

impl LocalRateLimiter {
    /// Create a local limiter using the system clock.
    pub fn new(bucket: BucketConfig) -> Self {
        Self::with_clock(bucket, Arc::new(SystemClock))
    }

    /// Create a local limiter reading time from `clock`.
    pub fn with_clock(bucket: BucketConfig, clock: Arc<dyn Clock>) -> Self {
        Self {
            bucket: bucket.resolved(),
            clock,
            slots: DashMap::new(),
            sweep: Mutex::new(None),
        }
    }

    /// The bucket shape used by [`LocalRateLimiter::allow`].
    pub fn bucket(&self) -> &BucketConfig {
        &self.bucket
    }

    /// Decide whether a request for `key` may proceed, using the bound
    /// bucket configuration.
    pub fn allow(&self, key: &str) -> bool {
        self.allow_with(key, self.bucket.fill_interval, self.bucket.capacity)
    }

    /// Decide whether a request for `key` may proceed under the given fill
    /// interval and capacity.
    ///
    /// A zero `fill_interval` or `capacity` disables limiting for the call.
    pub fn allow_with(&self, key: &str, fill_interval: Duration, capacity: u64) -> bool {
        if limiting_disabled(fill_interval, capacity) {
            return true;
        }

        let now_us = self.clock.now_micros();
        let fill_interval_us = micros(fill_interval);

        if let Some(mut slot) = self.slots.get_mut(key) {
            return self.take(key, &mut slot, capacity, fill_interval_us, now_us);
        }

        match self.slots.entry(key.to_owned()) {
            Entry::Occupied(mut occupied) => {
                self.take(key, occupied.get_mut(), capacity, fill_interval_us, now_us)
            }
            Entry::Vacant(vacant) => {
                debug!(key = %key, capacity, fill_interval_us, "Creating new bucket");
                vacant.insert(Slot::fresh(capacity, now_us));
                true
            }
        }
    }

    fn take(
        &self,
        key: &str,
        slot: &mut Slot,
        capacity: u64,
        fill_interval_us: u64,
        now_us: i64,
    ) -> bool {
        if self.is_expired(slot, now_us) {
            debug!(key = %key, "Bucket expired, starting fresh");
            *slot = Slot::fresh(capacity, now_us);
            return true;
        }

        slot.last_seen_us = now_us;
        let allowed = slot.bucket.take(capacity, fill_interval_us, now_us);

        trace!(
            key = %key,
            allowed,
            remaining = slot.bucket.remaining_tokens,
            "Local bucket decision"
        );
        if !allowed {
            debug!(key = %key, "Rate limit exceeded");
        }
        allowed
    }

    fn is_expired(&self, slot: &Slot, now_us: i64) -> bool {
        now_us.saturating_sub(slot.last_seen_us) >= self.expiry_us()
    }

    fn expiry_us(&self) -> i64 {
        i64::try_from(micros(self.bucket.expiry)).unwrap_or(i64::MAX)
    }

    /// Remove every bucket idle for at least the configured expiry.
    ///
    /// Returns the number of buckets removed.
    pub fn evict_expired(&self) -> usize {
        let now_us = self.clock.now_micros();
        let mut evicted = 0;

        self.slots.retain(|_, slot| {
            let keep = !self.is_expired(slot, now_us);
            if !keep {
                evicted += 1;
            }
            keep
        });

        if evicted > 0 {
            debug!(evicted, remaining = self.slots.len(), "Evicted idle buckets");
        }
        evicted
    }

    /// Start a background task calling [`LocalRateLimiter::evict_expired`]
    /// every `every`. Replaces any sweep already running.
    ///
    /// The task holds a weak reference and stops once the limiter is dropped.
    /// Outside a Tokio runtime, or with a zero period, no task is started and
    /// idle buckets are only reset on their next use.
    pub fn start_eviction_sweep(self: &Arc<Self>, every: Duration) {
        if every.is_zero() {
            debug!("Zero sweep period, idle buckets are reset lazily");
            return;
        }

        let Ok(runtime) = tokio::runtime::Handle::try_current() else {
            debug!("No async runtime, idle buckets are reset lazily");
            return;
        };

        let handle = runtime.spawn(run_sweep(Arc::downgrade(self), every));
        if let Some(previous) = self.sweep.lock().replace(handle) {
            previous.abort();
        }
        debug!(every = ?every, "Started idle bucket sweep");
    }

    /// Number of live buckets.
    pub fn len(&self) -> usize {
        self.slots.len()
    }

    /// Whether no bucket is held.
    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    /// Drop every bucket.
    pub fn clear(&self) {
        self.slots.clear();
    }
}

async fn run_sweep(limiter: Weak<LocalRateLimiter>, every: Duration) {
    let mut interval = tokio::time::interval(every);
    interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
    // The first tick completes immediately.
    interval.tick().await;

    loop {
        interval.tick().await;
        let Some(limiter) = limiter.upgrade() else {
            break;
        };
        limiter.evict_expired();
    }
}

impl Drop for LocalRateLimiter {
    fn drop(&mut self) {
        if let Some(handle) = self.sweep.get_mut().take() {
            handle.abort();
        }
    }
}

#[async_trait]
impl RateLimiterBackend for LocalRateLimiter {
    async fn allow(&self, key: &str) -> bool {
        LocalRateLimiter::allow(self, key)
    }

    async fn allow_with(&self, key: &str, fill_interval: Duration, capacity: u64) -> bool {
        LocalRateLimiter::allow_with(self, key, fill_interval, capacity)
    }

    fn bucket(&self) -> &BucketConfig {
        LocalRateLimiter::bucket(self)
    }
}
