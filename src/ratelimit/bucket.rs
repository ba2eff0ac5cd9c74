//! Token bucket shape and state.

use std::time::Duration;

/// Default bucket capacity when none is configured.
pub const DEFAULT_CAPACITY: u64 = 1000;
/// Default time to produce one token (one token per millisecond).
pub const DEFAULT_FILL_INTERVAL: Duration = Duration::from_micros(1000);
/// Default time-to-live of an idle bucket.
pub const DEFAULT_EXPIRY: Duration = Duration::from_secs(60 * 60);
/// Tokens produced per elapsed fill interval.
pub const TOKENS_PER_FILL: u64 = 1;

/// The shape of a token bucket: how many tokens it holds, how fast it
/// refills and how long it survives without traffic.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BucketConfig {
    /// Maximum tokens the bucket may hold (burst size)
    pub capacity: u64,
    /// Time required to produce one token
    pub fill_interval: Duration,
    /// Idle time after which the bucket is discarded
    pub expiry: Duration,
}

impl Default for BucketConfig {
    fn default() -> Self {
        Self {
            capacity: DEFAULT_CAPACITY,
            fill_interval: DEFAULT_FILL_INTERVAL,
            expiry: DEFAULT_EXPIRY,
        }
    }
}

impl BucketConfig {
    /// Create a bucket configuration. Zero values are kept as-is until
    /// [`BucketConfig::resolved`] is applied.
    pub fn new(capacity: u64, fill_interval: Duration, expiry: Duration) -> Self {
        Self {
            capacity,
            fill_interval,
            expiry,
        }
    }

    /// Replace every zero field with its default.
    pub fn resolved(self) -> Self {
        Self {
            capacity: if self.capacity == 0 {
                DEFAULT_CAPACITY
            } else {
                self.capacity
            },
            fill_interval: if self.fill_interval.is_zero() {
                DEFAULT_FILL_INTERVAL
            } else {
                self.fill_interval
            },
            expiry: if self.expiry.is_zero() {
                DEFAULT_EXPIRY
            } else {
                self.expiry
            },
        }
    }

    /// Fill interval in whole microseconds, never below one.
    pub fn fill_interval_micros(&self) -> u64 {
        micros(self.fill_interval)
    }

    /// Expiry in whole seconds, never below one.
    pub fn expiry_secs(&self) -> u64 {
        self.expiry.as_secs().max(1)
    }
}

/// Whether a per-call override switches limiting off for the call.
///
/// A zero fill interval or a zero capacity means "no limit configured",
/// and the request is admitted without touching any bucket.
pub fn limiting_disabled(fill_interval: Duration, capacity: u64) -> bool {
    fill_interval.is_zero() || capacity == 0
}

pub(crate) fn micros(duration: Duration) -> u64 {
    u64::try_from(duration.as_micros()).unwrap_or(u64::MAX).max(1)
}

/// Per-key bucket state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TokenBucket {
    /// Tokens left after the last decision
    pub remaining_tokens: u64,
    /// Microseconds since the Unix epoch of the last admitted request
    pub last_refill_us: i64,
}

impl TokenBucket {
    /// A bucket created by its first request: full, minus the token that
    /// request consumes.
    pub fn fresh(capacity: u64, now_us: i64) -> Self {
        Self {
            remaining_tokens: capacity.saturating_sub(1),
            last_refill_us: now_us,
        }
    }

    /// Refill the bucket for the time elapsed since the last admission and
    /// try to take one token.
    ///
    /// Produced tokens are floored and capped at `capacity`. A denial keeps
    /// `last_refill_us` so partial progress towards the next token is not
    /// lost; an admission consumes a token and re-anchors at `now_us`.
    pub fn take(&mut self, capacity: u64, fill_interval_us: u64, now_us: i64) -> bool {
        let available = self.available(capacity, fill_interval_us, now_us);

        if available == 0 {
            self.remaining_tokens = 0;
            return false;
        }

        self.remaining_tokens = available - 1;
        self.last_refill_us = now_us;
        true
    }

    /// Tokens the bucket would hold at `now_us`, without mutating it.
    pub fn available(&self, capacity: u64, fill_interval_us: u64, now_us: i64) -> u64 {
        let elapsed_us = now_us.saturating_sub(self.last_refill_us).max(0) as u64;
        let produced = produced_tokens(elapsed_us, fill_interval_us);
        self.remaining_tokens.saturating_add(produced).min(capacity)
    }
}

/// Whole tokens produced over `elapsed_us` at one token per
/// `fill_interval_us`.
///
/// The Redis script evaluates the same expression in the same order, so both
/// strategies round identically.
pub fn produced_tokens(elapsed_us: u64, fill_interval_us: u64) -> u64 {
    let fill_interval_us = fill_interval_us.max(1) as f64;
    (elapsed_us as f64 * TOKENS_PER_FILL as f64 / fill_interval_us).floor() as u64
}
