//! Token bucket admission: the shared algorithm and its two strategies.

mod backend;
mod bucket;
mod clock;
mod distributed;
mod limiter;
mod local;
mod store;

pub use backend::RateLimiterBackend;
pub use bucket::{
    limiting_disabled, produced_tokens, BucketConfig, TokenBucket, DEFAULT_CAPACITY,
    DEFAULT_EXPIRY, DEFAULT_FILL_INTERVAL, TOKENS_PER_FILL,
};
pub use clock::{Clock, SystemClock};
#[cfg(test)]
pub(crate) use clock::ManualClock;
pub use distributed::{DistributedOptions, DistributedRateLimiter, DEFAULT_COMMAND_TIMEOUT};
pub use limiter::RateLimiter;
pub use local::LocalRateLimiter;
pub use store::{BucketStore, RedisBucketStore, TakeOutcome, TakeRequest, DEFAULT_KEY_PREFIX};
