//! Shared-store side of the distributed strategy.
//!
//! A [`BucketStore`] executes one [`TakeRequest`] as a single atomic unit
//! against state that every process shares, and reports a [`TakeOutcome`].
//! [`RedisBucketStore`] does this with a server-side script, so reading the
//! bucket, refilling it and writing it back cannot interleave with another
//! caller touching the same key.

use std::sync::LazyLock;

use async_trait::async_trait;
use redis::aio::ConnectionManager;
use tracing::debug;

use super::bucket::{BucketConfig, TOKENS_PER_FILL};
use crate::error::Result;

/// Default prefix of every bucket key written to the store.
pub const DEFAULT_KEY_PREFIX: &str = "bucketgate";

static TOKEN_BUCKET_SCRIPT: LazyLock<redis::Script> =
    LazyLock::new(|| redis::Script::new(include_str!("token_bucket.lua")));

/// Parameters of one atomic take against the shared store.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TakeRequest {
    /// Caller-supplied bucket key
    pub key: String,
    /// Maximum tokens the bucket may hold
    pub capacity: u64,
    /// Tokens produced per elapsed fill interval
    pub tokens_per_fill: u64,
    /// Time to produce `tokens_per_fill` tokens, in microseconds
    pub fill_interval_us: u64,
    /// Time-to-live of the stored bucket, in seconds
    pub ttl_secs: u64,
}

impl TakeRequest {
    /// Build a request for `key` from a bucket shape.
    pub fn new(key: &str, bucket: &BucketConfig) -> Self {
        Self {
            key: key.to_owned(),
            capacity: bucket.capacity,
            tokens_per_fill: TOKENS_PER_FILL,
            fill_interval_us: bucket.fill_interval_micros(),
            ttl_secs: bucket.expiry_secs(),
        }
    }
}

/// Result of an atomic take.
///
/// Only `is_limited` decides admission; the remaining fields are diagnostic.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TakeOutcome {
    /// Whether the request must be denied
    pub is_limited: bool,
    /// Tokens left in the bucket after the decision
    pub remaining_tokens: u64,
    /// Stored refill anchor after the decision, microseconds since the epoch
    pub last_refill_us: i64,
    /// The store's clock when the decision was made, microseconds since the epoch
    pub now_us: i64,
}

impl TakeOutcome {
    /// Whether the request may proceed.
    pub fn allowed(&self) -> bool {
        !self.is_limited
    }
}

/// A shared store able to run a token bucket take atomically.
#[async_trait]
pub trait BucketStore: Send + Sync {
    /// Read, refill, decide and write back the bucket for `request.key` as
    /// one indivisible step, using the store's own clock.
    async fn take(&self, request: &TakeRequest) -> Result<TakeOutcome>;
}

/// Redis (or any Redis-protocol server) holding one hash per bucket with the
/// fields `last_refill_us` and `remaining_tokens`.
#[derive(Clone)]
pub struct RedisBucketStore {
    connection_manager: ConnectionManager,
    key_prefix: String,
}

impl RedisBucketStore {
    /// Wrap an existing connection manager.
    pub fn new(connection_manager: ConnectionManager, key_prefix: impl Into<String>) -> Self {
        Self {
            connection_manager,
            key_prefix: key_prefix.into(),
        }
    }

    /// Open a managed connection to `url` and verify it with `PING`.
    pub async fn connect(url: &str, key_prefix: impl Into<String>) -> Result<Self> {
        let client = redis::Client::open(url)?;
        let mut connection_manager = ConnectionManager::new(client).await?;

        let _: String = redis::cmd("PING")
            .query_async(&mut connection_manager)
            .await?;
        debug!(url = %url, "Connected to bucket store");

        Ok(Self::new(connection_manager, key_prefix))
    }

    /// The key prefix applied to every bucket.
    pub fn key_prefix(&self) -> &str {
        &self.key_prefix
    }

    /// Full store key for a caller key.
    pub fn bucket_key(&self, key: &str) -> String {
        format!("{}:{}", self.key_prefix, key)
    }
}

impl std::fmt::Debug for RedisBucketStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RedisBucketStore")
            .field("key_prefix", &self.key_prefix)
            .finish_non_exhaustive()
    }
}

#[async_trait]
impl BucketStore for RedisBucketStore {
    async fn take(&self, request: &TakeRequest) -> Result<TakeOutcome> {
        let mut connection_manager = self.connection_manager.clone();

        let (is_limited, remaining_tokens, last_refill_us, now_us): (i64, i64, i64, i64) =
            TOKEN_BUCKET_SCRIPT
                .key(self.bucket_key(&request.key))
                .arg(request.capacity)
                .arg(request.tokens_per_fill)
                .arg(request.fill_interval_us)
                .arg(request.ttl_secs)
                .invoke_async(&mut connection_manager)
                .await?;

        Ok(TakeOutcome {
            is_limited: is_limited != 0,
            remaining_tokens: remaining_tokens.max(0) as u64,
            last_refill_us,
            now_us,
        })
    }
}
