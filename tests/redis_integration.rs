//! Runs against a live Redis-protocol server named by `REDIS_URL`.
//! Every test returns early when the variable is unset.

use std::env;
use std::sync::Arc;
use std::time::Duration;

use bucketgate::ratelimit::{
    BucketConfig, BucketStore, DistributedOptions, DistributedRateLimiter, RateLimiter,
    RedisBucketStore, TakeRequest,
};

fn redis_url() -> Option<String> {
    env::var("REDIS_URL").ok()
}

fn unique_prefix() -> String {
    let n: u64 = rand::random();
    format!("bucketgate_test_{n}")
}

async fn store(url: &str) -> RedisBucketStore {
    RedisBucketStore::connect(url, unique_prefix()).await.unwrap()
}

#[tokio::test]
async fn single_token_is_refilled_after_one_interval() {
    let Some(url) = redis_url() else { return };
    let limiter = DistributedRateLimiter::new(
        store(&url).await,
        BucketConfig::new(1, Duration::from_secs(1), Duration::from_secs(60)),
    );

    assert!(limiter.allow("client").await);
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert!(!limiter.allow("client").await);
    tokio::time::sleep(Duration::from_millis(1000)).await;
    assert!(limiter.allow("client").await);
}

#[tokio::test]
async fn burst_is_bounded_by_capacity() {
    let Some(url) = redis_url() else { return };
    let limiter = DistributedRateLimiter::new(
        store(&url).await,
        BucketConfig::new(3, Duration::from_secs(60), Duration::from_secs(60)),
    );

    for _ in 0..3 {
        assert!(limiter.allow("burst").await);
    }
    assert!(!limiter.allow("burst").await);
}

#[tokio::test]
async fn bucket_hash_and_ttl_are_written() {
    let Some(url) = redis_url() else { return };
    let store = store(&url).await;
    let bucket = BucketConfig::new(5, Duration::from_secs(1), Duration::from_secs(30));

    let outcome = store.take(&TakeRequest::new("fields", &bucket)).await.unwrap();
    assert!(outcome.allowed());
    assert_eq!(outcome.remaining_tokens, 4);
    assert_eq!(outcome.last_refill_us, outcome.now_us);

    let full_key = store.bucket_key("fields");
    let (remaining, last_refill) = stored_fields(&url, &full_key).await;
    assert_eq!(remaining, 4);
    assert_eq!(last_refill, outcome.last_refill_us);

    let client = redis::Client::open(url.as_str()).unwrap();
    let mut conn = client.get_multiplexed_async_connection().await.unwrap();
    let ttl: i64 = redis::cmd("TTL").arg(&full_key).query_async(&mut conn).await.unwrap();
    assert!(ttl > 0 && ttl <= 30);
}

async fn stored_fields(url: &str, full_key: &str) -> (i64, i64) {
    let client = redis::Client::open(url).unwrap();
    let mut conn = client.get_multiplexed_async_connection().await.unwrap();
    redis::cmd("HMGET")
        .arg(full_key)
        .arg("remaining_tokens")
        .arg("last_refill_us")
        .query_async(&mut conn)
        .await
        .unwrap()
}

#[tokio::test]
async fn denial_keeps_refill_anchor_and_empties_bucket() {
    let Some(url) = redis_url() else { return };
    let store = store(&url).await;
    let bucket = BucketConfig::new(1, Duration::from_secs(60), Duration::from_secs(60));
    let request = TakeRequest::new("denied", &bucket);

    let admitted = store.take(&request).await.unwrap();
    assert!(admitted.allowed());

    tokio::time::sleep(Duration::from_millis(20)).await;
    let denied = store.take(&request).await.unwrap();
    assert!(denied.is_limited);
    assert_eq!(denied.remaining_tokens, 0);
    assert_eq!(denied.last_refill_us, admitted.last_refill_us);
    assert!(denied.now_us > denied.last_refill_us);

    let (remaining, last_refill) = stored_fields(&url, &store.bucket_key("denied")).await;
    assert_eq!(remaining, 0);
    assert_eq!(last_refill, admitted.last_refill_us);
}

#[tokio::test]
async fn idle_refill_is_capped_at_capacity() {
    let Some(url) = redis_url() else { return };
    let store = store(&url).await;
    let bucket = BucketConfig::new(2, Duration::from_millis(1), Duration::from_secs(60));
    let request = TakeRequest::new("idle", &bucket);

    assert_eq!(store.take(&request).await.unwrap().remaining_tokens, 1);

    // Enough idle time to produce far more than two tokens.
    tokio::time::sleep(Duration::from_millis(100)).await;
    let outcome = store.take(&request).await.unwrap();
    assert!(outcome.allowed());
    assert_eq!(outcome.remaining_tokens, 1);
    assert_eq!(outcome.last_refill_us, outcome.now_us);

    let (remaining, last_refill) = stored_fields(&url, &store.bucket_key("idle")).await;
    assert_eq!(remaining, 1);
    assert_eq!(last_refill, outcome.now_us);
}

#[tokio::test]
async fn processes_sharing_a_store_share_buckets() {
    let Some(url) = redis_url() else { return };
    let prefix = unique_prefix();
    let bucket = BucketConfig::new(2, Duration::from_secs(60), Duration::from_secs(60));

    let a = RateLimiter::distributed(
        RedisBucketStore::connect(&url, prefix.clone()).await.unwrap(),
        bucket,
        DistributedOptions::default(),
    );
    let b = RateLimiter::distributed(
        RedisBucketStore::connect(&url, prefix).await.unwrap(),
        bucket,
        DistributedOptions::default(),
    );

    assert!(a.allow("shared").await);
    assert!(b.allow("shared").await);
    assert!(!a.allow("shared").await);
    assert!(!b.allow("shared").await);
}

#[tokio::test]
async fn concurrent_callers_never_overspend() {
    let Some(url) = redis_url() else { return };
    let limiter = Arc::new(DistributedRateLimiter::with_options(
        store(&url).await,
        BucketConfig::new(1, Duration::from_secs(60), Duration::from_secs(60)),
        DistributedOptions {
            command_timeout: None,
        },
    ));

    let handles: Vec<_> = (0..16)
        .map(|_| {
            let limiter = limiter.clone();
            tokio::spawn(async move { limiter.allow("contended").await })
        })
        .collect();

    let mut admitted = 0;
    for handle in handles {
        if handle.await.unwrap() {
            admitted += 1;
        }
    }
    assert_eq!(admitted, 1);
}

#[tokio::test]
async fn disabled_limits_always_admit() {
    let Some(url) = redis_url() else { return };
    let limiter = DistributedRateLimiter::new(store(&url).await, BucketConfig::default());

    for _ in 0..5 {
        assert!(limiter.allow_with("off", Duration::ZERO, 0).await);
    }
}
