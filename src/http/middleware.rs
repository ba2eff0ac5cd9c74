//! axum middleware turning limiter decisions into HTTP responses.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use axum::extract::{ConnectInfo, MatchedPath, Request, State};
use axum::http::StatusCode;
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};
use axum::{Json, Router};
use serde_json::json;
use tracing::{debug, instrument};

use crate::ratelimit::RateLimiter;

/// Computes the limiter key of a request from the request and the peer address.
pub type KeyFn = Arc<dyn Fn(&Request, Option<SocketAddr>) -> String + Send + Sync>;

/// Optionally overrides the bucket of a request with `(fill_interval, capacity)`.
pub type BucketFn = Arc<dyn Fn(&Request) -> Option<(Duration, u64)> + Send + Sync>;

/// Builds the response sent to a rejected request.
pub type LimitedHandler = Arc<dyn Fn(&Request) -> Response + Send + Sync>;

/// Middleware state: the limiter plus how to key and size each request.
#[derive(Clone)]
pub struct RateLimitLayer {
    limiter: Arc<RateLimiter>,
    key_fn: KeyFn,
    bucket_fn: Option<BucketFn>,
    limited_handler: LimitedHandler,
}

impl RateLimitLayer {
    /// Limit requests per client address and route with the limiter's bucket.
    pub fn new(limiter: Arc<RateLimiter>) -> Self {
        Self {
            limiter,
            key_fn: Arc::new(default_limit_key),
            bucket_fn: None,
            limited_handler: Arc::new(|_| too_many_requests()),
        }
    }

    /// Replace how the limiter key is computed.
    pub fn with_key<F>(mut self, key_fn: F) -> Self
    where
        F: Fn(&Request, Option<SocketAddr>) -> String + Send + Sync + 'static,
    {
        self.key_fn = Arc::new(key_fn);
        self
    }

    /// Choose a fill interval and capacity per request. Returning `None`
    /// keeps the limiter's bucket; a zero value disables limiting.
    pub fn with_bucket<F>(mut self, bucket_fn: F) -> Self
    where
        F: Fn(&Request) -> Option<(Duration, u64)> + Send + Sync + 'static,
    {
        self.bucket_fn = Some(Arc::new(bucket_fn));
        self
    }

    /// Replace the response sent when a request is rejected.
    pub fn with_limited_handler<F>(mut self, handler: F) -> Self
    where
        F: Fn(&Request) -> Response + Send + Sync + 'static,
    {
        self.limited_handler = Arc::new(handler);
        self
    }

    /// Protect every route currently registered on `router`.
    pub fn apply<S>(self, router: Router<S>) -> Router<S>
    where
        S: Clone + Send + Sync + 'static,
    {
        router.route_layer(axum::middleware::from_fn_with_state(self, rate_limit))
    }

    /// Key and optional bucket override of `request`.
    ///
    /// Runs before any await so the request is never borrowed across one.
    fn extract(&self, request: &Request) -> (String, Option<(Duration, u64)>) {
        let peer = request
            .extensions()
            .get::<ConnectInfo<SocketAddr>>()
            .map(|ConnectInfo(addr)| *addr);
        let key = (self.key_fn)(request, peer);
        let bucket = self.bucket_fn.as_ref().and_then(|f| f(request));
        (key, bucket)
    }

    async fn decide(&self, key: &str, bucket: Option<(Duration, u64)>) -> bool {
        let allowed = match bucket {
            Some((fill_interval, capacity)) => {
                self.limiter.allow_with(key, fill_interval, capacity).await
            }
            None => self.limiter.allow(key).await,
        };

        if !allowed {
            debug!(key = %key, "Request rejected by rate limiter");
        }
        allowed
    }
}

impl std::fmt::Debug for RateLimitLayer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RateLimitLayer")
            .field("limiter", &self.limiter)
            .field("per_request_bucket", &self.bucket_fn.is_some())
            .finish_non_exhaustive()
    }
}

/// Key a request by client IP and route: `"{ip}:{path}"`.
///
/// The client IP is the peer address, else the first `x-forwarded-for`
/// entry, else `unknown`. The path is the matched route template when
/// available, so `/users/1` and `/users/2` share a bucket under `/users/{id}`.
pub fn default_limit_key(request: &Request, peer: Option<SocketAddr>) -> String {
    let client = peer
        .map(|addr| addr.ip().to_string())
        .or_else(|| forwarded_for(request))
        .unwrap_or_else(|| "unknown".to_string());

    let path = request
        .extensions()
        .get::<MatchedPath>()
        .map(|matched| matched.as_str())
        .unwrap_or_else(|| request.uri().path());

    format!("{}:{}", client, path)
}

fn forwarded_for(request: &Request) -> Option<String> {
    request
        .headers()
        .get("x-forwarded-for")?
        .to_str()
        .ok()?
        .split(',')
        .next()
        .map(|ip| ip.trim().to_string())
        .filter(|ip| !ip.is_empty())
}

/// Middleware function: run the inner handler if admitted, the limited
/// handler otherwise.
#[instrument(skip_all, fields(method = %request.method(), path = %request.uri().path()))]
pub async fn rate_limit(
    State(layer): State<RateLimitLayer>,
    request: Request,
    next: Next,
) -> Response {
    let (key, bucket) = layer.extract(&request);
    if !layer.decide(&key, bucket).await {
        return (layer.limited_handler)(&request);
    }
    next.run(request).await
}

/// The default response sent to a rejected request: 429 with a JSON body.
pub fn too_many_requests() -> Response {
    (
        StatusCode::TOO_MANY_REQUESTS,
        Json(json!({ "error": "too many requests" })),
    )
        .into_response()
}
