//! HTTP server implementation.

use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;

use axum::routing::get;
use axum::{Json, Router};
use serde_json::{json, Value};
use tokio::net::TcpListener;
use tracing::{error, info};

use super::middleware::RateLimitLayer;
use crate::error::{BucketgateError, Result};
use crate::ratelimit::RateLimiter;

/// HTTP server whose routes are guarded by a [`RateLimiter`].
pub struct HttpServer {
    /// Address to bind to
    addr: SocketAddr,
    /// The rate limiter instance
    rate_limiter: Arc<RateLimiter>,
}

impl HttpServer {
    /// Create a new HTTP server.
    pub fn new(addr: SocketAddr, rate_limiter: Arc<RateLimiter>) -> Self {
        Self { addr, rate_limiter }
    }

    /// Routes served: `/` is rate limited, `/healthz` is not.
    pub fn router(&self) -> Router {
        let limited = Router::new().route("/", get(hello));

        RateLimitLayer::new(self.rate_limiter.clone())
            .apply(limited)
            .route("/healthz", get(healthz))
    }

    /// Start the HTTP server.
    ///
    /// This method will block until the server fails.
    pub async fn serve(self) -> Result<()> {
        self.serve_with_shutdown(std::future::pending()).await
    }

    /// Start the HTTP server with graceful shutdown.
    ///
    /// The server will shut down when the provided signal resolves.
    pub async fn serve_with_shutdown<F>(self, signal: F) -> Result<()>
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let listener = TcpListener::bind(self.addr).await.map_err(|e| {
            error!(addr = %self.addr, error = %e, "Failed to bind HTTP listener");
            BucketgateError::Io(e)
        })?;

        info!(addr = %listener.local_addr()?, "Starting HTTP server");

        let app = self
            .router()
            .into_make_service_with_connect_info::<SocketAddr>();

        axum::serve(listener, app)
            .with_graceful_shutdown(signal)
            .await
            .map_err(|e| {
                error!(error = %e, "HTTP server failed");
                BucketgateError::Io(e)
            })
    }
}

async fn hello() -> Json<Value> {
    Json(json!({ "message": "hi" }))
}

async fn healthz() -> &'static str {
    "ok"
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    use axum::body::Body;
    use axum::extract::Request;
    use axum::http::StatusCode;
    use tower::ServiceExt;

    use crate::ratelimit::BucketConfig;

    fn server() -> HttpServer {
        let bucket = BucketConfig::new(1, Duration::from_secs(3600), Duration::from_secs(3600));
        HttpServer::new(
            "127.0.0.1:0".parse().unwrap(),
            Arc::new(RateLimiter::local(bucket)),
        )
    }

    fn request(uri: &str) -> Request {
        Request::builder().uri(uri).body(Body::empty()).unwrap()
    }

    #[tokio::test]
    async fn test_root_is_limited() {
        let app = server().router();

        let first = app.clone().oneshot(request("/")).await.unwrap();
        assert_eq!(first.status(), StatusCode::OK);

        let second = app.clone().oneshot(request("/")).await.unwrap();
        assert_eq!(second.status(), StatusCode::TOO_MANY_REQUESTS);
    }

    #[tokio::test]
    async fn test_health_is_not_limited() {
        let app = server().router();

        for _ in 0..3 {
            let response = app.clone().oneshot(request("/healthz")).await.unwrap();
            assert_eq!(response.status(), StatusCode::OK);
        }
    }

    #[tokio::test]
    async fn test_serve_with_shutdown() {
        let result = server().serve_with_shutdown(async {}).await;
        assert!(result.is_ok());
    }
}
