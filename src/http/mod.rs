//! HTTP surface: rate limiting middleware for axum and a demo server.

mod middleware;
mod server;

pub use middleware::{
    default_limit_key, rate_limit, too_many_requests, BucketFn, KeyFn, LimitedHandler,
    RateLimitLayer,
};
pub use server::HttpServer;
