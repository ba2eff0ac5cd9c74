//! Bucketgate - Token Bucket Rate Limiting
//!
//! This crate decides whether a keyed request may proceed using the token
//! bucket algorithm. Bucket state lives either in process memory or in a
//! shared Redis-protocol store, so every process behind a load balancer
//! enforces the same limit. An axum middleware adapts the decision to HTTP.

pub mod config;
pub mod error;
pub mod http;
pub mod ratelimit;
