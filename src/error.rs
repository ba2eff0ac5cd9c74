//! Error types for Bucketgate.
//!
//! Admission decisions never fail; these errors come from building a limiter,
//! loading configuration and serving HTTP.

use thiserror::Error;

/// Main error type for Bucketgate operations.
#[derive(Error, Debug)]
pub enum BucketgateError {
    /// Configuration-related errors
    #[error("Configuration error: {0}")]
    Config(String),

    /// Shared store errors
    #[error("Store error: {0}")]
    Redis(#[from] redis::RedisError),

    /// I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<config::ConfigError> for BucketgateError {
    fn from(err: config::ConfigError) -> Self {
        BucketgateError::Config(err.to_string())
    }
}

/// Result type alias for Bucketgate operations.
pub type Result<T> = std::result::Result<T, BucketgateError>;
