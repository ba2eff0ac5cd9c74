//! Configuration management for Bucketgate.
//!
//! Values come from an optional YAML file, then from environment variables
//! prefixed with `BUCKETGATE__` (for example `BUCKETGATE__LIMITER__BACKEND=redis`).

use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::time::Duration;

use crate::error::{BucketgateError, Result};
use crate::ratelimit::{
    BucketConfig, DEFAULT_CAPACITY, DEFAULT_COMMAND_TIMEOUT, DEFAULT_EXPIRY,
    DEFAULT_FILL_INTERVAL, DEFAULT_KEY_PREFIX,
};

/// Main configuration for the Bucketgate service.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AppConfig {
    /// Server configuration
    #[serde(default)]
    pub server: ServerConfig,

    /// Rate limiter configuration
    #[serde(default)]
    pub limiter: LimiterConfig,
}

/// Server configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    /// HTTP listen address
    #[serde(default = "default_http_addr")]
    pub http_addr: SocketAddr,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            http_addr: default_http_addr(),
        }
    }
}

fn default_http_addr() -> SocketAddr {
    SocketAddr::from(([127, 0, 0, 1], 8080))
}

/// Where bucket state lives.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum Backend {
    /// In process memory
    #[default]
    Local,
    /// In a Redis-protocol store shared by every process
    Redis,
}

/// Rate limiter configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LimiterConfig {
    /// Strategy to use
    #[serde(default)]
    pub backend: Backend,

    /// Store URL for the Redis backend
    #[serde(default = "default_redis_url")]
    pub redis_url: String,

    /// Prefix of every bucket key in the store
    #[serde(default = "default_key_prefix")]
    pub key_prefix: String,

    /// Deadline for one store round trip in milliseconds, 0 to wait indefinitely
    #[serde(default = "default_command_timeout_ms")]
    pub command_timeout_ms: u64,

    /// Idle bucket sweep period in seconds, 0 to sweep once per expiry
    #[serde(default)]
    pub sweep_interval_secs: u64,

    /// Bucket shape
    #[serde(default)]
    pub bucket: BucketSettings,
}

impl Default for LimiterConfig {
    fn default() -> Self {
        Self {
            backend: Backend::default(),
            redis_url: default_redis_url(),
            key_prefix: default_key_prefix(),
            command_timeout_ms: default_command_timeout_ms(),
            sweep_interval_secs: 0,
            bucket: BucketSettings::default(),
        }
    }
}

fn default_redis_url() -> String {
    "redis://127.0.0.1:6379/".to_string()
}

fn default_key_prefix() -> String {
    DEFAULT_KEY_PREFIX.to_string()
}

fn default_command_timeout_ms() -> u64 {
    DEFAULT_COMMAND_TIMEOUT.as_millis() as u64
}

impl LimiterConfig {
    /// Store deadline, `None` when disabled.
    pub fn command_timeout(&self) -> Option<Duration> {
        (self.command_timeout_ms > 0).then(|| Duration::from_millis(self.command_timeout_ms))
    }

    /// Period of the local idle-bucket sweep.
    pub fn sweep_interval(&self) -> Duration {
        if self.sweep_interval_secs > 0 {
            Duration::from_secs(self.sweep_interval_secs)
        } else {
            self.bucket.to_bucket_config().resolved().expiry
        }
    }
}

/// Bucket shape as written in configuration files.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct BucketSettings {
    /// Maximum tokens per bucket
    #[serde(default = "default_capacity")]
    pub capacity: u64,

    /// Microseconds to produce one token
    #[serde(default = "default_fill_interval_us")]
    pub fill_interval_us: u64,

    /// Idle bucket time-to-live in seconds
    #[serde(default = "default_expiry_secs")]
    pub expiry_secs: u64,
}

impl Default for BucketSettings {
    fn default() -> Self {
        Self {
            capacity: default_capacity(),
            fill_interval_us: default_fill_interval_us(),
            expiry_secs: default_expiry_secs(),
        }
    }
}

fn default_capacity() -> u64 {
    DEFAULT_CAPACITY
}

fn default_fill_interval_us() -> u64 {
    DEFAULT_FILL_INTERVAL.as_micros() as u64
}

fn default_expiry_secs() -> u64 {
    DEFAULT_EXPIRY.as_secs()
}

impl BucketSettings {
    /// Convert to a [`BucketConfig`]; zero values are left for
    /// [`BucketConfig::resolved`] to replace.
    pub fn to_bucket_config(&self) -> BucketConfig {
        BucketConfig::new(
            self.capacity,
            Duration::from_micros(self.fill_interval_us),
            Duration::from_secs(self.expiry_secs),
        )
    }
}

impl From<BucketSettings> for BucketConfig {
    fn from(settings: BucketSettings) -> Self {
        settings.to_bucket_config()
    }
}

impl AppConfig {
    /// Load configuration from an optional file and the environment.
    pub fn load(path: Option<&str>) -> Result<Self> {
        let mut builder = config::Config::builder();
        if let Some(path) = path {
            builder = builder.add_source(config::File::with_name(path));
        }

        let config = builder
            .add_source(
                config::Environment::with_prefix("BUCKETGATE")
                    .prefix_separator("__")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?;

        Ok(config.try_deserialize()?)
    }

    /// Load configuration from a file path.
    pub fn from_file(path: &str) -> Result<Self> {
        let contents = std::fs::read_to_string(path)?;
        Self::from_yaml(&contents)
    }

    /// Parse configuration from a YAML string.
    pub fn from_yaml(yaml: &str) -> Result<Self> {
        serde_yaml::from_str(yaml)
            .map_err(|e| BucketgateError::Config(format!("Failed to parse configuration: {}", e)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = AppConfig::default();
        assert_eq!(config.server.http_addr, "127.0.0.1:8080".parse().unwrap());
        assert_eq!(config.limiter.backend, Backend::Local);
        assert_eq!(config.limiter.key_prefix, "bucketgate");
        assert_eq!(config.limiter.command_timeout(), Some(Duration::from_millis(250)));
        assert_eq!(
            config.limiter.bucket.to_bucket_config(),
            BucketConfig::default()
        );
        assert_eq!(config.limiter.sweep_interval(), Duration::from_secs(3600));
    }

    #[test]
    fn test_parse_full_config() {
        let yaml = r#"
server:
  http_addr: 0.0.0.0:9000
limiter:
  backend: redis
  redis_url: redis://cache:6379/1
  key_prefix: api
  command_timeout_ms: 0
  sweep_interval_secs: 30
  bucket:
    capacity: 5
    fill_interval_us: 200000
    expiry_secs: 120
"#;
        let config = AppConfig::from_yaml(yaml).unwrap();

        assert_eq!(config.server.http_addr.port(), 9000);
        assert_eq!(config.limiter.backend, Backend::Redis);
        assert_eq!(config.limiter.redis_url, "redis://cache:6379/1");
        assert_eq!(config.limiter.key_prefix, "api");
        assert_eq!(config.limiter.command_timeout(), None);
        assert_eq!(config.limiter.sweep_interval(), Duration::from_secs(30));

        let bucket = config.limiter.bucket.to_bucket_config();
        assert_eq!(bucket.capacity, 5);
        assert_eq!(bucket.fill_interval, Duration::from_millis(200));
        assert_eq!(bucket.expiry, Duration::from_secs(120));
    }

    #[test]
    fn test_partial_bucket_keeps_other_defaults() {
        let yaml = r#"
limiter:
  bucket:
    capacity: 1
"#;
        let config = AppConfig::from_yaml(yaml).unwrap();
        assert_eq!(config.limiter.bucket.capacity, 1);
        assert_eq!(config.limiter.bucket.fill_interval_us, 1000);
        assert_eq!(config.limiter.bucket.expiry_secs, 3600);
    }

    #[test]
    fn test_invalid_backend_is_config_error() {
        let yaml = "limiter:\n  backend: memcached\n";
        let err = AppConfig::from_yaml(yaml).unwrap_err();
        assert!(matches!(err, BucketgateError::Config(_)));
    }

    #[test]
    fn test_load_from_file() {
        let path = std::env::temp_dir().join(format!(
            "bucketgate-config-{}.yaml",
            std::process::id()
        ));
        std::fs::write(&path, "limiter:\n  bucket:\n    capacity: 7\n").unwrap();

        let config = AppConfig::load(path.to_str()).unwrap();
        assert_eq!(config.limiter.bucket.capacity, 7);

        let config = AppConfig::from_file(path.to_str().unwrap()).unwrap();
        assert_eq!(config.limiter.bucket.capacity, 7);

        std::fs::remove_file(&path).unwrap();
    }

    #[test]
    fn test_missing_file_is_an_error() {
        assert!(AppConfig::load(Some("/nonexistent/bucketgate.yaml")).is_err());
        assert!(AppConfig::from_file("/nonexistent/bucketgate.yaml").is_err());
    }
}
