//! Configuration management for Tollgate.

use std::net::SocketAddr;
use std::path::Path;
use std::time::Duration;

use ::config::{Config, Environment, File, FileFormat};
use serde::{Deserialize, Serialize};

use crate::error::{Result, TollgateError};
use crate::ratelimit::{BucketPolicy, DEFAULT_KEY_PREFIX};

/// Prefix of environment variables overriding configuration, e.g. `TOLLGATE__LIMITER__RATE`.
pub const ENV_PREFIX: &str = "TOLLGATE";

/// Plain `host:port` of the Redis server, honoured for compatibility.
pub const REDIS_ADDR_ENV: &str = "REDIS_ADDR";

/// Main configuration for the Tollgate service.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TollgateConfig {
    /// Server configuration
    #[serde(default)]
    pub server: ServerConfig,

    /// Token bucket parameters
    #[serde(default)]
    pub limiter: LimiterConfig,

    /// Bucket store configuration
    #[serde(default)]
    pub store: StoreConfig,

    /// Logging configuration
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Server configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    /// HTTP listen address
    #[serde(default = "default_http_addr")]
    pub http_addr: SocketAddr,

    /// Upper bound on one rate limit decision, in milliseconds
    #[serde(default = "default_request_timeout_ms")]
    pub request_timeout_ms: u64,

    /// What to answer when the store cannot decide
    #[serde(default)]
    pub failure_policy: FailurePolicy,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            http_addr: default_http_addr(),
            request_timeout_ms: default_request_timeout_ms(),
            failure_policy: FailurePolicy::default(),
        }
    }
}

impl ServerConfig {
    /// The decision deadline as a duration.
    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }
}

fn default_http_addr() -> SocketAddr {
    SocketAddr::from(([127, 0, 0, 1], 8080))
}

fn default_request_timeout_ms() -> u64 {
    500
}

/// How a request is treated when the limiter returns an infrastructure error.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FailurePolicy {
    /// Answer with a server error.
    #[default]
    Error,
    /// Serve the request as if admitted.
    Open,
    /// Reject the request as if throttled.
    Closed,
}

/// Token bucket parameters.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LimiterConfig {
    /// Maximum tokens per bucket
    #[serde(default = "default_capacity")]
    pub capacity: u64,

    /// Tokens refilled per second
    #[serde(default = "default_rate")]
    pub rate: f64,

    /// Namespace prepended to every identity in the store
    #[serde(default = "default_key_prefix")]
    pub key_prefix: String,
}

impl Default for LimiterConfig {
    fn default() -> Self {
        Self {
            capacity: default_capacity(),
            rate: default_rate(),
            key_prefix: default_key_prefix(),
        }
    }
}

impl LimiterConfig {
    /// Validate the parameters into a bucket policy.
    pub fn policy(&self) -> Result<BucketPolicy> {
        BucketPolicy::new(self.capacity, self.rate)
    }
}

fn default_capacity() -> u64 {
    5
}

fn default_rate() -> f64 {
    1.0
}

fn default_key_prefix() -> String {
    DEFAULT_KEY_PREFIX.to_string()
}

/// Which store holds bucket records.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StoreBackend {
    /// Shared Redis server
    #[default]
    Redis,
    /// Process-local memory; only coordinates callers within one process
    Memory,
}

/// Bucket store configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoreConfig {
    /// Store implementation
    #[serde(default)]
    pub backend: StoreBackend,

    /// Redis connection URL
    #[serde(default = "default_store_url")]
    pub url: String,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            backend: StoreBackend::default(),
            url: default_store_url(),
        }
    }
}

fn default_store_url() -> String {
    "redis://localhost:6379".to_string()
}

/// Logging configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Default filter directive when `RUST_LOG` is unset
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Emit JSON lines instead of human-readable output
    #[serde(default)]
    pub json: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            json: false,
        }
    }
}

fn default_log_level() -> String {
    "info".to_string()
}

impl TollgateConfig {
    /// Load configuration from defaults, an optional YAML file and the environment.
    ///
    /// Later sources win: file, then `TOLLGATE__*` variables, then `REDIS_ADDR`.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut builder = Config::builder();

        if let Some(path) = path {
            builder = builder.add_source(File::from(path).format(FileFormat::Yaml).required(true));
        }

        let mut config: TollgateConfig = builder
            .add_source(
                Environment::with_prefix(ENV_PREFIX)
                    .prefix_separator("__")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()
            .and_then(|c| c.try_deserialize())
            .map_err(|e| TollgateError::Config(e.to_string()))?;

        if let Ok(addr) = std::env::var(REDIS_ADDR_ENV) {
            config.apply_redis_addr(&addr);
        }

        config.validate()?;
        Ok(config)
    }

    /// Load configuration from a YAML string.
    pub fn from_yaml(yaml: &str) -> Result<Self> {
        let config: TollgateConfig = serde_yaml::from_str(yaml)
            .map_err(|e| TollgateError::Config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Point the store at a bare `host:port` address.
    pub fn apply_redis_addr(&mut self, addr: &str) {
        let addr = addr.trim();
        if !addr.is_empty() {
            self.store.url = format!("redis://{}", addr);
        }
    }

    /// Check the values that cannot be expressed by types alone.
    pub fn validate(&self) -> Result<()> {
        self.limiter.policy()?;
        if self.server.request_timeout_ms == 0 {
            return Err(TollgateError::Config(
                "server.request_timeout_ms must be greater than zero".to_string(),
            ));
        }
        Ok(())
    }
}
