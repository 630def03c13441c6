//! Configuration for the XP proof pipeline.
//!
//! [`XpConfig::default()`] is suitable for a local deployment talking to a
//! proof service on `127.0.0.1:3001`; [`XpConfig::test_mode()`] keeps
//! everything in memory with short delays. Either can be adjusted with the
//! `with_*` builders or overridden from the environment:
//!
//! | Variable                         | Field                      |
//! |----------------------------------|----------------------------|
//! | `HAMBALLER_PROOF_ENDPOINT`       | `generator.url`            |
//! | `HAMBALLER_CACHE_PATH`           | `cache.path`               |
//! | `HAMBALLER_CACHE_TTL_HOURS`      | `cache.ttl_hours`          |
//! | `HAMBALLER_MAX_ATTEMPTS`         | `retry.max_attempts`       |
//! | `HAMBALLER_RETRY_DELAY_MS`       | `retry.delay`              |
//! | `HAMBALLER_REQUEST_TIMEOUT_MS`   | `generator.timeout_ms`     |
//! | `HAMBALLER_SWEEP_INTERVAL_SECS`  | `sweep_interval`           |
//!
//! # Examples
//!
//! ```
//! # use hamballer_xp::XpConfig;
//! let config = XpConfig::test_mode().with_cache_ttl_hours(1);
//! assert!(config.validate().is_ok());
//! ```

use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;
use tracing::warn;

use crate::cache::{DEFAULT_MEMORY_CAPACITY, DEFAULT_TTL_HOURS};
use crate::coordinator::{HttpGeneratorConfig, RetryPolicy};
use crate::submitter::SubmitterConfig;

pub const ENV_PROOF_ENDPOINT: &str = "HAMBALLER_PROOF_ENDPOINT";
pub const ENV_CACHE_PATH: &str = "HAMBALLER_CACHE_PATH";
pub const ENV_CACHE_TTL_HOURS: &str = "HAMBALLER_CACHE_TTL_HOURS";
pub const ENV_MAX_ATTEMPTS: &str = "HAMBALLER_MAX_ATTEMPTS";
pub const ENV_RETRY_DELAY_MS: &str = "HAMBALLER_RETRY_DELAY_MS";
pub const ENV_REQUEST_TIMEOUT_MS: &str = "HAMBALLER_REQUEST_TIMEOUT_MS";
pub const ENV_SWEEP_INTERVAL_SECS: &str = "HAMBALLER_SWEEP_INTERVAL_SECS";

/// Proof cache settings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CacheConfig {
    /// Sled database directory. `None` keeps the cache in memory.
    pub path: Option<PathBuf>,
    /// Entries kept in the memory layer.
    pub memory_capacity: usize,
    /// Lifetime of newly cached proofs.
    pub ttl_hours: i64,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            path: Some(PathBuf::from("hamballer-proofs.db")),
            memory_capacity: DEFAULT_MEMORY_CAPACITY,
            ttl_hours: DEFAULT_TTL_HOURS,
        }
    }
}

/// Top-level pipeline configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct XpConfig {
    /// Remote proof generator.
    pub generator: HttpGeneratorConfig,
    /// Proof cache.
    pub cache: CacheConfig,
    /// Generation retries.
    pub retry: RetryPolicy,
    /// How often the background sweeper removes expired proofs.
    pub sweep_interval: Duration,
    /// Verification submission.
    pub submitter: SubmitterConfig,
}

impl Default for XpConfig {
    fn default() -> Self {
        Self {
            generator: HttpGeneratorConfig::default(),
            cache: CacheConfig::default(),
            retry: RetryPolicy::default(),
            sweep_interval: Duration::from_secs(600),
            submitter: SubmitterConfig::default(),
        }
    }
}

impl XpConfig {
    /// In-memory cache, fast retries and short timeouts.
    pub fn test_mode() -> Self {
        Self {
            generator: HttpGeneratorConfig {
                timeout_ms: 2_000,
                ..HttpGeneratorConfig::default()
            },
            cache: CacheConfig {
                path: None,
                ..CacheConfig::default()
            },
            retry: RetryPolicy::new(3, Duration::from_millis(10)),
            sweep_interval: Duration::from_secs(1),
            submitter: SubmitterConfig {
                receipt_timeout: Duration::from_secs(5),
            },
        }
    }

    /// Defaults with overrides from the process environment.
    pub fn from_env() -> Self {
        Self::default().with_overrides(|name| std::env::var(name).ok())
    }

    /// Apply overrides from `lookup`. Unparsable values are logged and
    /// ignored.
    pub fn with_overrides<F>(mut self, lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(url) = lookup(ENV_PROOF_ENDPOINT) {
            self.generator.url = url;
        }

        if let Some(path) = lookup(ENV_CACHE_PATH) {
            self.cache.path = if path.is_empty() {
                None
            } else {
                Some(PathBuf::from(path))
            };
        }

        if let Some(ttl) = parse_var::<i64>(&lookup, ENV_CACHE_TTL_HOURS) {
            self.cache.ttl_hours = ttl;
        }

        if let Some(attempts) = parse_var::<u32>(&lookup, ENV_MAX_ATTEMPTS) {
            self.retry.max_attempts = attempts;
        }

        if let Some(delay_ms) = parse_var::<u64>(&lookup, ENV_RETRY_DELAY_MS) {
            self.retry.delay = Duration::from_millis(delay_ms);
        }

        if let Some(timeout_ms) = parse_var::<u64>(&lookup, ENV_REQUEST_TIMEOUT_MS) {
            self.generator.timeout_ms = timeout_ms;
        }

        if let Some(secs) = parse_var::<u64>(&lookup, ENV_SWEEP_INTERVAL_SECS) {
            self.sweep_interval = Duration::from_secs(secs);
        }

        self
    }

    /// Set the generator endpoint URL.
    pub fn with_endpoint(mut self, url: impl Into<String>) -> Self {
        self.generator.url = url.into();
        self
    }

    /// Set the bearer token sent to the generator.
    pub fn with_auth_token(mut self, token: impl Into<String>) -> Self {
        self.generator.auth_token = Some(token.into());
        self
    }

    /// Set the sled directory; `None` keeps the cache in memory.
    pub fn with_cache_path(mut self, path: Option<PathBuf>) -> Self {
        self.cache.path = path;
        self
    }

    /// Set the lifetime of newly cached proofs.
    pub fn with_cache_ttl_hours(mut self, ttl_hours: i64) -> Self {
        self.cache.ttl_hours = ttl_hours;
        self
    }

    /// Set the generation retry policy.
    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    /// Set the background sweep interval.
    pub fn with_sweep_interval(mut self, interval: Duration) -> Self {
        self.sweep_interval = interval;
        self
    }

    /// Check for settings the pipeline cannot run with.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let url = &self.generator.url;
        if !(url.starts_with("http://") || url.starts_with("https://")) {
            return Err(ConfigError::Invalid(format!(
                "proof endpoint must be an http(s) URL, got {:?}",
                url
            )));
        }

        if self.generator.timeout_ms == 0 {
            return Err(ConfigError::Invalid(
                "request timeout must be greater than zero".to_string(),
            ));
        }

        if self.retry.max_attempts == 0 {
            return Err(ConfigError::Invalid(
                "max attempts must be at least 1".to_string(),
            ));
        }

        if self.sweep_interval.is_zero() {
            return Err(ConfigError::Invalid(
                "sweep interval must be greater than zero".to_string(),
            ));
        }

        Ok(())
    }
}

fn parse_var<T: std::str::FromStr>(lookup: &dyn Fn(&str) -> Option<String>, name: &str) -> Option<T> {
    let raw = lookup(name)?;
    match raw.trim().parse() {
        Ok(value) => Some(value),
        Err(_) => {
            warn!(variable = name, value = %raw, "ignoring unparsable configuration value");
            None
        }
    }
}

/// Errors raised while validating configuration or building the pipeline
/// from it.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// The configuration contains an invalid setting.
    #[error("Invalid configuration: {0}")]
    Invalid(String),

    /// The durable cache could not be opened.
    #[error("Cache unavailable: {0}")]
    CacheUnavailable(String),
}
