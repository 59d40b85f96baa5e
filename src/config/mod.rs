//! Client configuration.
//!
//! [`Config`] is plain data: build it from [`Default`], from a JSON document
//! with [`Config::from_json`], or with the `with_*` setters. Every path ends
//! in [`Config::validate`] before the repository is assembled.

use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use url::Url;

use crate::cache::DEFAULT_TTL;
use crate::writer::DEFAULT_WRITE_CAPACITY;

/// Errors raised while loading or validating a [`Config`].
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("invalid configuration document: {0}")]
    Json(#[from] serde_json::Error),

    #[error("invalid base URL {url:?}: {source}")]
    BaseUrl {
        url: String,
        #[source]
        source: url::ParseError,
    },

    #[error("invalid value for {field}: {reason}")]
    Invalid {
        field: &'static str,
        reason: &'static str,
    },
}

/// Settings for the fetch core.
///
/// # Examples
///
/// ```
/// use std::time::Duration;
/// use rfetch::config::Config;
///
/// let config = Config::from_json(r#"{
///     "base_url": "http://127.0.0.1:8080/api/",
///     "default_ttl_secs": 60,
///     "max_concurrency": 8
/// }"#).unwrap();
///
/// assert_eq!(config.default_ttl(), Duration::from_secs(60));
/// assert_eq!(config.max_concurrency, 8);
/// assert_eq!(config.write_capacity, 64); // defaulted
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Config {
    /// Root resource URL; relative resource ids resolve against it.
    pub base_url: String,
    /// Default freshness window of the response cache.
    pub default_ttl_secs: u64,
    /// Maximum number of cached responses; `None` means unbounded.
    pub cache_capacity: Option<usize>,
    /// Executor slot budget, also the width of batch fetches.
    pub max_concurrency: usize,
    /// Fixed delay applied by rate-limited runs.
    pub rate_limit_delay_ms: u64,
    /// Number of written payloads kept in memory.
    pub write_capacity: usize,
    /// Whole-exchange timeout of the built-in HTTP transport.
    pub request_timeout_secs: u64,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            base_url: "http://localhost/".to_owned(),
            default_ttl_secs: DEFAULT_TTL.as_secs(),
            cache_capacity: None,
            max_concurrency: 4,
            rate_limit_delay_ms: 0,
            write_capacity: DEFAULT_WRITE_CAPACITY,
            request_timeout_secs: 30,
        }
    }
}

impl Config {
    /// Parses and validates a JSON configuration document.
    ///
    /// Missing fields take their default values; unknown fields are rejected.
    pub fn from_json(document: &str) -> Result<Self, ConfigError> {
        let config: Config = serde_json::from_str(document)?;
        config.validate()?;
        Ok(config)
    }

    #[must_use]
    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into();
        self
    }

    #[must_use]
    pub fn with_default_ttl(mut self, ttl: Duration) -> Self {
        self.default_ttl_secs = ttl.as_secs();
        self
    }

    #[must_use]
    pub fn with_max_concurrency(mut self, limit: usize) -> Self {
        self.max_concurrency = limit;
        self
    }

    #[must_use]
    pub fn with_cache_capacity(mut self, capacity: Option<usize>) -> Self {
        self.cache_capacity = capacity;
        self
    }

    /// Checks value ranges and that the base URL parses.
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.base_url()?;
        if self.max_concurrency == 0 {
            return Err(ConfigError::Invalid {
                field: "max_concurrency",
                reason: "must be at least 1",
            });
        }
        if self.write_capacity == 0 {
            return Err(ConfigError::Invalid {
                field: "write_capacity",
                reason: "must be at least 1",
            });
        }
        if self.cache_capacity == Some(0) {
            return Err(ConfigError::Invalid {
                field: "cache_capacity",
                reason: "must be at least 1 when set",
            });
        }
        if self.request_timeout_secs == 0 {
            return Err(ConfigError::Invalid {
                field: "request_timeout_secs",
                reason: "must be at least 1",
            });
        }
        Ok(())
    }

    pub fn base_url(&self) -> Result<Url, ConfigError> {
        Url::parse(&self.base_url).map_err(|source| ConfigError::BaseUrl {
            url: self.base_url.clone(),
            source,
        })
    }

    pub fn default_ttl(&self) -> Duration {
        Duration::from_secs(self.default_ttl_secs)
    }

    pub fn rate_limit_delay(&self) -> Duration {
        Duration::from_millis(self.rate_limit_delay_ms)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }
}
