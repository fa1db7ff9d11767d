//! Per-service resilience configuration

use crate::error::ConfigResult;
use crate::validation::{validate_positive, validate_url, Validatable};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// How the request throttler is applied when a service is over budget
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "mode", rename_all = "snake_case")]
pub enum ThrottlePolicy {
    /// Fail immediately with a rate-limit error
    Reject,

    /// Wait for the window to clear, up to `max_wait`, then fail
    Delay {
        #[serde(with = "humantime_serde")]
        max_wait: Duration,
    },
}

impl Default for ThrottlePolicy {
    fn default() -> Self {
        ThrottlePolicy::Delay {
            max_wait: Duration::from_secs(5),
        }
    }
}

/// Resilience settings for one logical service
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServiceConfig {
    /// Base URL relative endpoints are resolved against
    #[serde(skip_serializing_if = "Option::is_none")]
    pub base_url: Option<String>,

    /// Per-attempt timeout
    #[serde(with = "humantime_serde")]
    pub timeout: Duration,

    /// Total number of transport attempts per request
    pub max_retries: u32,

    /// Delay before the first retry
    #[serde(with = "humantime_serde")]
    pub retry_base_delay: Duration,

    /// Upper bound for any retry delay
    #[serde(with = "humantime_serde")]
    pub max_retry_delay: Duration,

    /// Double the delay on each attempt instead of using a constant delay
    pub use_exponential_backoff: bool,

    /// Consecutive failures that open the circuit
    pub circuit_failure_threshold: u32,

    /// Time the circuit stays open before probing
    #[serde(with = "humantime_serde")]
    pub circuit_open_timeout: Duration,

    /// Successful probes needed to close the circuit again
    pub circuit_half_open_success_threshold: u32,

    /// Lifetime of cached responses
    #[serde(with = "humantime_serde")]
    pub cache_ttl: Duration,

    /// Request budget per trailing 60 second window
    pub max_requests_per_minute: u32,

    /// Behaviour when the request budget is exhausted
    pub throttle: ThrottlePolicy,
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            base_url: None,
            timeout: Duration::from_secs(30),
            max_retries: 3,
            retry_base_delay: Duration::from_secs(1),
            max_retry_delay: Duration::from_secs(30),
            use_exponential_backoff: true,
            circuit_failure_threshold: 5,
            circuit_open_timeout: Duration::from_secs(60),
            circuit_half_open_success_threshold: 2,
            cache_ttl: Duration::from_secs(3600),
            max_requests_per_minute: 60,
            throttle: ThrottlePolicy::default(),
        }
    }
}

impl ServiceConfig {
    /// Preset for news feeds: slow upstreams, modest request budget
    pub fn news() -> Self {
        Self {
            timeout: Duration::from_secs(15),
            max_requests_per_minute: 30,
            ..Self::default()
        }
    }

    /// Preset for market quotes: tight free-tier budget, fail fast
    pub fn stocks() -> Self {
        Self {
            timeout: Duration::from_secs(10),
            max_retries: 2,
            circuit_failure_threshold: 3,
            circuit_open_timeout: Duration::from_secs(30),
            max_requests_per_minute: 5,
            throttle: ThrottlePolicy::Reject,
            ..Self::default()
        }
    }

    /// Preset for the GitHub REST API
    pub fn github() -> Self {
        Self {
            base_url: Some("https://api.github.com".to_string()),
            timeout: Duration::from_secs(20),
            circuit_failure_threshold: 3,
            ..Self::default()
        }
    }

    /// Set the base URL
    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = Some(base_url.into());
        self
    }
}

/// A [`ServiceConfig`] paired with its service name for error reporting
pub struct NamedService<'a> {
    pub name: &'a str,
    pub config: &'a ServiceConfig,
}

impl Validatable for NamedService<'_> {
    fn validate(&self) -> ConfigResult<()> {
        let section = self.section();
        let config = self.config;

        if let Some(ref base_url) = config.base_url {
            validate_url(base_url, "base_url", &section)?;
        }

        validate_positive(config.timeout.as_millis(), "timeout", &section)?;
        validate_positive(config.max_retries, "max_retries", &section)?;
        validate_positive(
            config.circuit_failure_threshold,
            "circuit_failure_threshold",
            &section,
        )?;
        validate_positive(
            config.circuit_half_open_success_threshold,
            "circuit_half_open_success_threshold",
            &section,
        )?;
        validate_positive(config.cache_ttl.as_millis(), "cache_ttl", &section)?;
        validate_positive(
            config.max_requests_per_minute,
            "max_requests_per_minute",
            &section,
        )?;

        if config.retry_base_delay > config.max_retry_delay {
            return Err(self.validation_error(format!(
                "retry_base_delay ({:?}) must not exceed max_retry_delay ({:?})",
                config.retry_base_delay, config.max_retry_delay
            )));
        }

        Ok(())
    }

    fn section(&self) -> String {
        format!("services.{}", self.name)
    }
}
