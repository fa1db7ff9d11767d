//! Retry policy and failure classification

use bulwark_config::ServiceConfig;
use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::backoff::BackoffCalculator;

/// Classification of a failed attempt, used to decide whether to retry
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    /// The attempt did not complete within its timeout
    ConnectionTimeout,
    /// The remote host refused the connection
    ConnectionRefused,
    /// The connection dropped mid-request
    ConnectionLost,
    /// No network path is available at all
    NoConnectivity,
    /// The server answered with a 5xx status
    ServerError,
    /// The server answered 401
    Unauthorized,
    /// The server answered 403
    Forbidden,
    /// The response body could not be decoded
    Decoding,
    /// The server answered 429, or the local request budget is exhausted
    RateLimited,
    /// Any other unexpected response
    InvalidResponse,
    /// The circuit breaker refused the attempt
    CircuitOpen,
}

impl FailureKind {
    /// Whether this failure is worth another attempt
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            FailureKind::ConnectionTimeout
                | FailureKind::ConnectionRefused
                | FailureKind::ConnectionLost
                | FailureKind::NoConnectivity
                | FailureKind::ServerError
        )
    }
}

impl std::fmt::Display for FailureKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            FailureKind::ConnectionTimeout => "connection-timeout",
            FailureKind::ConnectionRefused => "connection-refused",
            FailureKind::ConnectionLost => "connection-lost",
            FailureKind::NoConnectivity => "no-connectivity",
            FailureKind::ServerError => "server-error",
            FailureKind::Unauthorized => "unauthorized",
            FailureKind::Forbidden => "forbidden",
            FailureKind::Decoding => "decoding-error",
            FailureKind::RateLimited => "rate-limited",
            FailureKind::InvalidResponse => "invalid-response",
            FailureKind::CircuitOpen => "circuit-open",
        };
        write!(f, "{}", name)
    }
}

/// Trait for errors that can be classified for retry decisions
pub trait Retryable {
    /// The failure class of this error
    fn failure_kind(&self) -> FailureKind;

    /// Whether this error is retryable
    fn is_retryable(&self) -> bool {
        self.failure_kind().is_transient()
    }
}

/// Retry policy configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RetryPolicyConfig {
    /// Total number of attempts, including the first one
    pub max_retries: u32,

    /// Delay before the first retry
    #[serde(with = "humantime_serde")]
    pub base_delay: Duration,

    /// Maximum delay between retries
    #[serde(with = "humantime_serde")]
    pub max_delay: Duration,

    /// Double the delay on every attempt
    pub use_exponential_backoff: bool,
}

impl Default for RetryPolicyConfig {
    fn default() -> Self {
        Self {
            max_retries: 3,
            base_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(30),
            use_exponential_backoff: true,
        }
    }
}

impl From<&ServiceConfig> for RetryPolicyConfig {
    fn from(config: &ServiceConfig) -> Self {
        Self {
            max_retries: config.max_retries,
            base_delay: config.retry_base_delay,
            max_delay: config.max_retry_delay,
            use_exponential_backoff: config.use_exponential_backoff,
        }
    }
}

/// Stateless retry policy: backoff delays and retry eligibility
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    config: RetryPolicyConfig,
    backoff: BackoffCalculator,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::new(RetryPolicyConfig::default())
    }
}

impl RetryPolicy {
    /// Create a policy from its configuration
    pub fn new(config: RetryPolicyConfig) -> Self {
        let backoff = BackoffCalculator::new(
            config.base_delay,
            config.max_delay,
            config.use_exponential_backoff,
        );
        Self { config, backoff }
    }

    /// Get the configuration
    pub fn config(&self) -> &RetryPolicyConfig {
        &self.config
    }

    /// Total attempt budget
    pub fn max_retries(&self) -> u32 {
        self.config.max_retries
    }

    /// Delay to wait after the given (0-indexed) attempt, jitter included
    pub fn delay(&self, attempt: u32) -> Duration {
        self.backoff.calculate_delay(attempt)
    }

    /// Delay to wait after the given attempt, without jitter
    pub fn base_delay(&self, attempt: u32) -> Duration {
        self.backoff.base_delay(attempt)
    }

    /// Whether a failure of `kind` after `attempt` attempts deserves another one
    pub fn should_retry(&self, kind: FailureKind, attempt: u32) -> bool {
        if attempt >= self.config.max_retries {
            return false;
        }
        kind.is_transient()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn policy(max_retries: u32) -> RetryPolicy {
        RetryPolicy::new(RetryPolicyConfig {
            max_retries,
            base_delay: Duration::from_millis(100),
            max_delay: Duration::from_secs(2),
            use_exponential_backoff: true,
        })
    }

    #[test]
    fn test_transient_kinds_are_retried() {
        let policy = policy(3);
        for kind in [
            FailureKind::ConnectionTimeout,
            FailureKind::ConnectionRefused,
            FailureKind::ConnectionLost,
            FailureKind::NoConnectivity,
            FailureKind::ServerError,
        ] {
            assert!(policy.should_retry(kind, 0), "{} should be retried", kind);
            assert!(policy.should_retry(kind, 2));
            assert!(!policy.should_retry(kind, 3));
        }
    }

    #[test]
    fn test_permanent_kinds_are_not_retried() {
        let policy = policy(5);
        for kind in [
            FailureKind::Unauthorized,
            FailureKind::Forbidden,
            FailureKind::Decoding,
            FailureKind::RateLimited,
            FailureKind::InvalidResponse,
            FailureKind::CircuitOpen,
        ] {
            assert!(!policy.should_retry(kind, 0), "{} must not be retried", kind);
        }
    }

    #[test]
    fn test_delay_never_exceeds_max() {
        let policy = policy(10);
        let mut previous = Duration::ZERO;
        for attempt in 0..20 {
            let base = policy.base_delay(attempt);
            assert!(base >= previous);
            assert!(policy.delay(attempt) <= Duration::from_secs(2));
            previous = base;
        }
    }

    #[test]
    fn test_constant_delay_without_exponential_backoff() {
        let policy = RetryPolicy::new(RetryPolicyConfig {
            use_exponential_backoff: false,
            base_delay: Duration::from_millis(300),
            ..RetryPolicyConfig::default()
        });

        for attempt in 0..5 {
            assert_eq!(policy.delay(attempt), Duration::from_millis(300));
        }
    }

    #[test]
    fn test_config_from_service() {
        let service = ServiceConfig {
            max_retries: 5,
            retry_base_delay: Duration::from_millis(200),
            max_retry_delay: Duration::from_secs(8),
            use_exponential_backoff: false,
            ..ServiceConfig::default()
        };

        let config = RetryPolicyConfig::from(&service);
        assert_eq!(config.max_retries, 5);
        assert_eq!(config.base_delay, Duration::from_millis(200));
        assert_eq!(config.max_delay, Duration::from_secs(8));
        assert!(!config.use_exponential_backoff);
    }
}
