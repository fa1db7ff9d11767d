//! Resilience patterns for Bulwark
//!
//! This crate provides the three stateful/stateless gates the resilient
//! client composes: a consecutive-failure circuit breaker, a retry policy
//! with exponential backoff and jitter, and a sliding-window request
//! throttler. Time is read from `tokio::time::Instant` so tests can drive
//! it with a paused runtime clock.

pub mod backoff;
pub mod circuit_breaker;
pub mod retry;
pub mod throttle;

// Re-export commonly used types
pub use backoff::BackoffCalculator;
pub use circuit_breaker::{
    CircuitBreaker, CircuitBreakerBuilder, CircuitBreakerConfig, CircuitMetrics, CircuitState,
};
pub use retry::{FailureKind, RetryPolicy, RetryPolicyConfig, Retryable};
pub use throttle::{RequestThrottler, ThrottleConfig, ThrottleError, THROTTLE_WINDOW};
