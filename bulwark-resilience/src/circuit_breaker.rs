//! Consecutive-failure circuit breaker shared by every caller of a service

use bulwark_config::ServiceConfig;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CircuitState {
    /// Attempts flow; consecutive failures are counted
    #[default]
    Closed,
    /// Attempts are refused until the open timeout has elapsed
    Open,
    /// Probing recovery; one failure reopens, enough successes close
    HalfOpen,
}

impl std::fmt::Display for CircuitState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            CircuitState::Closed => "closed",
            CircuitState::Open => "open",
            CircuitState::HalfOpen => "half-open",
        })
    }
}

/// Thresholds for one breaker
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CircuitBreakerConfig {
    /// Consecutive failures in Closed that open the circuit
    pub failure_threshold: u32,

    /// Consecutive half-open successes that close it again
    pub success_threshold: u32,

    /// Quiet period after the most recent failure before a probe is admitted
    #[serde(with = "humantime_serde")]
    pub timeout: Duration,
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        ServiceConfig::default().into()
    }
}

impl From<&ServiceConfig> for CircuitBreakerConfig {
    fn from(service: &ServiceConfig) -> Self {
        Self {
            failure_threshold: service.circuit_failure_threshold,
            success_threshold: service.circuit_half_open_success_threshold,
            timeout: service.circuit_open_timeout,
        }
    }
}

impl From<ServiceConfig> for CircuitBreakerConfig {
    fn from(service: ServiceConfig) -> Self {
        Self::from(&service)
    }
}

/// Point-in-time snapshot of a breaker's counters
#[derive(Debug, Clone, Default)]
pub struct CircuitMetrics {
    /// Outcomes recorded with `record_success` or `record_failure`
    pub total_requests: u64,
    pub total_successes: u64,
    pub total_failures: u64,
    /// Attempts refused while open
    pub total_rejected: u64,
    pub consecutive_failures: u32,
    /// Progress towards closing; only meaningful while half-open
    pub consecutive_successes: u32,
    pub last_failure_time: Option<Instant>,
    pub last_state_change: Option<Instant>,
}

/// The counter block; every mutation happens under one lock
#[derive(Debug, Default)]
struct Circuit {
    state: CircuitState,
    metrics: CircuitMetrics,
}

impl Circuit {
    fn move_to(&mut self, next: CircuitState, name: &str) {
        let previous = std::mem::replace(&mut self.state, next);
        self.metrics.consecutive_successes = 0;
        if next == CircuitState::Closed {
            self.metrics.consecutive_failures = 0;
        }
        self.metrics.last_state_change = Some(Instant::now());

        match next {
            CircuitState::Open => log::warn!(
                "Circuit '{}' {} -> {} after {} consecutive failures",
                name,
                previous,
                next,
                self.metrics.consecutive_failures
            ),
            _ => log::info!("Circuit '{}' {} -> {}", name, previous, next),
        }
    }

    /// True while an open circuit is still inside its quiet period
    fn cooling_down(&self, timeout: Duration) -> bool {
        self.metrics
            .last_failure_time
            .is_some_and(|at| at.elapsed() < timeout)
    }
}

/// Circuit breaker for one logical service.
///
/// Clones share the same counters, so one breaker can be handed to every
/// concurrent caller of the service.
#[derive(Clone)]
pub struct CircuitBreaker {
    name: Arc<str>,
    config: Arc<CircuitBreakerConfig>,
    circuit: Arc<Mutex<Circuit>>,
}

impl CircuitBreaker {
    pub fn new(config: CircuitBreakerConfig) -> Self {
        Self::named("circuit", config)
    }

    /// Breaker whose log lines carry the service name
    pub fn named(name: impl Into<Arc<str>>, config: CircuitBreakerConfig) -> Self {
        Self {
            name: name.into(),
            config: Arc::new(config),
            circuit: Arc::new(Mutex::new(Circuit::default())),
        }
    }

    pub fn with_defaults() -> Self {
        Self::new(CircuitBreakerConfig::default())
    }

    pub fn builder() -> CircuitBreakerBuilder {
        CircuitBreakerBuilder::new()
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn config(&self) -> &CircuitBreakerConfig {
        &self.config
    }

    /// Admission gate, consulted once per request.
    ///
    /// An open circuit whose quiet period has elapsed moves to half-open here
    /// and admits the caller as a probe. Refusals count as rejections.
    pub fn can_attempt(&self) -> bool {
        let mut circuit = self.circuit.lock();

        if circuit.state != CircuitState::Open {
            return true;
        }
        if circuit.cooling_down(self.config.timeout) {
            circuit.metrics.total_rejected += 1;
            return false;
        }

        circuit.move_to(CircuitState::HalfOpen, &self.name);
        true
    }

    /// Current state. Never performs the open to half-open transition.
    pub fn state(&self) -> CircuitState {
        self.circuit.lock().state
    }

    pub fn record_success(&self) {
        let mut circuit = self.circuit.lock();
        circuit.metrics.total_requests += 1;
        circuit.metrics.total_successes += 1;

        match circuit.state {
            CircuitState::Closed => circuit.metrics.consecutive_failures = 0,
            CircuitState::HalfOpen => {
                circuit.metrics.consecutive_successes += 1;
                if circuit.metrics.consecutive_successes >= self.config.success_threshold {
                    circuit.move_to(CircuitState::Closed, &self.name);
                }
            }
            // Late result from an attempt admitted before the circuit opened
            CircuitState::Open => {}
        }
    }

    /// Count a failure. The failure timestamp is refreshed in every state,
    /// so failures that land while open extend the quiet period.
    pub fn record_failure(&self) {
        let mut circuit = self.circuit.lock();
        circuit.metrics.total_requests += 1;
        circuit.metrics.total_failures += 1;
        circuit.metrics.last_failure_time = Some(Instant::now());

        match circuit.state {
            CircuitState::Closed => {
                circuit.metrics.consecutive_failures += 1;
                if circuit.metrics.consecutive_failures >= self.config.failure_threshold {
                    circuit.move_to(CircuitState::Open, &self.name);
                }
            }
            CircuitState::HalfOpen => circuit.move_to(CircuitState::Open, &self.name),
            CircuitState::Open => {}
        }
    }

    /// Count a refusal decided outside `can_attempt`
    pub fn record_rejection(&self) {
        self.circuit.lock().metrics.total_rejected += 1;
    }

    pub fn metrics(&self) -> CircuitMetrics {
        self.circuit.lock().metrics.clone()
    }

    /// Close the circuit and forget all counters and timestamps
    pub fn reset(&self) {
        let mut circuit = self.circuit.lock();
        *circuit = Circuit::default();
        log::debug!("Circuit '{}' reset", self.name);
    }
}

/// Fluent construction, mostly for tests and ad-hoc breakers
#[derive(Default)]
pub struct CircuitBreakerBuilder {
    name: Option<String>,
    config: CircuitBreakerConfig,
}

impl CircuitBreakerBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    pub fn failure_threshold(mut self, threshold: u32) -> Self {
        self.config.failure_threshold = threshold;
        self
    }

    pub fn success_threshold(mut self, threshold: u32) -> Self {
        self.config.success_threshold = threshold;
        self
    }

    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.config.timeout = timeout;
        self
    }

    pub fn build(self) -> CircuitBreaker {
        match self.name {
            Some(name) => CircuitBreaker::named(name, self.config),
            None => CircuitBreaker::new(self.config),
        }
    }
}
