//! Sliding-window request throttling keyed by logical endpoint

use bulwark_config::ServiceConfig;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;

/// Length of the trailing window requests are counted in
pub const THROTTLE_WINDOW: Duration = Duration::from_secs(60);

/// Throttler configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ThrottleConfig {
    /// Maximum requests per endpoint inside [`THROTTLE_WINDOW`]
    pub max_requests_per_minute: u32,
}

impl Default for ThrottleConfig {
    fn default() -> Self {
        Self {
            max_requests_per_minute: 60,
        }
    }
}

impl From<&ServiceConfig> for ThrottleConfig {
    fn from(config: &ServiceConfig) -> Self {
        Self {
            max_requests_per_minute: config.max_requests_per_minute,
        }
    }
}

/// Throttling errors
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ThrottleError {
    /// The endpoint has used its budget for the current window
    #[error("Request budget for '{endpoint}' exhausted, next slot in {retry_after:?}")]
    Exceeded {
        endpoint: String,
        retry_after: Duration,
    },
}

impl ThrottleError {
    /// Time until the endpoint admits another request
    pub fn retry_after(&self) -> Duration {
        match self {
            ThrottleError::Exceeded { retry_after, .. } => *retry_after,
        }
    }
}

/// Pre-flight admission gate bounding request volume per endpoint.
///
/// Independent of the circuit breaker: it counts requests regardless of
/// their outcome. Clones share the same windows.
#[derive(Clone)]
pub struct RequestThrottler {
    config: Arc<ThrottleConfig>,
    windows: Arc<Mutex<HashMap<String, VecDeque<Instant>>>>,
}

impl RequestThrottler {
    /// Create a new throttler
    pub fn new(config: ThrottleConfig) -> Self {
        Self {
            config: Arc::new(config),
            windows: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    /// Get the configuration
    pub fn config(&self) -> &ThrottleConfig {
        &self.config
    }

    /// Whether another request to `endpoint` fits in the current window
    pub fn can_make_request(&self, endpoint: &str) -> bool {
        let now = Instant::now();
        let mut windows = self.windows.lock();
        self.count_in_window(&mut windows, endpoint, now) < self.limit()
    }

    /// Record a request to `endpoint` at the current instant
    pub fn record_request(&self, endpoint: &str) {
        let now = Instant::now();
        self.windows
            .lock()
            .entry(endpoint.to_string())
            .or_default()
            .push_back(now);
    }

    /// How long until `endpoint` admits another request
    pub fn time_until_next_request(&self, endpoint: &str) -> Duration {
        let now = Instant::now();
        let mut windows = self.windows.lock();
        self.wait_time(&mut windows, endpoint, now)
    }

    /// Check the budget and record the request under a single lock
    pub fn try_acquire(&self, endpoint: &str) -> Result<(), ThrottleError> {
        let now = Instant::now();
        let mut windows = self.windows.lock();

        if self.count_in_window(&mut windows, endpoint, now) >= self.limit() {
            let retry_after = self.wait_time(&mut windows, endpoint, now);
            log::debug!(
                "Throttled request to {}: next slot in {:?}",
                endpoint,
                retry_after
            );
            return Err(ThrottleError::Exceeded {
                endpoint: endpoint.to_string(),
                retry_after,
            });
        }

        windows
            .entry(endpoint.to_string())
            .or_default()
            .push_back(now);
        Ok(())
    }

    /// Forget every recorded request
    pub fn reset(&self) {
        self.windows.lock().clear();
    }

    fn limit(&self) -> usize {
        self.config.max_requests_per_minute as usize
    }

    /// Prune stale timestamps for `endpoint` and return how many remain
    fn count_in_window(
        &self,
        windows: &mut HashMap<String, VecDeque<Instant>>,
        endpoint: &str,
        now: Instant,
    ) -> usize {
        let Some(window) = windows.get_mut(endpoint) else {
            return 0;
        };

        while let Some(oldest) = window.front() {
            if now.saturating_duration_since(*oldest) >= THROTTLE_WINDOW {
                window.pop_front();
            } else {
                break;
            }
        }

        let count = window.len();
        if count == 0 {
            windows.remove(endpoint);
        }
        count
    }

    fn wait_time(
        &self,
        windows: &mut HashMap<String, VecDeque<Instant>>,
        endpoint: &str,
        now: Instant,
    ) -> Duration {
        if self.count_in_window(windows, endpoint, now) < self.limit() {
            return Duration::ZERO;
        }

        windows
            .get(endpoint)
            .and_then(|window| window.front())
            .map(|oldest| (*oldest + THROTTLE_WINDOW).saturating_duration_since(now))
            .unwrap_or(Duration::ZERO)
    }
}
