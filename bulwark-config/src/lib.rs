//! Per-service configuration for the Bulwark resilient networking core
//!
//! Each logical service (news, stocks, github, ...) owns a [`ServiceConfig`]
//! describing its timeouts, retry budget, breaker thresholds, cache TTL and
//! request budget. [`NetworkConfig`] groups them with the process-wide
//! settings and [`ConfigLoader`] reads the whole thing from YAML with
//! environment overrides.

pub mod domains;
pub mod error;
pub mod loader;
pub mod validation;

// Re-export main types
pub use domains::{
    service::{ServiceConfig, ThrottlePolicy},
    NetworkConfig,
};
pub use error::{ConfigError, ConfigResult};
pub use loader::ConfigLoader;
pub use validation::Validatable;
