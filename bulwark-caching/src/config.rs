//! Cache configuration

use bulwark_config::ServiceConfig;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

use crate::{CacheError, CacheResult};

/// Tiered cache configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TieredCacheConfig {
    /// Directory holding one envelope file per key
    pub directory: PathBuf,

    /// Lifetime of every entry, fixed for the cache instance
    #[serde(with = "humantime_serde")]
    pub ttl: Duration,

    /// Capacity of the background disk-write queue
    #[serde(default = "default_write_queue_capacity")]
    pub write_queue_capacity: usize,
}

fn default_write_queue_capacity() -> usize {
    256
}

impl TieredCacheConfig {
    /// Create a configuration with the default queue capacity
    pub fn new(directory: impl Into<PathBuf>, ttl: Duration) -> Self {
        Self {
            directory: directory.into(),
            ttl,
            write_queue_capacity: default_write_queue_capacity(),
        }
    }

    /// Derive the cache settings of one service
    pub fn for_service(config: &ServiceConfig, directory: impl Into<PathBuf>) -> Self {
        Self::new(directory, config.cache_ttl)
    }

    /// Check the configuration before building a cache from it
    pub fn validate(&self) -> CacheResult<()> {
        if self.ttl.is_zero() {
            return Err(CacheError::InvalidConfiguration(
                "ttl must be greater than 0".to_string(),
            ));
        }
        if self.write_queue_capacity == 0 {
            return Err(CacheError::InvalidConfiguration(
                "write_queue_capacity must be greater than 0".to_string(),
            ));
        }
        chrono::Duration::from_std(self.ttl).map_err(|e| {
            CacheError::InvalidConfiguration(format!("ttl out of range: {}", e))
        })?;
        Ok(())
    }
}
