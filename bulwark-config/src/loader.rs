//! Configuration loading and environment variable handling

use crate::domains::service::ServiceConfig;
use crate::domains::NetworkConfig;
use crate::error::{ConfigError, ConfigResult};
use std::path::Path;
use std::str::FromStr;
use std::time::Duration;

/// Configuration loader with environment variable support
pub struct ConfigLoader {
    /// Environment variable prefix
    prefix: String,
}

impl ConfigLoader {
    /// Create a new config loader with default prefix
    pub fn new() -> Self {
        Self {
            prefix: "BULWARK".to_string(),
        }
    }

    /// Create a new config loader with custom prefix
    pub fn with_prefix(prefix: impl Into<String>) -> Self {
        Self {
            prefix: prefix.into(),
        }
    }

    /// Load configuration from a YAML file with environment overrides
    pub fn from_file(&self, path: impl AsRef<Path>) -> ConfigResult<NetworkConfig> {
        let path = path.as_ref();
        log::debug!("Loading network configuration from {}", path.display());

        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Unreadable {
            path: path.to_path_buf(),
            source,
        })?;
        let mut config: NetworkConfig =
            serde_yaml::from_str(&content).map_err(|source| ConfigError::Malformed {
                path: path.to_path_buf(),
                source,
            })?;

        self.apply_env_overrides(&mut config)?;
        config.validate_all()?;

        Ok(config)
    }

    /// Load configuration from environment variables only
    pub fn from_env(&self) -> ConfigResult<NetworkConfig> {
        let mut config = NetworkConfig::default();
        self.apply_env_overrides(&mut config)?;
        config.validate_all()?;
        Ok(config)
    }

    /// Load configuration with fallback chain
    pub fn load(&self, config_path: Option<impl AsRef<Path>>) -> ConfigResult<NetworkConfig> {
        match config_path {
            Some(path) => self.from_file(path),
            None => self.from_env(),
        }
    }

    /// Apply environment variable overrides to configuration
    fn apply_env_overrides(&self, config: &mut NetworkConfig) -> ConfigResult<()> {
        if let Ok(cache_dir) = self.get_env_var("CACHE_DIR") {
            config.cache_dir = cache_dir.into();
        }

        if let Ok(user_agent) = self.get_env_var("USER_AGENT") {
            config.user_agent = user_agent;
        }

        for (name, service) in config.services.iter_mut() {
            self.apply_service_overrides(name, service)?;
        }

        Ok(())
    }

    /// Apply `<PREFIX>_<SERVICE>_*` overrides to one service
    fn apply_service_overrides(&self, name: &str, config: &mut ServiceConfig) -> ConfigResult<()> {
        let scope = name.to_uppercase().replace('-', "_");

        if let Ok(base_url) = self.get_env_var(&format!("{}_BASE_URL", scope)) {
            config.base_url = Some(base_url);
        }

        if let Some(seconds) = self.parse_env_var::<u64>(&format!("{}_TIMEOUT", scope))? {
            config.timeout = Duration::from_secs(seconds);
        }

        if let Some(retries) = self.parse_env_var(&format!("{}_MAX_RETRIES", scope))? {
            config.max_retries = retries;
        }

        if let Some(limit) = self.parse_env_var(&format!("{}_MAX_REQUESTS_PER_MINUTE", scope))? {
            config.max_requests_per_minute = limit;
        }

        if let Some(seconds) = self.parse_env_var::<u64>(&format!("{}_CACHE_TTL", scope))? {
            config.cache_ttl = Duration::from_secs(seconds);
        }

        Ok(())
    }

    fn parse_env_var<T>(&self, name: &str) -> ConfigResult<Option<T>>
    where
        T: FromStr,
        T::Err: std::fmt::Display,
    {
        match self.get_env_var(name) {
            Ok(raw) => raw.parse::<T>().map(Some).map_err(|e| {
                ConfigError::EnvOverride {
                    variable: format!("{}_{}", self.prefix, name),
                    message: e.to_string(),
                }
            }),
            Err(_) => Ok(None),
        }
    }

    /// Get environment variable with prefix
    fn get_env_var(&self, name: &str) -> Result<String, std::env::VarError> {
        std::env::var(format!("{}_{}", self.prefix, name))
    }
}

impl Default for ConfigLoader {
    fn default() -> Self {
        Self::new()
    }
}
