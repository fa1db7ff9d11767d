//! Domain-specific configuration modules

pub mod service;

use crate::error::ConfigResult;
use crate::validation::{validate_required_string, Validatable};
use serde::{Deserialize, Serialize};
use service::{NamedService, ServiceConfig};
use std::collections::BTreeMap;
use std::path::PathBuf;

/// Name of the fallback service used when a caller asks for an unknown one
pub const DEFAULT_SERVICE: &str = "default";

/// Process-wide networking configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct NetworkConfig {
    /// Root directory for the on-disk cache tier; each service gets a subdirectory
    pub cache_dir: PathBuf,

    /// User agent sent with every request
    pub user_agent: String,

    /// Logical services keyed by name
    pub services: BTreeMap<String, ServiceConfig>,
}

impl Default for NetworkConfig {
    fn default() -> Self {
        let mut services = BTreeMap::new();
        services.insert(DEFAULT_SERVICE.to_string(), ServiceConfig::default());
        services.insert("news".to_string(), ServiceConfig::news());
        services.insert("stocks".to_string(), ServiceConfig::stocks());
        services.insert("github".to_string(), ServiceConfig::github());

        Self {
            cache_dir: default_cache_dir(),
            user_agent: default_user_agent(),
            services,
        }
    }
}

impl NetworkConfig {
    /// Look up a service by name
    pub fn service(&self, name: &str) -> Option<&ServiceConfig> {
        self.services.get(name)
    }

    /// Look up a service, falling back to the `default` entry and then to built-in defaults
    pub fn service_or_default(&self, name: &str) -> ServiceConfig {
        self.services
            .get(name)
            .or_else(|| self.services.get(DEFAULT_SERVICE))
            .cloned()
            .unwrap_or_default()
    }

    /// Cache directory for one service
    pub fn cache_dir_for(&self, service: &str) -> PathBuf {
        self.cache_dir.join(service)
    }

    /// Validate the process-wide settings and every service
    pub fn validate_all(&self) -> ConfigResult<()> {
        self.validate()?;
        for (name, config) in &self.services {
            NamedService { name, config }.validate()?;
        }
        Ok(())
    }

    /// Generate a sample configuration file
    pub fn generate_sample() -> String {
        let config = NetworkConfig::default();
        serde_yaml::to_string(&config)
            .unwrap_or_else(|_| "# Failed to generate sample config".to_string())
    }
}

impl Validatable for NetworkConfig {
    fn validate(&self) -> ConfigResult<()> {
        validate_required_string(&self.user_agent, "user_agent", &self.section())?;

        if self.cache_dir.as_os_str().is_empty() {
            return Err(self.validation_error("cache_dir cannot be empty"));
        }

        if self.services.is_empty() {
            return Err(self.validation_error("at least one service must be configured"));
        }

        Ok(())
    }

    fn section(&self) -> String {
        "network".to_string()
    }
}

fn default_cache_dir() -> PathBuf {
    dirs::cache_dir()
        .unwrap_or_else(std::env::temp_dir)
        .join("bulwark")
}

fn default_user_agent() -> String {
    format!("Bulwark/{}", env!("CARGO_PKG_VERSION"))
}
