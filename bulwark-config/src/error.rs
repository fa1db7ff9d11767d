//! Errors raised while loading or validating network configuration

use std::path::PathBuf;
use thiserror::Error;

pub type ConfigResult<T> = Result<T, ConfigError>;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Cannot read {path}: {source}")]
    Unreadable {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Malformed YAML in {path}: {source}")]
    Malformed {
        path: PathBuf,
        #[source]
        source: serde_yaml::Error,
    },

    /// A prefixed environment variable was set but could not be parsed
    #[error("Invalid value for {variable}: {message}")]
    EnvOverride { variable: String, message: String },

    /// A section failed validation; `section` is `network` or `services.<name>`
    #[error("Invalid {section}: {message}")]
    Invalid { section: String, message: String },
}

impl ConfigError {
    pub fn invalid(section: impl Into<String>, message: impl Into<String>) -> Self {
        ConfigError::Invalid {
            section: section.into(),
            message: message.into(),
        }
    }

    /// The section a validation failure belongs to, if any
    pub fn section(&self) -> Option<&str> {
        match self {
            ConfigError::Invalid { section, .. } => Some(section),
            _ => None,
        }
    }
}
