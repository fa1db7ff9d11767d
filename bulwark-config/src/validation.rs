//! Configuration validation traits and utilities

use crate::error::{ConfigError, ConfigResult};

/// Trait for validatable configuration
pub trait Validatable {
    /// Validate the configuration
    fn validate(&self) -> ConfigResult<()>;

    /// Section label used in error messages, e.g. `services.news`
    fn section(&self) -> String;

    fn validation_error(&self, message: impl Into<String>) -> ConfigError {
        ConfigError::invalid(self.section(), message)
    }
}

/// Validate a required string field
pub fn validate_required_string(value: &str, field_name: &str, section: &str) -> ConfigResult<()> {
    if value.trim().is_empty() {
        return Err(ConfigError::invalid(
            section,
            format!("{} cannot be empty", field_name),
        ));
    }
    Ok(())
}

/// Validate a positive number
pub fn validate_positive<T>(value: T, field_name: &str, section: &str) -> ConfigResult<()>
where
    T: PartialOrd + Default + std::fmt::Display,
{
    if value <= T::default() {
        return Err(ConfigError::invalid(
            section,
            format!("{} must be greater than 0, got {}", field_name, value),
        ));
    }
    Ok(())
}

/// Validate an absolute http(s) URL
pub fn validate_url(url: &str, field_name: &str, section: &str) -> ConfigResult<()> {
    validate_required_string(url, field_name, section)?;

    let parsed = url::Url::parse(url).map_err(|e| {
        ConfigError::invalid(section, format!("{} has invalid URL format: {}", field_name, e))
    })?;

    match parsed.scheme() {
        "http" | "https" => Ok(()),
        scheme => Err(ConfigError::invalid(
            section,
            format!("{} scheme '{}' not allowed (only http/https)", field_name, scheme),
        )),
    }
}
