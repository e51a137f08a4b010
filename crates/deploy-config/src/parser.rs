//! Configuration parser and validation

use crate::{Config, ConfigError, Result};
use deploy_orchestration::ConfigSchema;
use std::path::Path;

/// Parse a YAML configuration file
pub fn parse_file(path: impl AsRef<Path>) -> Result<Config> {
    let content = std::fs::read_to_string(path)?;
    parse_str(&content)
}

/// Parse YAML configuration from a string
pub fn parse_str(content: &str) -> Result<Config> {
    if content.trim().is_empty() {
        return Ok(Config::default());
    }
    let config: Config = serde_yaml::from_str(content)?;
    validate_config(&config)?;
    Ok(config)
}

/// Parse `path` if it exists, otherwise return the default configuration
pub fn load(path: impl AsRef<Path>) -> Result<Config> {
    let path = path.as_ref();
    if path.exists() {
        parse_file(path)
    } else {
        Ok(Config::default())
    }
}

/// Validate configuration
pub fn validate_config(config: &Config) -> Result<()> {
    if config.version != "1.0" {
        return Err(invalid(format!(
            "Unsupported version: {}, expected 1.0",
            config.version
        )));
    }

    let name = &config.service.name;
    if name.is_empty()
        || !name
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_')
    {
        return Err(invalid(format!(
            "service name '{}' must be non-empty and use only letters, digits, '-' and '_'",
            name
        )));
    }
    if config.service.executable.trim().is_empty() {
        return Err(invalid("service.executable is empty".to_string()));
    }

    config
        .layout()
        .validate()
        .map_err(|e| invalid(e.to_string()))?;
    config.manifest()?;

    let schema = ConfigSchema::worker_defaults();
    for key in config.settings.keys() {
        if schema.get(key).is_none() {
            return Err(invalid(format!("unknown setting '{}'", key)));
        }
    }

    if config.health.poll_interval_secs == 0 {
        return Err(invalid("health.poll_interval_secs must be positive".to_string()));
    }
    if config.health.timeout_secs < config.health.poll_interval_secs {
        return Err(invalid(format!(
            "health.timeout_secs ({}) is shorter than health.poll_interval_secs ({})",
            config.health.timeout_secs, config.health.poll_interval_secs
        )));
    }
    if !config.health.path.starts_with('/') {
        return Err(invalid(format!(
            "health.path '{}' must start with '/'",
            config.health.path
        )));
    }
    if config.ssh.operation_timeout_secs == 0 {
        return Err(invalid("ssh.operation_timeout_secs must be positive".to_string()));
    }
    if config.limits.nofile == 0 || config.limits.memory_max.trim().is_empty() {
        return Err(invalid("limits.memory_max and limits.nofile must be set".to_string()));
    }

    Ok(())
}

fn invalid(message: String) -> ConfigError {
    ConfigError::ValidationError(message)
}
