use crate::config::Config;
use thiserror::Error;

#[derive(Debug, Error, PartialEq, Eq)]
#[error("Invalid configuration: {0}")]
pub struct ConfigError(pub String);

/// Validates configuration objects for consistency and correctness
pub struct ConfigValidator;

impl ConfigValidator {
    /// Validates a Redis URL
    pub fn validate_redis_url(url: &str) -> Result<(), ConfigError> {
        if url.is_empty() {
            return Err(ConfigError("Redis URL cannot be empty".to_string()));
        }

        if !url.starts_with("redis://") && !url.starts_with("rediss://") {
            return Err(ConfigError(
                "Redis URL must start with 'redis://' or 'rediss://'".to_string(),
            ));
        }

        Ok(())
    }

    pub fn validate_command_prefix(prefix: &str) -> Result<(), ConfigError> {
        if prefix.trim().is_empty() {
            return Err(ConfigError("Command prefix cannot be empty".to_string()));
        }
        Ok(())
    }

    /// Validates every setting the service starts from
    pub fn validate(config: &Config) -> Result<(), ConfigError> {
        config.limiter().validate().map_err(ConfigError)?;
        config.queue().validate().map_err(ConfigError)?;

        if let Some(url) = &config.redis_url {
            Self::validate_redis_url(url)?;
        }

        if config.redis_prefix.is_empty() {
            return Err(ConfigError("Redis key prefix cannot be empty".to_string()));
        }

        if config.sweep_interval_secs == 0 {
            return Err(ConfigError(
                "Sweep interval must be greater than 0".to_string(),
            ));
        }

        if config.outbound_timeout_ms == 0 {
            return Err(ConfigError(
                "Outbound timeout must be greater than 0".to_string(),
            ));
        }

        Self::validate_command_prefix(&config.command_prefix)
    }
}
