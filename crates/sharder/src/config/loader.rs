use std::path::Path;
use thiserror::Error;

use super::types::SharderConfigFile;

/// Environment variable that overrides the configured token
pub const TOKEN_ENV: &str = "SHARDLINE_TOKEN";

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    IoError(#[from] std::io::Error),
    #[error("Failed to parse config: {0}")]
    ParseError(#[from] serde_json::Error),
    #[error("No token configured (set `token` or {TOKEN_ENV})")]
    MissingToken,
    #[error("Invalid value for {field}: {reason}")]
    InvalidValue { field: &'static str, reason: String },
}

/// Load sharder configuration from a JSON file
pub fn load_config<P: AsRef<Path>>(path: P) -> Result<SharderConfigFile, ConfigError> {
    let content = std::fs::read_to_string(path)?;
    load_config_from_str(&content)
}

/// Load configuration from a JSON string
pub fn load_config_from_str(json: &str) -> Result<SharderConfigFile, ConfigError> {
    let config: SharderConfigFile = serde_json::from_str(json)?;
    Ok(config.with_token_override(std::env::var(TOKEN_ENV).ok()))
}

/// Load the default embedded configuration
pub fn load_default_config() -> Result<SharderConfigFile, ConfigError> {
    let default_config = include_str!("sharder_config.json");
    load_config_from_str(default_config)
}

impl SharderConfigFile {
    /// Replace the token when `token` is set and non-empty
    pub fn with_token_override(mut self, token: Option<String>) -> Self {
        if let Some(token) = token.filter(|t| !t.trim().is_empty()) {
            self.token = token;
        }
        self
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.token.trim().is_empty() {
            return Err(ConfigError::MissingToken);
        }
        if self.sharding.shard_count == Some(0) {
            return Err(invalid("sharding.shard_count", "must be at least 1"));
        }
        if self.sharding.max_concurrency == Some(0) {
            return Err(invalid("sharding.max_concurrency", "must be at least 1"));
        }
        if self.rest.global_limit == 0 {
            return Err(invalid("rest.global_limit", "must be at least 1"));
        }
        if self.gateway.command_limit == 0 {
            return Err(invalid("gateway.command_limit", "must be at least 1"));
        }
        if self.sharding.presence_refresh_ms == 0 {
            return Err(invalid("sharding.presence_refresh_ms", "must be at least 1"));
        }
        if self.event_capacity == 0 {
            return Err(invalid("event_capacity", "must be at least 1"));
        }
        if let Some(url) = &self.gateway.url {
            url::Url::parse(url).map_err(|e| invalid("gateway.url", e.to_string()))?;
        }
        Ok(())
    }
}

fn invalid(field: &'static str, reason: impl Into<String>) -> ConfigError {
    ConfigError::InvalidValue {
        field,
        reason: reason.into(),
    }
}
