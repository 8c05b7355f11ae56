//! Configuration loading from disk and environment.

use std::fs;
use std::path::Path;

use thiserror::Error;

use crate::config::schema::{LogFormat, ServerConfig};
use crate::config::validation::{validate_config, ValidationError};

/// Error type for configuration loading.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Parse error: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("Invalid value for {var}: {value}")]
    Env { var: &'static str, value: String },

    #[error("Validation failed: {}", join_errors(.0))]
    Validation(Vec<ValidationError>),
}

fn join_errors(errors: &[ValidationError]) -> String {
    errors
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join(", ")
}

/// Load and validate configuration from a TOML file, then apply
/// `FLAGPOLE_*` environment overrides.
pub fn load_config(path: &Path) -> Result<ServerConfig, ConfigError> {
    let content = fs::read_to_string(path)?;
    let config: ServerConfig = toml::from_str(&content)?;
    finish(config)
}

/// Build a configuration from defaults plus environment overrides.
pub fn load_from_env() -> Result<ServerConfig, ConfigError> {
    finish(ServerConfig::default())
}

fn finish(config: ServerConfig) -> Result<ServerConfig, ConfigError> {
    let config = apply_overrides(config, |var| std::env::var(var).ok())?;
    validate_config(&config).map_err(ConfigError::Validation)?;
    Ok(config)
}

/// Apply overrides from `lookup`, keyed by environment variable name.
pub fn apply_overrides<F>(mut config: ServerConfig, lookup: F) -> Result<ServerConfig, ConfigError>
where
    F: Fn(&str) -> Option<String>,
{
    if let Some(addr) = lookup("FLAGPOLE_BIND_ADDRESS") {
        config.listener.bind_address = addr;
    }
    if let Some(secret) = lookup("FLAGPOLE_SECRET") {
        config.server.secret = Some(secret);
    }
    if let Some(path) = lookup("FLAGPOLE_DB_PATH") {
        config.db.path = Some(path.into());
    }
    if let Some(value) = lookup("FLAGPOLE_DISABLE_MIGRATION") {
        config.db.disable_migration = parse_bool("FLAGPOLE_DISABLE_MIGRATION", value)?;
    }
    if let Some(file) = lookup("FLAGPOLE_IMPORT_FILE") {
        config.import.file = Some(file.into());
    }
    if let Some(level) = lookup("FLAGPOLE_LOG_LEVEL") {
        config.observability.log_level = level;
    }
    if let Some(format) = lookup("FLAGPOLE_LOG_FORMAT") {
        config.observability.log_format = match format.as_str() {
            "json" => LogFormat::Json,
            "pretty" => LogFormat::Pretty,
            _ => {
                return Err(ConfigError::Env {
                    var: "FLAGPOLE_LOG_FORMAT",
                    value: format,
                })
            }
        };
    }
    Ok(config)
}

fn parse_bool(var: &'static str, value: String) -> Result<bool, ConfigError> {
    match value.to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" => Ok(true),
        "0" | "false" | "no" => Ok(false),
        _ => Err(ConfigError::Env { var, value }),
    }
}
