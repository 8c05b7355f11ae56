//! Configuration validation.
//!
//! Semantic checks only; serde already handled the syntactic ones. Every
//! problem found is reported, not just the first.

use std::net::SocketAddr;

use thiserror::Error;

use crate::config::schema::ServerConfig;

/// A single semantic problem with a configuration.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationError {
    #[error("listener.bind_address '{0}' is not a valid socket address")]
    BindAddress(String),

    #[error("{field} must be greater than zero")]
    NotPositive { field: &'static str },

    #[error("listener.headers_timeout_secs ({headers}) must not be shorter than listener.keep_alive_timeout_secs ({keep_alive})")]
    HeadersShorterThanKeepAlive { headers: u64, keep_alive: u64 },

    #[error("import.file '{0}' does not exist")]
    MissingImportFile(String),

    #[error("server.base_path '{0}' must start with '/' and not end with '/'")]
    BasePath(String),
}

/// Validate a configuration, collecting every error.
pub fn validate_config(config: &ServerConfig) -> Result<(), Vec<ValidationError>> {
    let mut errors = Vec::new();

    if config.listener.bind_address.parse::<SocketAddr>().is_err() {
        errors.push(ValidationError::BindAddress(
            config.listener.bind_address.clone(),
        ));
    }

    let positives = [
        ("listener.max_connections", config.listener.max_connections as u64),
        ("listener.headers_timeout_secs", config.listener.headers_timeout_secs),
        ("listener.request_timeout_secs", config.listener.request_timeout_secs),
        ("db.pool_size", config.db.pool_size as u64),
        ("client.instance_flush_secs", config.client.instance_flush_secs),
        ("client.metrics_cleanup_secs", config.client.metrics_cleanup_secs),
        ("observability.monitor_interval_secs", config.observability.monitor_interval_secs),
    ];
    for (field, value) in positives {
        if value == 0 {
            errors.push(ValidationError::NotPositive { field });
        }
    }

    // Headers must be allowed to arrive on a connection that is still alive.
    let listener = &config.listener;
    if listener.headers_timeout_secs < listener.keep_alive_timeout_secs {
        errors.push(ValidationError::HeadersShorterThanKeepAlive {
            headers: listener.headers_timeout_secs,
            keep_alive: listener.keep_alive_timeout_secs,
        });
    }

    if let Some(file) = &config.import.file {
        if !file.exists() {
            errors.push(ValidationError::MissingImportFile(
                file.display().to_string(),
            ));
        }
    }

    let base = &config.server.base_path;
    if !base.is_empty() && (!base.starts_with('/') || base.ends_with('/')) {
        errors.push(ValidationError::BasePath(base.clone()));
    }

    if errors.is_empty() {
        Ok(())
    } else {
        Err(errors)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_is_valid() {
        assert_eq!(validate_config(&ServerConfig::default()), Ok(()));
    }

    #[test]
    fn reports_all_errors() {
        let mut config = ServerConfig::default();
        config.listener.bind_address = "not-an-address".into();
        config.db.pool_size = 0;
        config.import.file = Some("/definitely/not/here.json".into());

        let errors = validate_config(&config).unwrap_err();
        assert_eq!(errors.len(), 3);
        assert!(errors.contains(&ValidationError::BindAddress("not-an-address".into())));
        assert!(errors.contains(&ValidationError::NotPositive { field: "db.pool_size" }));
    }

    #[test]
    fn headers_timeout_must_cover_keep_alive() {
        let mut config = ServerConfig::default();
        config.listener.keep_alive_timeout_secs = 30;
        config.listener.headers_timeout_secs = 10;

        let errors = validate_config(&config).unwrap_err();
        assert_eq!(
            errors,
            vec![ValidationError::HeadersShorterThanKeepAlive {
                headers: 10,
                keep_alive: 30
            }]
        );
    }

    #[test]
    fn base_path_shape() {
        let mut config = ServerConfig::default();
        config.server.base_path = "/flags".into();
        assert!(validate_config(&config).is_ok());

        config.server.base_path = "flags/".into();
        assert!(validate_config(&config).is_err());
    }
}
