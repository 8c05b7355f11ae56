//! Configuration schema definitions.
//!
//! This module defines the complete configuration structure for the server.
//! All types derive Serde traits for deserialization from config files.

use std::path::PathBuf;

use serde::{Deserialize, Serialize};

/// Root configuration for a flagpole server.
#[derive(Debug, Clone, Deserialize, Serialize, Default)]
#[serde(default)]
pub struct ServerConfig {
    /// Listener configuration (bind address, timeouts).
    pub listener: ListenerConfig,

    /// Server identity settings.
    pub server: ServerSection,

    /// Embedded database settings.
    pub db: DbConfig,

    /// Bulk state import performed before the server reports ready.
    pub import: ImportConfig,

    /// Client SDK bookkeeping.
    pub client: ClientConfig,

    /// Observability settings.
    pub observability: ObservabilityConfig,
}

/// Listener configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ListenerConfig {
    /// Bind address (e.g., "0.0.0.0:4242").
    pub bind_address: String,

    /// Maximum concurrent connections (backpressure).
    pub max_connections: usize,

    /// How long an idle keep-alive connection is held open, in seconds.
    /// Zero disables keep-alive.
    pub keep_alive_timeout_secs: u64,

    /// Time allowed for a client to send complete request headers, in seconds.
    pub headers_timeout_secs: u64,

    /// Request timeout (total time for request/response) in seconds.
    pub request_timeout_secs: u64,
}

impl Default for ListenerConfig {
    fn default() -> Self {
        Self {
            bind_address: "0.0.0.0:4242".to_string(),
            max_connections: 10_000,
            keep_alive_timeout_secs: 15,
            headers_timeout_secs: 61,
            request_timeout_secs: 30,
        }
    }
}

/// Server identity settings.
#[derive(Debug, Clone, Deserialize, Serialize, Default)]
#[serde(default)]
pub struct ServerSection {
    /// Shared secret for the admin API. When absent the value stored
    /// in the settings table is used.
    pub secret: Option<String>,

    /// Path prefix all routes are mounted under (e.g., "/flags").
    pub base_path: String,
}

/// Embedded database configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct DbConfig {
    /// Snapshot file. `None` keeps everything in memory.
    pub path: Option<PathBuf>,

    /// Number of concurrent connections handed out by the pool.
    pub pool_size: usize,

    /// Skip schema migrations at startup (applied out-of-band).
    pub disable_migration: bool,
}

impl Default for DbConfig {
    fn default() -> Self {
        Self {
            path: None,
            pool_size: 10,
            disable_migration: false,
        }
    }
}

/// Bulk import instructions.
#[derive(Debug, Clone, Deserialize, Serialize, Default)]
#[serde(default)]
pub struct ImportConfig {
    /// State file to import. Import is skipped when unset.
    pub file: Option<PathBuf>,

    /// Remove all existing feature toggles before importing.
    pub drop_before_import: bool,

    /// Leave toggles that already exist untouched.
    pub keep_existing: bool,
}

/// Client SDK bookkeeping configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ClientConfig {
    /// How often buffered client registrations are written to the database.
    pub instance_flush_secs: u64,

    /// How long reported usage metrics are kept.
    pub metrics_retention_secs: u64,

    /// How often expired usage metrics are swept.
    pub metrics_cleanup_secs: u64,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            instance_flush_secs: 5,
            metrics_retention_secs: 48 * 60 * 60,
            metrics_cleanup_secs: 60 * 60,
        }
    }
}

/// Log output format.
#[derive(Debug, Clone, Copy, Deserialize, Serialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Pretty,
    Json,
}

/// Observability configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ObservabilityConfig {
    /// Log level (trace, debug, info, warn, error).
    pub log_level: String,

    /// Log output format.
    pub log_format: LogFormat,

    /// Expose the Prometheus scrape endpoint.
    pub metrics_enabled: bool,

    /// Metrics monitor reporting interval in seconds.
    pub monitor_interval_secs: u64,
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            log_format: LogFormat::Pretty,
            metrics_enabled: true,
            monitor_interval_secs: 5,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_document_uses_defaults() {
        let config: ServerConfig = toml::from_str("").unwrap();
        assert_eq!(config.listener.bind_address, "0.0.0.0:4242");
        assert_eq!(config.listener.keep_alive_timeout_secs, 15);
        assert_eq!(config.listener.headers_timeout_secs, 61);
        assert!(!config.db.disable_migration);
        assert!(config.import.file.is_none());
        assert!(config.server.secret.is_none());
    }

    #[test]
    fn partial_sections_keep_remaining_defaults() {
        let config: ServerConfig = toml::from_str(
            r#"
            [listener]
            bind_address = "127.0.0.1:9000"

            [db]
            disable_migration = true

            [import]
            file = "state.json"
            keep_existing = true

            [observability]
            log_format = "json"
            "#,
        )
        .unwrap();

        assert_eq!(config.listener.bind_address, "127.0.0.1:9000");
        assert_eq!(config.listener.max_connections, 10_000);
        assert!(config.db.disable_migration);
        assert_eq!(config.db.pool_size, 10);
        assert_eq!(config.import.file, Some(PathBuf::from("state.json")));
        assert!(config.import.keep_existing);
        assert!(!config.import.drop_before_import);
        assert_eq!(config.observability.log_format, LogFormat::Json);
    }
}
