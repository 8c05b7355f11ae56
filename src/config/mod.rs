//! Configuration management subsystem.
//!
//! # Data Flow
//! ```text
//! config file (TOML)
//!     → loader.rs (parse, deserialize, FLAGPOLE_* overrides)
//!     → validation.rs (semantic checks)
//!     → ServerConfig (validated, immutable)
//!     → orchestrator binds the server secret
//!     → ResolvedConfig (shared via Arc to all subsystems)
//! ```
//!
//! # Design Decisions
//! - Config is immutable once loaded; the secret is bound into a new value
//! - All fields have defaults to allow minimal configs
//! - Validation separates syntactic (serde) from semantic checks

pub mod loader;
pub mod resolved;
pub mod schema;
pub mod validation;

pub use loader::{load_config, load_from_env, ConfigError};
pub use resolved::{ResolvedConfig, StartOptions};
pub use schema::{
    ClientConfig, DbConfig, ImportConfig, ListenerConfig, LogFormat, ObservabilityConfig,
    ServerConfig, ServerSection,
};
