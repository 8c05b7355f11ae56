//! Two-phase configuration: a validated [`ServerConfig`] plus values that
//! can only be known once the database is reachable.

use std::fmt;
use std::sync::Arc;

use crate::config::schema::ServerConfig;
use crate::events::EventHook;

/// Everything the orchestrator needs to start one instance.
#[derive(Clone, Default)]
pub struct StartOptions {
    /// Validated configuration.
    pub config: ServerConfig,

    /// In-process callback invoked for every stored domain event.
    pub event_hook: Option<EventHook>,
}

impl StartOptions {
    pub fn new(config: ServerConfig) -> Self {
        Self {
            config,
            event_hook: None,
        }
    }

    pub fn with_event_hook(mut self, hook: EventHook) -> Self {
        self.event_hook = Some(hook);
        self
    }
}

impl fmt::Debug for StartOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StartOptions")
            .field("config", &self.config)
            .field("event_hook", &self.event_hook.is_some())
            .finish()
    }
}

/// Configuration with the server secret bound.
///
/// Built exactly once per instance; the base configuration is shared, never mutated.
/// Without a secret the admin API refuses every request.
#[derive(Clone)]
pub struct ResolvedConfig {
    base: Arc<ServerConfig>,
    secret: Option<String>,
}

impl ResolvedConfig {
    pub fn new(base: Arc<ServerConfig>, secret: Option<String>) -> Self {
        Self { base, secret }
    }

    pub fn base(&self) -> &ServerConfig {
        &self.base
    }

    pub fn secret(&self) -> Option<&str> {
        self.secret.as_deref()
    }
}

impl std::ops::Deref for ResolvedConfig {
    type Target = ServerConfig;

    fn deref(&self) -> &Self::Target {
        &self.base
    }
}

impl fmt::Debug for ResolvedConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ResolvedConfig")
            .field("base", &self.base)
            .field("secret", &self.secret.as_ref().map(|_| "<redacted>"))
            .finish()
    }
}
