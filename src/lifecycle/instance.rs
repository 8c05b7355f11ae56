//! The handle returned by a successful start or create.

use std::net::SocketAddr;
use std::sync::{Arc, Mutex};

use axum::Router;
use tokio::sync::Mutex as AsyncMutex;

use crate::config::ResolvedConfig;
use crate::events::EventBus;
use crate::http::BoundServer;
use crate::lifecycle::shutdown::{ShutdownError, ShutdownPlan};
use crate::lifecycle::LifecycleState;
use crate::services::Services;
use crate::stores::Stores;

/// One live application lifetime.
///
/// `stop` is the only way to release what the instance holds. Stopping twice
/// is a no-op that returns `Ok(())`.
pub struct RunningInstance {
    pub stores: Stores,
    pub services: Services,
    pub app: Router,
    pub event_bus: EventBus,
    pub version: &'static str,
    pub config: ResolvedConfig,
    server: Option<Arc<dyn BoundServer>>,
    teardown: AsyncMutex<Option<ShutdownPlan>>,
    state: Mutex<LifecycleState>,
}

pub(crate) struct InstanceParts {
    pub(crate) stores: Stores,
    pub(crate) services: Services,
    pub(crate) app: Router,
    pub(crate) event_bus: EventBus,
    pub(crate) config: ResolvedConfig,
    pub(crate) server: Option<Arc<dyn BoundServer>>,
    pub(crate) teardown: ShutdownPlan,
}

impl RunningInstance {
    pub(crate) fn new(parts: InstanceParts) -> Self {
        let state = if parts.server.is_some() {
            LifecycleState::Listening
        } else {
            LifecycleState::ReadyEmbedded
        };
        Self {
            stores: parts.stores,
            services: parts.services,
            app: parts.app,
            event_bus: parts.event_bus,
            version: crate::VERSION,
            config: parts.config,
            server: parts.server,
            teardown: AsyncMutex::new(Some(parts.teardown)),
            state: Mutex::new(state),
        }
    }

    pub fn state(&self) -> LifecycleState {
        *self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Bound address in start mode, `None` when embedded.
    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.server.as_ref().map(|s| s.local_addr())
    }

    fn set_state(&self, state: LifecycleState) {
        *self.state.lock().unwrap_or_else(|e| e.into_inner()) = state;
        tracing::info!(state = ?state, "Lifecycle state changed");
    }

    /// Release everything: metrics monitor, listener, stores, database.
    pub async fn stop(&self) -> Result<(), ShutdownError> {
        let mut teardown = self.teardown.lock().await;
        let Some(plan) = teardown.take() else {
            tracing::debug!("Instance already stopped");
            return Ok(());
        };

        self.set_state(LifecycleState::Stopping);
        let result = plan.run().await;
        self.set_state(LifecycleState::Stopped);

        match &result {
            Ok(()) => tracing::info!("Shutdown complete"),
            Err(e) => tracing::error!(error = %e, "Shutdown finished with errors"),
        }
        result
    }
}

impl std::fmt::Debug for RunningInstance {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RunningInstance")
            .field("state", &self.state())
            .field("local_addr", &self.local_addr())
            .field("version", &self.version)
            .field("stores", &self.stores)
            .finish()
    }
}
