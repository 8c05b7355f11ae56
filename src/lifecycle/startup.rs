//! Startup orchestration.
//!
//! # Responsibilities
//! - Gate everything on schema migrations
//! - Build the event bus, store layer, service layer, in that order
//! - Bind the server secret, build the HTTP surface, start metrics
//! - Run the configured bulk import before declaring readiness
//! - Bind the listener (start mode only)
//!
//! # Design Decisions
//! - Fail fast: any startup error is fatal and returned to the caller
//! - Steps run strictly in sequence; later steps depend on earlier ones
//! - Once the store layer exists, a failure releases what was acquired
//!   before the error is returned

use std::sync::Arc;

use thiserror::Error;

use crate::config::{ResolvedConfig, ServerConfig, StartOptions};
use crate::db::migrator::{MigrationError, Migrator, SchemaMigrator};
use crate::db::{DatabaseConnector, DbError};
use crate::events::{add_event_hook, EventBus};
use crate::http::{build_app, BindError, Binder, TcpBinder};
use crate::lifecycle::instance::{InstanceParts, RunningInstance};
use crate::lifecycle::shutdown::ShutdownPlan;
use crate::lifecycle::{LifecycleState, Mode};
use crate::observability::{MetricsMonitor, Monitor};
use crate::services::{ImportError, ImportOptions, Services};
use crate::stores::settings::SECRET_KEY;
use crate::stores::{DefaultStoreFactory, StoreError, StoreFactory, Stores};

/// Recorded as the author of events produced by the startup import.
const IMPORT_USER: &str = "import";

#[derive(Debug, Error)]
pub enum StartupError {
    #[error("database migration failed: {0}")]
    Migration(#[source] MigrationError),

    #[error("failed to build the store layer: {0}")]
    Wiring(#[source] StoreError),

    #[error("failed to read the server secret: {0}")]
    Secret(#[source] StoreError),

    #[error("state import failed: {0}")]
    Import(#[source] ImportError),

    #[error(transparent)]
    Bind(BindError),
}

/// The collaborators an orchestrator sequences.
///
/// A set of collaborators belongs to one instance: the monitor and the
/// memory-only database connector hold that instance's state.
#[derive(Clone)]
pub struct Wiring {
    pub migrator: Arc<dyn Migrator>,
    pub store_factory: Arc<dyn StoreFactory>,
    pub monitor: Arc<dyn Monitor>,
    pub binder: Arc<dyn Binder>,
}

impl Wiring {
    /// Real database, metrics and TCP listener.
    ///
    /// The migrator and the store factory share one connector so a
    /// memory-only database is migrated in place.
    pub fn production() -> Self {
        let connector = Arc::new(DatabaseConnector::new());
        Self {
            migrator: Arc::new(SchemaMigrator::new(Arc::clone(&connector))),
            store_factory: Arc::new(DefaultStoreFactory::new(connector)),
            monitor: Arc::new(MetricsMonitor::new()),
            binder: Arc::new(TcpBinder),
        }
    }
}

impl Default for Wiring {
    fn default() -> Self {
        Self::production()
    }
}

/// Sequences construction of one instance. `start` and `create` consume it.
#[derive(Default)]
pub struct Orchestrator {
    wiring: Wiring,
}

impl Orchestrator {
    pub fn new(wiring: Wiring) -> Self {
        Self { wiring }
    }

    /// Build everything and bind the listener. Resolves once the socket is
    /// listening.
    pub async fn start(self, options: StartOptions) -> Result<RunningInstance, StartupError> {
        self.launch(options, Mode::Start).await
    }

    /// Build everything except the listener.
    pub async fn create(self, options: StartOptions) -> Result<RunningInstance, StartupError> {
        self.launch(options, Mode::Create).await
    }

    async fn launch(&self, options: StartOptions, mode: Mode) -> Result<RunningInstance, StartupError> {
        let StartOptions { config, event_hook } = options;
        let config = Arc::new(config);
        tracing::info!(mode = ?mode, version = crate::VERSION, "Starting flagpole");

        self.migrate(&config).await?;

        transition(LifecycleState::Wiring);
        let event_bus = EventBus::new();
        let stores = self
            .wiring
            .store_factory
            .create_stores(&config, &event_bus)
            .await
            .map_err(|e| {
                tracing::error!(error = %e, "Failed to build the store layer");
                StartupError::Wiring(e)
            })?;
        let services = Services::new(&stores, &config);
        let mut teardown = ShutdownPlan::for_stores(&stores);

        let secret = match resolve_secret(&config, &stores).await {
            Ok(secret) => secret,
            Err(e) => return Err(abort(teardown, StartupError::Secret(e)).await),
        };
        let resolved = ResolvedConfig::new(Arc::clone(&config), secret);

        let app = build_app(&resolved, &stores, &services, &event_bus);

        self.wiring
            .monitor
            .start_monitoring(&resolved, &stores, crate::VERSION, &event_bus);
        teardown = teardown.with_monitor(Arc::clone(&self.wiring.monitor));

        if let Some(hook) = event_hook {
            add_event_hook(hook, &stores.events);
        }

        if let Some(file) = config.import.file.clone() {
            let options = ImportOptions {
                file,
                drop_before_import: config.import.drop_before_import,
                keep_existing: config.import.keep_existing,
                user_name: IMPORT_USER.to_string(),
            };
            if let Err(e) = services.state.import_file(options).await {
                return Err(abort(teardown, StartupError::Import(e)).await);
            }
        }

        let server = match mode {
            Mode::Create => None,
            Mode::Start => match self.wiring.binder.listen(app.clone(), &config.listener).await {
                Ok(server) => {
                    tracing::info!(address = %server.local_addr(), "Flagpole has started");
                    teardown = teardown.with_server(Arc::clone(&server));
                    Some(server)
                }
                Err(e) => return Err(abort(teardown, StartupError::Bind(e)).await),
            },
        };

        let instance = RunningInstance::new(InstanceParts {
            stores,
            services,
            app,
            event_bus,
            config: resolved,
            server,
            teardown,
        });
        transition(instance.state());
        Ok(instance)
    }

    async fn migrate(&self, config: &ServerConfig) -> Result<(), StartupError> {
        if config.db.disable_migration {
            tracing::info!("DB migrations disabled");
            return Ok(());
        }

        transition(LifecycleState::Migrating);
        match self.wiring.migrator.migrate(config).await {
            Ok(report) => {
                tracing::debug!(applied = ?report.applied, "Migrations finished");
                Ok(())
            }
            Err(e) => {
                tracing::error!(error = %e, "Database migration failed");
                Err(StartupError::Migration(e))
            }
        }
    }
}

/// Start a listening instance with production wiring.
pub async fn start(options: StartOptions) -> Result<RunningInstance, StartupError> {
    Orchestrator::default().start(options).await
}

/// Create an embedded instance with production wiring.
pub async fn create(options: StartOptions) -> Result<RunningInstance, StartupError> {
    Orchestrator::default().create(options).await
}

fn transition(state: LifecycleState) {
    tracing::info!(state = ?state, "Lifecycle state changed");
}

/// The configured secret, else the one stored in settings.
///
/// A missing setting, or a settings table that was never migrated, leaves the
/// instance without a secret. Only a failing read is an error.
async fn resolve_secret(config: &ServerConfig, stores: &Stores) -> Result<Option<String>, StoreError> {
    if let Some(secret) = &config.server.secret {
        return Ok(Some(secret.clone()));
    }
    let stored = match stores.settings.get_string(SECRET_KEY).await {
        Ok(stored) => stored,
        Err(StoreError::Db(DbError::MissingTable(_))) => None,
        Err(e) => return Err(e),
    };
    if stored.is_none() {
        tracing::warn!(setting = SECRET_KEY, "No server secret configured or stored, admin API disabled");
    }
    Ok(stored)
}

/// Tear down a partially started instance and hand back the startup error.
async fn abort(teardown: ShutdownPlan, error: StartupError) -> StartupError {
    tracing::error!(error = %error, "Startup aborted, releasing acquired resources");
    if let Err(e) = teardown.run().await {
        tracing::warn!(error = %e, "Cleanup after failed startup was incomplete");
    }
    error
}
