//! Store layer: one data-access handle per domain entity.
//!
//! # Data Flow
//! ```text
//! StoreFactory.create_stores(config, bus)
//!     → Database (pooled connection)
//!     → SettingStore, EventStore, FeatureToggleStore       (stateless)
//!     → ClientInstanceStore, ClientMetricsStore            (own timers)
//!     → Stores { resources: [timer owners], connection: db }
//! ```
//!
//! # Design Decisions
//! - Stores never close the database; only the orchestrator does
//! - Handles that own background work implement [`Teardown`] and are listed
//!   in `Stores::resources`, everything else is released by drop
//! - Every database call reports its latency on the event bus

pub mod background;
pub mod client_instance;
pub mod client_metrics;
pub mod event;
pub mod feature_toggle;
pub mod settings;

use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use thiserror::Error;

use crate::config::{ClientConfig, ServerConfig};
use crate::db::{Database, DatabaseConnector, DbError};
use crate::events::{AppEvent, EventBus};

pub use client_instance::{ClientInstance, ClientInstanceStore};
pub use client_metrics::{ClientMetricsBucket, ClientMetricsStore, ToggleCount};
pub use event::EventStore;
pub use feature_toggle::{FeatureToggle, FeatureToggleStore, Strategy};
pub use settings::SettingStore;

/// Table names created by the migrations.
pub mod tables {
    pub const SETTINGS: &str = "settings";
    pub const EVENTS: &str = "events";
    pub const FEATURES: &str = "features";
    pub const CLIENT_INSTANCES: &str = "client_instances";
    pub const CLIENT_METRICS: &str = "client_metrics";
}

/// Errors raised by stores.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error(transparent)]
    Db(#[from] DbError),

    #[error("{kind} '{key}' not found")]
    NotFound { kind: &'static str, key: String },

    #[error("{kind} '{key}' already exists")]
    AlreadyExists { kind: &'static str, key: String },

    #[error("background task of {0} did not stop cleanly")]
    Background(&'static str),
}

/// A handle that owns resources which must be released explicitly.
#[async_trait]
pub trait Teardown: Send + Sync {
    fn name(&self) -> &'static str;

    /// Release the resources. Calling this twice is a no-op.
    async fn destroy(&self) -> Result<(), StoreError>;
}

#[async_trait]
impl Teardown for Database {
    fn name(&self) -> &'static str {
        "db"
    }

    async fn destroy(&self) -> Result<(), StoreError> {
        Database::destroy(self).await.map_err(StoreError::from)
    }
}

/// All store handles of one running instance.
pub struct Stores {
    pub db: Arc<Database>,
    pub settings: Arc<SettingStore>,
    pub events: Arc<EventStore>,
    pub features: Arc<FeatureToggleStore>,
    pub client_instances: Arc<ClientInstanceStore>,
    pub client_metrics: Arc<ClientMetricsStore>,

    /// Handles owning background resources, destroyed before the connection.
    pub resources: Vec<Arc<dyn Teardown>>,

    /// The database connection, destroyed last.
    pub connection: Arc<dyn Teardown>,
}

impl Stores {
    /// Build every store over an open database.
    pub fn new(db: Arc<Database>, bus: &EventBus, client: &ClientConfig) -> Self {
        let settings = Arc::new(SettingStore::new(Arc::clone(&db), bus.clone()));
        let events = Arc::new(EventStore::new(Arc::clone(&db), bus.clone()));
        let features = Arc::new(FeatureToggleStore::new(Arc::clone(&db), bus.clone()));
        let client_instances = ClientInstanceStore::new(
            Arc::clone(&db),
            bus.clone(),
            Duration::from_secs(client.instance_flush_secs),
        );
        let client_metrics = ClientMetricsStore::new(
            Arc::clone(&db),
            bus.clone(),
            Duration::from_secs(client.metrics_retention_secs),
            Duration::from_secs(client.metrics_cleanup_secs),
        );

        let resources: Vec<Arc<dyn Teardown>> = vec![
            Arc::clone(&client_instances) as Arc<dyn Teardown>,
            Arc::clone(&client_metrics) as Arc<dyn Teardown>,
        ];
        let connection: Arc<dyn Teardown> = Arc::clone(&db) as Arc<dyn Teardown>;

        Self {
            db,
            settings,
            events,
            features,
            client_instances,
            client_metrics,
            resources,
            connection,
        }
    }
}

impl std::fmt::Debug for Stores {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Stores")
            .field("db", &self.db)
            .field(
                "resources",
                &self.resources.iter().map(|r| r.name()).collect::<Vec<_>>(),
            )
            .field("connection", &self.connection.name())
            .finish()
    }
}

/// Builds the store layer for an instance.
#[async_trait]
pub trait StoreFactory: Send + Sync {
    async fn create_stores(&self, config: &ServerConfig, bus: &EventBus) -> Result<Stores, StoreError>;
}

/// Production factory: connects to the configured database.
#[derive(Debug, Clone)]
pub struct DefaultStoreFactory {
    connector: Arc<DatabaseConnector>,
}

impl DefaultStoreFactory {
    pub fn new(connector: Arc<DatabaseConnector>) -> Self {
        Self { connector }
    }
}

#[async_trait]
impl StoreFactory for DefaultStoreFactory {
    async fn create_stores(&self, config: &ServerConfig, bus: &EventBus) -> Result<Stores, StoreError> {
        let db = self.connector.connect(&config.db).await?;
        tracing::debug!(pool_size = db.pool_size(), "Database connection pool opened");
        Ok(Stores::new(db, bus, &config.client))
    }
}

/// Publishes a `DbTime` event when dropped.
pub(crate) struct DbTimer<'a> {
    bus: &'a EventBus,
    store: &'static str,
    action: &'static str,
    started: Instant,
}

impl<'a> DbTimer<'a> {
    pub(crate) fn start(bus: &'a EventBus, store: &'static str, action: &'static str) -> Self {
        Self {
            bus,
            store,
            action,
            started: Instant::now(),
        }
    }
}

impl Drop for DbTimer<'_> {
    fn drop(&mut self) {
        self.bus.publish(AppEvent::DbTime {
            store: self.store,
            action: self.action,
            elapsed: self.started.elapsed(),
        });
    }
}
