//! Recording doubles and fixtures shared by the integration tests.

#![allow(dead_code)]

use std::io::Write;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use axum::Router;

use flagpole::config::{ListenerConfig, ResolvedConfig, ServerConfig};
use flagpole::db::migrator::{MigrationError, MigrationReport, Migrator, SchemaMigrator};
use flagpole::db::{DatabaseConnector, DbError};
use flagpole::events::EventBus;
use flagpole::http::{BindError, Binder, BoundServer, CloseError, TcpBinder};
use flagpole::net::ListenerError;
use flagpole::observability::Monitor;
use flagpole::stores::{DefaultStoreFactory, StoreError, StoreFactory, Stores, Teardown};
use flagpole::Wiring;

/// Ordered record of collaborator calls.
#[derive(Clone, Default)]
pub struct CallLog(Arc<Mutex<Vec<String>>>);

impl CallLog {
    pub fn record(&self, call: impl Into<String>) {
        self.0.lock().unwrap().push(call.into());
    }

    pub fn calls(&self) -> Vec<String> {
        self.0.lock().unwrap().clone()
    }

    pub fn count(&self, call: &str) -> usize {
        self.calls().iter().filter(|c| *c == call).count()
    }
}

pub struct RecordingMigrator {
    inner: SchemaMigrator,
    log: CallLog,
    fail: bool,
}

#[async_trait]
impl Migrator for RecordingMigrator {
    async fn migrate(&self, config: &ServerConfig) -> Result<MigrationReport, MigrationError> {
        self.log.record("migrate");
        if self.fail {
            return Err(MigrationError::Connect(DbError::Closed));
        }
        self.inner.migrate(config).await
    }
}

/// Wraps every teardown handle of the real store layer.
pub struct RecordingStoreFactory {
    inner: DefaultStoreFactory,
    log: CallLog,
    fail: bool,
}

struct RecordingTeardown {
    inner: Arc<dyn Teardown>,
    call: String,
    log: CallLog,
}

#[async_trait]
impl Teardown for RecordingTeardown {
    fn name(&self) -> &'static str {
        self.inner.name()
    }

    async fn destroy(&self) -> Result<(), StoreError> {
        self.log.record(self.call.clone());
        self.inner.destroy().await
    }
}

#[async_trait]
impl StoreFactory for RecordingStoreFactory {
    async fn create_stores(&self, config: &ServerConfig, bus: &EventBus) -> Result<Stores, StoreError> {
        self.log.record("stores.create");
        if self.fail {
            return Err(StoreError::Db(DbError::Closed));
        }
        let mut stores = self.inner.create_stores(config, bus).await?;
        stores.resources = stores
            .resources
            .drain(..)
            .map(|inner| {
                Arc::new(RecordingTeardown {
                    inner,
                    call: "store.destroy".into(),
                    log: self.log.clone(),
                }) as Arc<dyn Teardown>
            })
            .collect();
        stores.connection = Arc::new(RecordingTeardown {
            inner: Arc::clone(&stores.connection),
            call: "db.destroy".into(),
            log: self.log.clone(),
        });
        Ok(stores)
    }
}

#[derive(Default)]
pub struct RecordingMonitor {
    log: CallLog,
    pub starts: AtomicUsize,
}

impl Monitor for RecordingMonitor {
    fn start_monitoring(&self, _config: &ResolvedConfig, _stores: &Stores, _version: &str, _bus: &EventBus) {
        self.starts.fetch_add(1, Ordering::SeqCst);
        self.log.record("metrics.start");
    }

    fn stop_monitoring(&self) {
        self.log.record("metrics.stop");
    }
}

pub struct RecordingBinder {
    log: CallLog,
    fail: bool,
    fail_close: bool,
}

struct RecordingServer {
    inner: Arc<dyn BoundServer>,
    log: CallLog,
    fail_close: bool,
}

#[async_trait]
impl BoundServer for RecordingServer {
    fn local_addr(&self) -> SocketAddr {
        self.inner.local_addr()
    }

    async fn close(&self) -> Result<(), CloseError> {
        self.log.record("listener.close");
        self.inner.close().await?;
        if self.fail_close {
            return Err(CloseError::Connections { failed: 1 });
        }
        Ok(())
    }
}

#[async_trait]
impl Binder for RecordingBinder {
    async fn listen(&self, app: Router, config: &ListenerConfig) -> Result<Arc<dyn BoundServer>, BindError> {
        self.log.record("listen");
        if self.fail {
            return Err(BindError {
                address: config.bind_address.clone(),
                source: ListenerError::Bind(std::io::Error::new(
                    std::io::ErrorKind::AddrInUse,
                    "address in use",
                )),
            });
        }
        let inner = TcpBinder.listen(app, config).await?;
        Ok(Arc::new(RecordingServer {
            inner,
            log: self.log.clone(),
            fail_close: self.fail_close,
        }))
    }
}

/// Which collaborators should fail.
#[derive(Debug, Clone, Copy, Default)]
pub struct Failures {
    pub migration: bool,
    pub stores: bool,
    pub bind: bool,
    pub close: bool,
}

/// Production collaborators wrapped in recorders sharing one log.
pub struct TestWiring {
    pub log: CallLog,
    pub monitor: Arc<RecordingMonitor>,
    pub wiring: Wiring,
}

impl TestWiring {
    pub fn new() -> Self {
        Self::failing(Failures::default())
    }

    pub fn failing(failures: Failures) -> Self {
        let log = CallLog::default();
        let connector = Arc::new(DatabaseConnector::new());
        let monitor = Arc::new(RecordingMonitor {
            log: log.clone(),
            starts: AtomicUsize::new(0),
        });
        let wiring = Wiring {
            migrator: Arc::new(RecordingMigrator {
                inner: SchemaMigrator::new(Arc::clone(&connector)),
                log: log.clone(),
                fail: failures.migration,
            }),
            store_factory: Arc::new(RecordingStoreFactory {
                inner: DefaultStoreFactory::new(connector),
                log: log.clone(),
                fail: failures.stores,
            }),
            monitor: Arc::clone(&monitor) as Arc<dyn Monitor>,
            binder: Arc::new(RecordingBinder {
                log: log.clone(),
                fail: failures.bind,
                fail_close: failures.close,
            }),
        };
        Self { log, monitor, wiring }
    }

    pub fn metrics_starts(&self) -> usize {
        self.monitor.starts.load(Ordering::SeqCst)
    }
}

/// Loopback listener on an ephemeral port, memory-only database.
pub fn test_config() -> ServerConfig {
    let mut config = ServerConfig::default();
    config.listener.bind_address = "127.0.0.1:0".into();
    config.observability.metrics_enabled = false;
    config
}

/// A state file with the given feature names.
pub fn state_fixture(names: &[&str]) -> tempfile::NamedTempFile {
    let features: Vec<_> = names
        .iter()
        .map(|name| serde_json::json!({ "name": name, "enabled": true }))
        .collect();
    let mut file = tempfile::NamedTempFile::new().unwrap();
    file.write_all(
        serde_json::json!({ "version": 1, "features": features })
            .to_string()
            .as_bytes(),
    )
    .unwrap();
    file
}
