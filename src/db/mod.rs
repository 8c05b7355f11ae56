//! Embedded database.
//!
//! # Data Flow
//! ```text
//! DatabaseConnector.connect(DbConfig)
//!     → Database (table → key → JSON value, pooled connections)
//!     → migrator.rs creates tables and records applied migrations
//!     → stores read/write through the pool
//!     → destroy(): drain pool, write snapshot, refuse further work
//! ```
//!
//! # Design Decisions
//! - Every operation holds a pool permit for its duration
//! - Tables only exist once a migration created them
//! - Snapshots are written atomically (temp file + rename)

pub mod migrator;

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;
use tokio::sync::{RwLock, Semaphore, SemaphorePermit};

use crate::config::DbConfig;

pub use migrator::{MigrationError, MigrationReport, Migrator, SchemaMigrator, MIGRATIONS};

/// Errors raised by database operations.
#[derive(Debug, Error)]
pub enum DbError {
    #[error("database connection pool is closed")]
    Closed,

    #[error("relation \"{0}\" does not exist")]
    MissingTable(String),

    #[error("snapshot I/O failed: {0}")]
    Io(#[from] std::io::Error),

    #[error("value encoding failed: {0}")]
    Codec(#[from] serde_json::Error),
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct Snapshot {
    migrations: Vec<String>,
    tables: BTreeMap<String, BTreeMap<String, Value>>,
}

/// Pooled handle to the embedded database.
#[derive(Debug)]
pub struct Database {
    path: Option<PathBuf>,
    data: RwLock<Snapshot>,
    pool: Semaphore,
    pool_size: usize,
    closed: AtomicBool,
    /// Closed, but the final snapshot has not been written yet.
    unsaved: AtomicBool,
}

impl Database {
    /// Open a database, loading the snapshot at `config.path` if it exists.
    pub async fn open(config: &DbConfig) -> Result<Arc<Self>, DbError> {
        let snapshot = match &config.path {
            Some(path) if tokio::fs::try_exists(path).await? => {
                let raw = tokio::fs::read(path).await?;
                let snapshot: Snapshot = serde_json::from_slice(&raw)?;
                tracing::debug!(
                    path = %path.display(),
                    tables = snapshot.tables.len(),
                    "Loaded database snapshot"
                );
                snapshot
            }
            _ => Snapshot::default(),
        };

        Ok(Arc::new(Self::with_snapshot(
            config.path.clone(),
            config.pool_size,
            snapshot,
        )))
    }

    /// Create an empty, memory-only database.
    pub fn in_memory(pool_size: usize) -> Arc<Self> {
        Arc::new(Self::with_snapshot(None, pool_size, Snapshot::default()))
    }

    fn with_snapshot(path: Option<PathBuf>, pool_size: usize, snapshot: Snapshot) -> Self {
        let pool_size = pool_size.max(1);
        Self {
            path,
            data: RwLock::new(snapshot),
            pool: Semaphore::new(pool_size),
            pool_size,
            closed: AtomicBool::new(false),
            unsaved: AtomicBool::new(false),
        }
    }

    async fn connection(&self) -> Result<SemaphorePermit<'_>, DbError> {
        if self.is_closed() {
            return Err(DbError::Closed);
        }
        self.pool.acquire().await.map_err(|_| DbError::Closed)
    }

    pub async fn get(&self, table: &str, key: &str) -> Result<Option<Value>, DbError> {
        let _conn = self.connection().await?;
        let data = self.data.read().await;
        let rows = data
            .tables
            .get(table)
            .ok_or_else(|| DbError::MissingTable(table.to_string()))?;
        Ok(rows.get(key).cloned())
    }

    pub async fn get_as<T: DeserializeOwned>(&self, table: &str, key: &str) -> Result<Option<T>, DbError> {
        match self.get(table, key).await? {
            Some(value) => Ok(Some(serde_json::from_value(value)?)),
            None => Ok(None),
        }
    }

    pub async fn put(&self, table: &str, key: &str, value: Value) -> Result<(), DbError> {
        let _conn = self.connection().await?;
        let mut data = self.data.write().await;
        let rows = data
            .tables
            .get_mut(table)
            .ok_or_else(|| DbError::MissingTable(table.to_string()))?;
        rows.insert(key.to_string(), value);
        Ok(())
    }

    pub async fn put_as<T: Serialize>(&self, table: &str, key: &str, value: &T) -> Result<(), DbError> {
        self.put(table, key, serde_json::to_value(value)?).await
    }

    /// Insert `value` only when `key` is absent. Returns whether it was inserted.
    pub async fn insert_new(&self, table: &str, key: &str, value: Value) -> Result<bool, DbError> {
        let _conn = self.connection().await?;
        let mut data = self.data.write().await;
        let rows = data
            .tables
            .get_mut(table)
            .ok_or_else(|| DbError::MissingTable(table.to_string()))?;
        if rows.contains_key(key) {
            return Ok(false);
        }
        rows.insert(key.to_string(), value);
        Ok(true)
    }

    pub async fn remove(&self, table: &str, key: &str) -> Result<bool, DbError> {
        let _conn = self.connection().await?;
        let mut data = self.data.write().await;
        let rows = data
            .tables
            .get_mut(table)
            .ok_or_else(|| DbError::MissingTable(table.to_string()))?;
        Ok(rows.remove(key).is_some())
    }

    /// Remove every row for which `predicate` holds. Returns the number removed.
    pub async fn remove_where<F>(&self, table: &str, mut predicate: F) -> Result<usize, DbError>
    where
        F: FnMut(&str, &Value) -> bool,
    {
        let _conn = self.connection().await?;
        let mut data = self.data.write().await;
        let rows = data
            .tables
            .get_mut(table)
            .ok_or_else(|| DbError::MissingTable(table.to_string()))?;
        let before = rows.len();
        rows.retain(|key, value| !predicate(key, value));
        Ok(before - rows.len())
    }

    /// All rows of a table, ordered by key.
    pub async fn scan(&self, table: &str) -> Result<Vec<(String, Value)>, DbError> {
        let _conn = self.connection().await?;
        let data = self.data.read().await;
        let rows = data
            .tables
            .get(table)
            .ok_or_else(|| DbError::MissingTable(table.to_string()))?;
        Ok(rows.iter().map(|(k, v)| (k.clone(), v.clone())).collect())
    }

    pub async fn scan_as<T: DeserializeOwned>(&self, table: &str) -> Result<Vec<T>, DbError> {
        self.scan(table)
            .await?
            .into_iter()
            .map(|(_, value)| serde_json::from_value(value).map_err(DbError::from))
            .collect()
    }

    pub async fn count(&self, table: &str) -> Result<usize, DbError> {
        let _conn = self.connection().await?;
        let data = self.data.read().await;
        data.tables
            .get(table)
            .map(BTreeMap::len)
            .ok_or_else(|| DbError::MissingTable(table.to_string()))
    }

    /// Delete every row of a table. Returns the number removed.
    pub async fn truncate(&self, table: &str) -> Result<usize, DbError> {
        self.remove_where(table, |_, _| true).await
    }

    /// Create a table. Returns `false` when it already existed.
    pub async fn create_table(&self, table: &str) -> Result<bool, DbError> {
        let _conn = self.connection().await?;
        let mut data = self.data.write().await;
        if data.tables.contains_key(table) {
            return Ok(false);
        }
        data.tables.insert(table.to_string(), BTreeMap::new());
        Ok(true)
    }

    pub async fn has_table(&self, table: &str) -> Result<bool, DbError> {
        let _conn = self.connection().await?;
        Ok(self.data.read().await.tables.contains_key(table))
    }

    pub async fn applied_migrations(&self) -> Result<Vec<String>, DbError> {
        let _conn = self.connection().await?;
        Ok(self.data.read().await.migrations.clone())
    }

    pub async fn record_migration(&self, name: &str) -> Result<(), DbError> {
        let _conn = self.connection().await?;
        self.data.write().await.migrations.push(name.to_string());
        Ok(())
    }

    /// Write the snapshot to disk. Memory-only databases do nothing.
    pub async fn flush(&self) -> Result<(), DbError> {
        let Some(path) = &self.path else {
            return Ok(());
        };
        let encoded = {
            let data = self.data.read().await;
            serde_json::to_vec_pretty(&*data)?
        };
        write_atomically(path, &encoded).await?;
        tracing::debug!(path = %path.display(), bytes = encoded.len(), "Database snapshot written");
        Ok(())
    }

    /// Close the pool after in-flight operations finish, then persist.
    ///
    /// Once the snapshot is written further calls are no-ops. If writing it
    /// failed, the next call tries again.
    pub async fn destroy(&self) -> Result<(), DbError> {
        if !self.closed.swap(true, Ordering::SeqCst) {
            // Waiting for every permit drains in-flight operations.
            if let Ok(all) = self.pool.acquire_many(self.pool_size as u32).await {
                all.forget();
            }
            self.pool.close();
            self.unsaved.store(true, Ordering::SeqCst);
            tracing::info!("Database connection pool closed");
        }

        if self.unsaved.load(Ordering::SeqCst) {
            self.flush().await?;
            self.unsaved.store(false, Ordering::SeqCst);
        }
        Ok(())
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    /// Connections currently free in the pool.
    pub fn available_connections(&self) -> usize {
        if self.is_closed() {
            0
        } else {
            self.pool.available_permits()
        }
    }

    pub fn pool_size(&self) -> usize {
        self.pool_size
    }

    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }
}

async fn write_atomically(path: &Path, bytes: &[u8]) -> std::io::Result<()> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        tokio::fs::create_dir_all(parent).await?;
    }
    let mut tmp = path.as_os_str().to_owned();
    tmp.push(".tmp");
    let tmp = PathBuf::from(tmp);
    tokio::fs::write(&tmp, bytes).await?;
    tokio::fs::rename(&tmp, path).await
}

/// Hands out database handles for a configuration.
///
/// Snapshot-backed configs get a fresh handle on every call. Memory-only
/// configs share one live handle so that migrations and stores see the same
/// tables; once that handle is destroyed the next call starts a new one.
#[derive(Debug, Default)]
pub struct DatabaseConnector {
    memory: Mutex<Option<Arc<Database>>>,
}

impl DatabaseConnector {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn connect(&self, config: &DbConfig) -> Result<Arc<Database>, DbError> {
        if config.path.is_some() {
            return Database::open(config).await;
        }
        let mut memory = self.memory.lock().unwrap_or_else(|e| e.into_inner());
        match memory.as_ref() {
            Some(db) if !db.is_closed() => Ok(Arc::clone(db)),
            _ => {
                let db = Database::in_memory(config.pool_size);
                *memory = Some(Arc::clone(&db));
                Ok(db)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn operations_require_existing_table() {
        let db = Database::in_memory(2);
        let err = db.get("features", "a").await.unwrap_err();
        assert!(matches!(err, DbError::MissingTable(ref t) if t == "features"));

        assert!(db.create_table("features").await.unwrap());
        assert!(!db.create_table("features").await.unwrap());
        db.put("features", "a", json!({"enabled": true})).await.unwrap();
        assert_eq!(db.get("features", "a").await.unwrap(), Some(json!({"enabled": true})));
        assert_eq!(db.count("features").await.unwrap(), 1);
    }

    #[tokio::test]
    async fn insert_new_and_remove_where() {
        let db = Database::in_memory(2);
        db.create_table("t").await.unwrap();
        assert!(db.insert_new("t", "k", json!(1)).await.unwrap());
        assert!(!db.insert_new("t", "k", json!(2)).await.unwrap());
        db.put("t", "j", json!(5)).await.unwrap();

        let removed = db
            .remove_where("t", |_, v| v.as_i64().unwrap_or_default() > 2)
            .await
            .unwrap();
        assert_eq!(removed, 1);
        assert_eq!(db.scan("t").await.unwrap(), vec![("k".to_string(), json!(1))]);
    }

    #[tokio::test]
    async fn destroy_closes_pool_and_is_idempotent() {
        let db = Database::in_memory(3);
        db.create_table("t").await.unwrap();
        assert_eq!(db.available_connections(), 3);

        db.destroy().await.unwrap();
        db.destroy().await.unwrap();

        assert!(db.is_closed());
        assert_eq!(db.available_connections(), 0);
        assert!(matches!(db.get("t", "x").await, Err(DbError::Closed)));
    }

    #[tokio::test]
    async fn snapshot_survives_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let config = DbConfig {
            path: Some(dir.path().join("nested").join("db.json")),
            ..DbConfig::default()
        };

        let db = Database::open(&config).await.unwrap();
        db.create_table("settings").await.unwrap();
        db.put("settings", "greeting", json!("hello")).await.unwrap();
        db.record_migration("001").await.unwrap();
        db.destroy().await.unwrap();

        let reopened = Database::open(&config).await.unwrap();
        assert_eq!(
            reopened.get("settings", "greeting").await.unwrap(),
            Some(json!("hello"))
        );
        assert_eq!(reopened.applied_migrations().await.unwrap(), vec!["001"]);
    }

    #[tokio::test]
    async fn failed_final_snapshot_is_retried_by_next_destroy() {
        let dir = tempfile::tempdir().unwrap();
        let blocked = dir.path().join("nested");
        let config = DbConfig {
            path: Some(blocked.join("db.json")),
            ..DbConfig::default()
        };

        let db = Database::open(&config).await.unwrap();
        db.create_table("settings").await.unwrap();
        db.put("settings", "greeting", json!("hello")).await.unwrap();

        // A file where the snapshot directory should be makes the write fail.
        std::fs::write(&blocked, b"").unwrap();
        assert!(matches!(db.destroy().await, Err(DbError::Io(_))));
        assert!(db.is_closed());
        assert!(db.destroy().await.is_err());

        std::fs::remove_file(&blocked).unwrap();
        db.destroy().await.unwrap();
        db.destroy().await.unwrap();

        let reopened = Database::open(&config).await.unwrap();
        assert_eq!(
            reopened.get("settings", "greeting").await.unwrap(),
            Some(json!("hello"))
        );
    }

    #[tokio::test]
    async fn connector_shares_memory_database_until_destroyed() {
        let connector = DatabaseConnector::new();
        let config = DbConfig::default();

        let a = connector.connect(&config).await.unwrap();
        let b = connector.connect(&config).await.unwrap();
        assert!(Arc::ptr_eq(&a, &b));

        a.destroy().await.unwrap();
        let c = connector.connect(&config).await.unwrap();
        assert!(!Arc::ptr_eq(&a, &c));
        assert!(!c.is_closed());
    }
}
