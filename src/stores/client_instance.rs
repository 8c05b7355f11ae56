//! Registered SDK instances.
//!
//! Registrations arrive on every SDK poll, so they are buffered in memory
//! and written to the database by a background flush timer.

use std::sync::{Arc, Weak};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde::{Deserialize, Serialize};

use crate::db::Database;
use crate::events::EventBus;
use crate::stores::background::PeriodicTask;
use crate::stores::{tables, DbTimer, StoreError, Teardown};

const STORE: &str = "client_instances";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ClientInstance {
    pub app_name: String,
    pub instance_id: String,
    #[serde(default)]
    pub sdk_version: Option<String>,
    #[serde(default)]
    pub strategies: Vec<String>,
    #[serde(default)]
    pub interval_ms: u64,
    #[serde(default)]
    pub client_ip: Option<String>,
    pub last_seen: DateTime<Utc>,
}

impl ClientInstance {
    fn key(&self) -> String {
        format!("{}:{}", self.app_name, self.instance_id)
    }
}

pub struct ClientInstanceStore {
    db: Arc<Database>,
    bus: EventBus,
    pending: DashMap<String, ClientInstance>,
    flusher: PeriodicTask,
}

impl ClientInstanceStore {
    /// Create the store and start its flush timer.
    pub fn new(db: Arc<Database>, bus: EventBus, flush_interval: Duration) -> Arc<Self> {
        Arc::new_cyclic(|weak: &Weak<Self>| {
            let weak = weak.clone();
            let flusher = PeriodicTask::spawn("client-instance-flush", flush_interval, move || {
                let weak = weak.clone();
                async move {
                    let Some(store) = weak.upgrade() else {
                        return;
                    };
                    if let Err(e) = store.flush().await {
                        tracing::warn!(error = %e, "Failed to flush client registrations");
                    }
                }
            });

            Self {
                db,
                bus,
                pending: DashMap::new(),
                flusher,
            }
        })
    }

    /// Buffer a registration; the latest one per instance wins.
    pub fn insert(&self, instance: ClientInstance) {
        self.pending.insert(instance.key(), instance);
    }

    /// Registrations not yet written to the database.
    pub fn pending_count(&self) -> usize {
        self.pending.len()
    }

    /// Write buffered registrations. Returns how many were written.
    pub async fn flush(&self) -> Result<usize, StoreError> {
        if self.pending.is_empty() {
            return Ok(0);
        }
        let _timer = DbTimer::start(&self.bus, STORE, "flush");
        let keys: Vec<String> = self.pending.iter().map(|e| e.key().clone()).collect();
        let mut written = 0;
        for key in keys {
            let Some((key, instance)) = self.pending.remove(&key) else {
                continue;
            };
            if let Err(e) = self.db.put_as(tables::CLIENT_INSTANCES, &key, &instance).await {
                // Keep it for the next flush unless a newer registration arrived.
                self.pending.entry(key).or_insert(instance);
                return Err(e.into());
            }
            written += 1;
        }
        tracing::debug!(written, "Flushed client registrations");
        Ok(written)
    }

    pub async fn get_all(&self) -> Result<Vec<ClientInstance>, StoreError> {
        self.flush().await?;
        let _timer = DbTimer::start(&self.bus, STORE, "get_all");
        Ok(self.db.scan_as(tables::CLIENT_INSTANCES).await?)
    }

    pub async fn count(&self) -> Result<usize, StoreError> {
        self.flush().await?;
        let _timer = DbTimer::start(&self.bus, STORE, "count");
        Ok(self.db.count(tables::CLIENT_INSTANCES).await?)
    }
}

#[async_trait]
impl Teardown for ClientInstanceStore {
    fn name(&self) -> &'static str {
        STORE
    }

    /// Stop the flush timer and write whatever is still buffered.
    async fn destroy(&self) -> Result<(), StoreError> {
        if !self.flusher.stop().await {
            return Err(StoreError::Background(STORE));
        }
        self.flush().await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::stores::test_support::migrated_db;

    fn instance(app: &str, id: &str) -> ClientInstance {
        ClientInstance {
            app_name: app.into(),
            instance_id: id.into(),
            sdk_version: Some("flagpole-client-rust:0.1.0".into()),
            strategies: vec!["default".into()],
            interval_ms: 15_000,
            client_ip: None,
            last_seen: Utc::now(),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn timer_flushes_buffered_registrations() {
        let db = migrated_db().await;
        let store = ClientInstanceStore::new(Arc::clone(&db), EventBus::new(), Duration::from_secs(5));
        store.insert(instance("web", "1"));
        store.insert(instance("web", "1"));
        store.insert(instance("api", "7"));
        assert_eq!(store.pending_count(), 2);

        tokio::time::sleep(Duration::from_secs(6)).await;
        assert_eq!(store.pending_count(), 0);
        assert_eq!(db.count(tables::CLIENT_INSTANCES).await.unwrap(), 2);

        store.destroy().await.unwrap();
    }

    #[tokio::test]
    async fn destroy_flushes_and_is_idempotent() {
        let db = migrated_db().await;
        let store = ClientInstanceStore::new(Arc::clone(&db), EventBus::new(), Duration::from_secs(3600));
        store.insert(instance("web", "1"));

        store.destroy().await.unwrap();
        assert_eq!(db.count(tables::CLIENT_INSTANCES).await.unwrap(), 1);
        store.destroy().await.unwrap();
    }

    #[tokio::test]
    async fn failed_flush_keeps_registration() {
        let db = migrated_db().await;
        let store = ClientInstanceStore::new(Arc::clone(&db), EventBus::new(), Duration::from_secs(3600));
        store.insert(instance("web", "1"));
        db.destroy().await.unwrap();

        assert!(store.flush().await.is_err());
        assert_eq!(store.pending_count(), 1);
        store.flusher.stop().await;
    }
}
