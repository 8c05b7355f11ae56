//! Toggle usage reported by SDKs.
//!
//! Rows older than the retention window are swept by a background timer.

use std::collections::BTreeMap;
use std::sync::{Arc, Weak};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::db::Database;
use crate::events::EventBus;
use crate::stores::background::PeriodicTask;
use crate::stores::{tables, DbTimer, StoreError, Teardown};

const STORE: &str = "client_metrics";

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ToggleCount {
    pub yes: u64,
    pub no: u64,
}

/// One reporting window from one SDK instance.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ClientMetricsBucket {
    pub app_name: String,
    pub instance_id: String,
    pub start: DateTime<Utc>,
    pub stop: DateTime<Utc>,
    #[serde(default)]
    pub toggles: BTreeMap<String, ToggleCount>,
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct StoredBucket {
    received_at: DateTime<Utc>,
    #[serde(flatten)]
    bucket: ClientMetricsBucket,
}

/// Row keys start with the receive time so they sort chronologically.
fn row_key(received_at: DateTime<Utc>) -> String {
    format!(
        "{:020}-{}",
        received_at.timestamp_millis().max(0),
        uuid::Uuid::new_v4().simple()
    )
}

fn received_millis(key: &str) -> Option<i64> {
    key.split('-').next()?.parse().ok()
}

pub struct ClientMetricsStore {
    db: Arc<Database>,
    bus: EventBus,
    retention: Duration,
    sweeper: PeriodicTask,
}

impl ClientMetricsStore {
    /// Create the store and start its retention sweep.
    pub fn new(db: Arc<Database>, bus: EventBus, retention: Duration, cleanup_interval: Duration) -> Arc<Self> {
        Arc::new_cyclic(|weak: &Weak<Self>| {
            let weak = weak.clone();
            let sweeper = PeriodicTask::spawn("client-metrics-sweep", cleanup_interval, move || {
                let weak = weak.clone();
                async move {
                    let Some(store) = weak.upgrade() else {
                        return;
                    };
                    match store.clear_expired().await {
                        Ok(0) => {}
                        Ok(removed) => tracing::debug!(removed, "Swept expired client metrics"),
                        Err(e) => tracing::warn!(error = %e, "Failed to sweep client metrics"),
                    }
                }
            });

            Self {
                db,
                bus,
                retention,
                sweeper,
            }
        })
    }

    pub async fn insert(&self, bucket: ClientMetricsBucket) -> Result<(), StoreError> {
        let _timer = DbTimer::start(&self.bus, STORE, "insert");
        let received_at = Utc::now();
        let row = StoredBucket { received_at, bucket };
        Ok(self
            .db
            .put_as(tables::CLIENT_METRICS, &row_key(received_at), &row)
            .await?)
    }

    /// Buckets received at or after `since`, oldest first.
    pub async fn get_since(&self, since: DateTime<Utc>) -> Result<Vec<ClientMetricsBucket>, StoreError> {
        let _timer = DbTimer::start(&self.bus, STORE, "get_since");
        let rows: Vec<StoredBucket> = self.db.scan_as(tables::CLIENT_METRICS).await?;
        Ok(rows
            .into_iter()
            .filter(|row| row.received_at >= since)
            .map(|row| row.bucket)
            .collect())
    }

    /// Summed usage of one toggle across buckets received since `since`.
    pub async fn toggle_usage(&self, toggle: &str, since: DateTime<Utc>) -> Result<ToggleCount, StoreError> {
        let buckets = self.get_since(since).await?;
        Ok(buckets
            .iter()
            .filter_map(|b| b.toggles.get(toggle))
            .fold(ToggleCount::default(), |acc, c| ToggleCount {
                yes: acc.yes + c.yes,
                no: acc.no + c.no,
            }))
    }

    /// Delete rows older than the retention window.
    pub async fn clear_expired(&self) -> Result<usize, StoreError> {
        let _timer = DbTimer::start(&self.bus, STORE, "clear_expired");
        let retention = chrono::Duration::from_std(self.retention)
            .unwrap_or_else(|_| chrono::Duration::days(365 * 100));
        let cutoff = Utc::now()
            .checked_sub_signed(retention)
            .map(|t| t.timestamp_millis())
            .unwrap_or(i64::MIN);
        Ok(self
            .db
            .remove_where(tables::CLIENT_METRICS, |key, _| {
                received_millis(key).is_some_and(|millis| millis < cutoff)
            })
            .await?)
    }

    pub async fn count(&self) -> Result<usize, StoreError> {
        let _timer = DbTimer::start(&self.bus, STORE, "count");
        Ok(self.db.count(tables::CLIENT_METRICS).await?)
    }
}

#[async_trait]
impl Teardown for ClientMetricsStore {
    fn name(&self) -> &'static str {
        STORE
    }

    async fn destroy(&self) -> Result<(), StoreError> {
        if self.sweeper.stop().await {
            Ok(())
        } else {
            Err(StoreError::Background(STORE))
        }
    }
}
