//! SDK registration and usage reporting.

use std::sync::Arc;

use chrono::Utc;
use dashmap::DashSet;
use serde::Deserialize;
use serde_json::json;

use crate::events::{types, NewEvent};
use crate::services::ServiceError;
use crate::stores::{ClientInstance, ClientInstanceStore, ClientMetricsBucket, ClientMetricsStore, EventStore};

/// Registration payload sent by an SDK on startup and periodically after.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ClientRegistration {
    pub app_name: String,
    pub instance_id: String,
    #[serde(default)]
    pub sdk_version: Option<String>,
    #[serde(default)]
    pub strategies: Vec<String>,
    #[serde(default)]
    pub interval: u64,
}

pub struct ClientInstanceService {
    instances: Arc<ClientInstanceStore>,
    metrics: Arc<ClientMetricsStore>,
    events: Arc<EventStore>,
    /// Applications seen by this process, to record each one once.
    known_apps: DashSet<String>,
}

impl ClientInstanceService {
    pub fn new(
        instances: Arc<ClientInstanceStore>,
        metrics: Arc<ClientMetricsStore>,
        events: Arc<EventStore>,
    ) -> Self {
        Self {
            instances,
            metrics,
            events,
            known_apps: DashSet::new(),
        }
    }

    pub async fn register_client(
        &self,
        registration: ClientRegistration,
        client_ip: Option<String>,
    ) -> Result<(), ServiceError> {
        let first_sighting = self.known_apps.insert(registration.app_name.clone());

        self.instances.insert(ClientInstance {
            app_name: registration.app_name.clone(),
            instance_id: registration.instance_id.clone(),
            sdk_version: registration.sdk_version,
            strategies: registration.strategies,
            interval_ms: registration.interval,
            client_ip,
            last_seen: Utc::now(),
        });

        if first_sighting {
            self.events
                .append(NewEvent::new(
                    types::CLIENT_REGISTERED,
                    registration.instance_id,
                    json!({ "appName": registration.app_name }),
                ))
                .await?;
        }
        Ok(())
    }

    pub async fn register_metrics(&self, bucket: ClientMetricsBucket) -> Result<(), ServiceError> {
        Ok(self.metrics.insert(bucket).await?)
    }

    pub async fn known_instances(&self) -> Result<Vec<ClientInstance>, ServiceError> {
        Ok(self.instances.get_all().await?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::EventBus;
    use crate::stores::test_support::migrated_db;
    use crate::stores::Teardown;
    use std::time::Duration;

    #[tokio::test]
    async fn registration_event_recorded_once_per_app() {
        let db = migrated_db().await;
        let bus = EventBus::new();
        let instances = ClientInstanceStore::new(Arc::clone(&db), bus.clone(), Duration::from_secs(3600));
        let metrics = ClientMetricsStore::new(
            Arc::clone(&db),
            bus.clone(),
            Duration::from_secs(3600),
            Duration::from_secs(3600),
        );
        let events = Arc::new(EventStore::new(db, bus));
        let service = ClientInstanceService::new(Arc::clone(&instances), Arc::clone(&metrics), Arc::clone(&events));

        for id in ["1", "2", "2"] {
            service
                .register_client(
                    ClientRegistration {
                        app_name: "web".into(),
                        instance_id: id.into(),
                        sdk_version: None,
                        strategies: vec![],
                        interval: 10_000,
                    },
                    None,
                )
                .await
                .unwrap();
        }

        assert_eq!(service.known_instances().await.unwrap().len(), 2);
        assert_eq!(events.list_by_type(types::CLIENT_REGISTERED).await.unwrap().len(), 1);

        instances.destroy().await.unwrap();
        metrics.destroy().await.unwrap();
    }
}
