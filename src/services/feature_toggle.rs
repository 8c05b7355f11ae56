//! Feature toggle management.

use std::sync::Arc;

use serde_json::json;

use crate::events::{types, NewEvent};
use crate::services::ServiceError;
use crate::stores::{EventStore, FeatureToggle, FeatureToggleStore};

fn validate_name(name: &str) -> Result<(), ServiceError> {
    let valid = !name.is_empty()
        && name.len() <= 100
        && name
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.' | '~'));
    if valid {
        Ok(())
    } else {
        Err(ServiceError::InvalidName(name.to_string()))
    }
}

pub struct FeatureToggleService {
    features: Arc<FeatureToggleStore>,
    events: Arc<EventStore>,
}

impl FeatureToggleService {
    pub fn new(features: Arc<FeatureToggleStore>, events: Arc<EventStore>) -> Self {
        Self { features, events }
    }

    pub async fn list(&self, archived: bool) -> Result<Vec<FeatureToggle>, ServiceError> {
        Ok(self.features.get_all(archived).await?)
    }

    pub async fn get(&self, name: &str) -> Result<FeatureToggle, ServiceError> {
        Ok(self.features.get(name).await?)
    }

    pub async fn create(&self, feature: FeatureToggle, user: &str) -> Result<FeatureToggle, ServiceError> {
        validate_name(&feature.name)?;
        let created = self.features.create(feature).await?;
        self.events
            .append(NewEvent::new(types::FEATURE_CREATED, user, json!(created)))
            .await?;
        Ok(created)
    }

    /// Replace a toggle's definition, keeping its creation time.
    pub async fn update(&self, mut feature: FeatureToggle, user: &str) -> Result<FeatureToggle, ServiceError> {
        let existing = self.features.get(&feature.name).await?;
        feature.created_at = existing.created_at;
        self.features.update(&feature).await?;
        self.events
            .append(NewEvent::new(types::FEATURE_UPDATED, user, json!(feature)))
            .await?;
        Ok(feature)
    }

    /// Flip the enabled flag.
    pub async fn toggle(&self, name: &str, user: &str) -> Result<FeatureToggle, ServiceError> {
        let mut feature = self.features.get(name).await?;
        feature.enabled = !feature.enabled;
        self.features.update(&feature).await?;
        self.events
            .append(NewEvent::new(
                types::FEATURE_TOGGLED,
                user,
                json!({ "name": feature.name, "enabled": feature.enabled }),
            ))
            .await?;
        Ok(feature)
    }

    pub async fn archive(&self, name: &str, user: &str) -> Result<(), ServiceError> {
        let mut feature = self.features.get(name).await?;
        feature.archived = true;
        feature.enabled = false;
        self.features.update(&feature).await?;
        self.events
            .append(NewEvent::new(types::FEATURE_ARCHIVED, user, json!({ "name": name })))
            .await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::EventBus;
    use crate::stores::test_support::migrated_db;

    async fn service() -> (FeatureToggleService, Arc<EventStore>) {
        let db = migrated_db().await;
        let bus = EventBus::new();
        let features = Arc::new(FeatureToggleStore::new(Arc::clone(&db), bus.clone()));
        let events = Arc::new(EventStore::new(db, bus));
        (FeatureToggleService::new(features, Arc::clone(&events)), events)
    }

    #[tokio::test]
    async fn lifecycle_of_a_toggle_is_audited() {
        let (service, events) = service().await;
        service.create(FeatureToggle::new("beta-ui"), "alice").await.unwrap();
        let toggled = service.toggle("beta-ui", "alice").await.unwrap();
        assert!(toggled.enabled);
        service.archive("beta-ui", "bob").await.unwrap();

        assert!(service.list(false).await.unwrap().is_empty());
        let archived = service.list(true).await.unwrap();
        assert!(!archived[0].enabled);

        let kinds: Vec<String> = events
            .list(10)
            .await
            .unwrap()
            .into_iter()
            .rev()
            .map(|e| e.event_type)
            .collect();
        assert_eq!(kinds, vec![types::FEATURE_CREATED, types::FEATURE_TOGGLED, types::FEATURE_ARCHIVED]);
    }

    #[tokio::test]
    async fn rejects_unsafe_names() {
        let (service, _) = service().await;
        for name in ["", "has space", "slash/name"] {
            let err = service.create(FeatureToggle::new(name), "alice").await.unwrap_err();
            assert!(matches!(err, ServiceError::InvalidName(_)));
        }
    }

    #[tokio::test]
    async fn update_keeps_creation_time() {
        let (service, _) = service().await;
        let created = service.create(FeatureToggle::new("x"), "alice").await.unwrap();

        let mut changed = FeatureToggle::new("x");
        changed.description = "now described".into();
        let updated = service.update(changed, "alice").await.unwrap();
        assert_eq!(updated.created_at, created.created_at);
        assert_eq!(service.get("x").await.unwrap().description, "now described");
    }
}
