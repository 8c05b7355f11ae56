//! Feature toggle definitions.

use std::collections::BTreeMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::db::Database;
use crate::events::EventBus;
use crate::stores::{tables, DbTimer, StoreError};

const STORE: &str = "features";

fn default_project() -> String {
    "default".to_string()
}

/// An activation strategy attached to a toggle.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Strategy {
    pub name: String,
    #[serde(default)]
    pub parameters: BTreeMap<String, String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FeatureToggle {
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default = "default_project")]
    pub project: String,
    #[serde(default)]
    pub enabled: bool,
    #[serde(default)]
    pub stale: bool,
    #[serde(default)]
    pub archived: bool,
    #[serde(default)]
    pub strategies: Vec<Strategy>,
    #[serde(default)]
    pub created_at: Option<DateTime<Utc>>,
}

impl FeatureToggle {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            description: String::new(),
            project: default_project(),
            enabled: false,
            stale: false,
            archived: false,
            strategies: vec![Strategy {
                name: "default".to_string(),
                parameters: BTreeMap::new(),
            }],
            created_at: None,
        }
    }
}

pub struct FeatureToggleStore {
    db: Arc<Database>,
    bus: EventBus,
}

impl FeatureToggleStore {
    pub fn new(db: Arc<Database>, bus: EventBus) -> Self {
        Self { db, bus }
    }

    pub async fn get(&self, name: &str) -> Result<FeatureToggle, StoreError> {
        let _timer = DbTimer::start(&self.bus, STORE, "get");
        self.db
            .get_as(tables::FEATURES, name)
            .await?
            .ok_or_else(|| StoreError::NotFound {
                kind: "feature",
                key: name.to_string(),
            })
    }

    pub async fn exists(&self, name: &str) -> Result<bool, StoreError> {
        let _timer = DbTimer::start(&self.bus, STORE, "exists");
        Ok(self.db.get(tables::FEATURES, name).await?.is_some())
    }

    /// Toggles with the given archive state, ordered by name.
    pub async fn get_all(&self, archived: bool) -> Result<Vec<FeatureToggle>, StoreError> {
        let _timer = DbTimer::start(&self.bus, STORE, "get_all");
        let all: Vec<FeatureToggle> = self.db.scan_as(tables::FEATURES).await?;
        Ok(all.into_iter().filter(|f| f.archived == archived).collect())
    }

    /// Insert a new toggle, stamping its creation time.
    pub async fn create(&self, mut feature: FeatureToggle) -> Result<FeatureToggle, StoreError> {
        let _timer = DbTimer::start(&self.bus, STORE, "create");
        feature.created_at.get_or_insert_with(Utc::now);
        let value = serde_json::to_value(&feature).map_err(crate::db::DbError::from)?;
        if !self.db.insert_new(tables::FEATURES, &feature.name, value).await? {
            return Err(StoreError::AlreadyExists {
                kind: "feature",
                key: feature.name,
            });
        }
        Ok(feature)
    }

    /// Replace an existing toggle.
    pub async fn update(&self, feature: &FeatureToggle) -> Result<(), StoreError> {
        if !self.exists(&feature.name).await? {
            return Err(StoreError::NotFound {
                kind: "feature",
                key: feature.name.clone(),
            });
        }
        self.upsert(feature).await
    }

    /// Insert or replace a toggle.
    pub async fn upsert(&self, feature: &FeatureToggle) -> Result<(), StoreError> {
        let _timer = DbTimer::start(&self.bus, STORE, "upsert");
        Ok(self.db.put_as(tables::FEATURES, &feature.name, feature).await?)
    }

    pub async fn delete(&self, name: &str) -> Result<bool, StoreError> {
        let _timer = DbTimer::start(&self.bus, STORE, "delete");
        Ok(self.db.remove(tables::FEATURES, name).await?)
    }

    /// Active (non-archived) toggle count.
    pub async fn count(&self) -> Result<usize, StoreError> {
        Ok(self.get_all(false).await?.len())
    }

    /// Remove every toggle. Returns the number removed.
    pub async fn truncate(&self) -> Result<usize, StoreError> {
        let _timer = DbTimer::start(&self.bus, STORE, "truncate");
        Ok(self.db.truncate(tables::FEATURES).await?)
    }
}
