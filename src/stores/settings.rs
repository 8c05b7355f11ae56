//! Key/value server settings.

use std::sync::Arc;

use serde_json::Value;

use crate::db::Database;
use crate::events::EventBus;
use crate::stores::{tables, DbTimer, StoreError};

/// Setting holding the generated server secret.
pub const SECRET_KEY: &str = "flagpole.secret";

const STORE: &str = "settings";

pub struct SettingStore {
    db: Arc<Database>,
    bus: EventBus,
}

impl SettingStore {
    pub fn new(db: Arc<Database>, bus: EventBus) -> Self {
        Self { db, bus }
    }

    pub async fn get(&self, key: &str) -> Result<Option<Value>, StoreError> {
        let _timer = DbTimer::start(&self.bus, STORE, "get");
        Ok(self.db.get(tables::SETTINGS, key).await?)
    }

    /// A string setting. Non-string values read as absent.
    pub async fn get_string(&self, key: &str) -> Result<Option<String>, StoreError> {
        Ok(self
            .get(key)
            .await?
            .and_then(|v| v.as_str().map(str::to_owned)))
    }

    pub async fn insert(&self, key: &str, value: Value) -> Result<(), StoreError> {
        let _timer = DbTimer::start(&self.bus, STORE, "insert");
        Ok(self.db.put(tables::SETTINGS, key, value).await?)
    }

    pub async fn delete(&self, key: &str) -> Result<bool, StoreError> {
        let _timer = DbTimer::start(&self.bus, STORE, "delete");
        Ok(self.db.remove(tables::SETTINGS, key).await?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::stores::test_support::migrated_db;
    use serde_json::json;

    #[tokio::test]
    async fn string_settings() {
        let store = SettingStore::new(migrated_db().await, EventBus::new());

        assert!(store.get_string(SECRET_KEY).await.unwrap().is_some());

        store.insert("numeric", json!(7)).await.unwrap();
        assert_eq!(store.get_string("numeric").await.unwrap(), None);
        assert_eq!(store.get("numeric").await.unwrap(), Some(json!(7)));

        assert!(store.delete("numeric").await.unwrap());
        assert!(!store.delete("numeric").await.unwrap());
    }
}
