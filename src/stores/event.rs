//! Append-only domain event log.

use std::sync::{Arc, RwLock};

use chrono::Utc;
use tokio::sync::Mutex;

use crate::db::Database;
use crate::events::{AppEvent, Event, EventBus, NewEvent};
use crate::stores::{tables, DbTimer, StoreError};

const STORE: &str = "events";

type Listener = Arc<dyn Fn(&Event) + Send + Sync>;

pub struct EventStore {
    db: Arc<Database>,
    bus: EventBus,
    /// Last id handed out; loaded from the table on first append.
    last_id: Mutex<Option<u64>>,
    hooks: RwLock<Vec<Listener>>,
}

fn row_key(id: u64) -> String {
    format!("{id:020}")
}

impl EventStore {
    pub fn new(db: Arc<Database>, bus: EventBus) -> Self {
        Self {
            db,
            bus,
            last_id: Mutex::new(None),
            hooks: RwLock::new(Vec::new()),
        }
    }

    /// Call `listener` with every event appended from now on.
    pub fn register_hook(&self, listener: Listener) {
        self.hooks
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .push(listener);
    }

    /// Store an event, then notify hooks and the bus.
    pub async fn append(&self, new: NewEvent) -> Result<Event, StoreError> {
        let event = {
            let _timer = DbTimer::start(&self.bus, STORE, "append");
            let mut last_id = self.last_id.lock().await;
            let previous = match *last_id {
                Some(id) => id,
                None => self.max_stored_id().await?,
            };
            let event = Event {
                id: previous + 1,
                event_type: new.event_type.to_string(),
                created_by: new.created_by,
                data: new.data,
                created_at: Utc::now(),
            };
            self.db
                .put_as(tables::EVENTS, &row_key(event.id), &event)
                .await?;
            *last_id = Some(event.id);
            event
        };

        let hooks: Vec<Listener> = self
            .hooks
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .clone();
        for hook in hooks {
            hook(&event);
        }
        self.bus.publish(AppEvent::Stored(event.clone()));
        Ok(event)
    }

    async fn max_stored_id(&self) -> Result<u64, StoreError> {
        let rows = self.db.scan(tables::EVENTS).await?;
        Ok(rows
            .last()
            .and_then(|(key, _)| key.parse().ok())
            .unwrap_or(0))
    }

    /// The newest `limit` events, newest first.
    pub async fn list(&self, limit: usize) -> Result<Vec<Event>, StoreError> {
        let _timer = DbTimer::start(&self.bus, STORE, "list");
        let mut events: Vec<Event> = self.db.scan_as(tables::EVENTS).await?;
        events.reverse();
        events.truncate(limit);
        Ok(events)
    }

    /// Events of one type, oldest first.
    pub async fn list_by_type(&self, event_type: &str) -> Result<Vec<Event>, StoreError> {
        let _timer = DbTimer::start(&self.bus, STORE, "list_by_type");
        let events: Vec<Event> = self.db.scan_as(tables::EVENTS).await?;
        Ok(events
            .into_iter()
            .filter(|e| e.event_type == event_type)
            .collect())
    }

    pub async fn count(&self) -> Result<usize, StoreError> {
        let _timer = DbTimer::start(&self.bus, STORE, "count");
        Ok(self.db.count(tables::EVENTS).await?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::types;
    use crate::stores::test_support::migrated_db;
    use serde_json::json;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[tokio::test]
    async fn ids_are_sequential_and_listing_is_newest_first() {
        let store = EventStore::new(migrated_db().await, EventBus::new());
        for i in 0..3 {
            store
                .append(NewEvent::new(types::FEATURE_CREATED, "admin", json!({ "n": i })))
                .await
                .unwrap();
        }

        let events = store.list(2).await.unwrap();
        assert_eq!(events.iter().map(|e| e.id).collect::<Vec<_>>(), vec![3, 2]);
        assert_eq!(store.count().await.unwrap(), 3);
    }

    #[tokio::test]
    async fn ids_continue_after_reopen() {
        let db = migrated_db().await;
        let first = EventStore::new(Arc::clone(&db), EventBus::new());
        first
            .append(NewEvent::new(types::FEATURE_CREATED, "admin", json!({})))
            .await
            .unwrap();

        let second = EventStore::new(db, EventBus::new());
        let event = second
            .append(NewEvent::new(types::FEATURE_UPDATED, "admin", json!({})))
            .await
            .unwrap();
        assert_eq!(event.id, 2);
    }

    #[tokio::test]
    async fn hooks_and_bus_see_appended_events() {
        let bus = EventBus::new();
        let mut rx = bus.subscribe();
        let store = EventStore::new(migrated_db().await, bus);
        let seen = Arc::new(AtomicUsize::new(0));
        let s = Arc::clone(&seen);
        store.register_hook(Arc::new(move |_: &Event| {
            s.fetch_add(1, Ordering::SeqCst);
        }));

        store
            .append(NewEvent::new(types::FEATURE_TOGGLED, "admin", json!({})))
            .await
            .unwrap();

        assert_eq!(seen.load(Ordering::SeqCst), 1);
        loop {
            if let AppEvent::Stored(event) = rx.recv().await.unwrap() {
                assert_eq!(event.event_type, types::FEATURE_TOGGLED);
                break;
            }
        }
    }
}
