//! Per-instance event plumbing.
//!
//! # Data Flow
//! ```text
//! stores   → AppEvent::DbTime       ┐
//! http     → AppEvent::RequestTime  ├─▶ EventBus ─▶ metrics monitor
//! EventStore.append → AppEvent::Stored ┘
//!                   → registered EventHooks (synchronous)
//! ```
//!
//! # Design Decisions
//! - One bus per running instance, passed by handle; never global
//! - Publishing never blocks and never fails (lagging receivers drop)

pub mod bus;
pub mod hook;
pub mod types;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

pub use bus::{AppEvent, EventBus};
pub use hook::{add_event_hook, EventHook};

/// A persisted domain event.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Event {
    pub id: u64,
    #[serde(rename = "type")]
    pub event_type: String,
    pub created_by: String,
    pub data: serde_json::Value,
    pub created_at: DateTime<Utc>,
}

/// A domain event that has not been stored yet.
#[derive(Debug, Clone)]
pub struct NewEvent {
    pub event_type: &'static str,
    pub created_by: String,
    pub data: serde_json::Value,
}

impl NewEvent {
    pub fn new(event_type: &'static str, created_by: impl Into<String>, data: serde_json::Value) -> Self {
        Self {
            event_type,
            created_by: created_by.into(),
            data,
        }
    }
}
