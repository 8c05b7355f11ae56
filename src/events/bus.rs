//! Multi-producer, multi-consumer notification channel.

use std::time::Duration;

use tokio::sync::broadcast;

use crate::events::Event;

/// Notifications published on the bus.
#[derive(Debug, Clone)]
pub enum AppEvent {
    /// A store finished a database operation.
    DbTime {
        store: &'static str,
        action: &'static str,
        elapsed: Duration,
    },
    /// The HTTP surface finished a request.
    RequestTime {
        method: String,
        path: String,
        status: u16,
        elapsed: Duration,
    },
    /// A domain event was appended to the event store.
    Stored(Event),
}

/// Broadcast bus shared by stores, services and the HTTP surface.
///
/// Cloning yields another handle to the same channel.
#[derive(Debug, Clone)]
pub struct EventBus {
    tx: broadcast::Sender<AppEvent>,
}

impl EventBus {
    pub const DEFAULT_CAPACITY: usize = 1024;

    pub fn new() -> Self {
        Self::with_capacity(Self::DEFAULT_CAPACITY)
    }

    pub fn with_capacity(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity);
        Self { tx }
    }

    /// Publish an event. Without subscribers the event is dropped.
    pub fn publish(&self, event: AppEvent) {
        let _ = self.tx.send(event);
    }

    pub fn subscribe(&self) -> broadcast::Receiver<AppEvent> {
        self.tx.subscribe()
    }

    /// Number of live subscribers.
    pub fn receiver_count(&self) -> usize {
        self.tx.receiver_count()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}
