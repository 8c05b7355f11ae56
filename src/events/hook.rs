//! External event hook registration.

use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;

use crate::events::Event;
use crate::stores::EventStore;

/// Callback invoked with every domain event after it is stored.
pub type EventHook = Arc<dyn Fn(&Event) + Send + Sync>;

/// Register `hook` against the event store.
///
/// A panicking hook is logged and isolated from the append that triggered it.
pub fn add_event_hook(hook: EventHook, store: &EventStore) {
    store.register_hook(Arc::new(move |event: &Event| {
        if catch_unwind(AssertUnwindSafe(|| hook(event))).is_err() {
            tracing::error!(
                event_id = event.id,
                event_type = %event.event_type,
                "Event hook panicked"
            );
        }
    }));
    tracing::info!("External event hook registered");
}
