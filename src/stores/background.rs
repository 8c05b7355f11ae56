//! Periodic background work owned by a store.

use std::future::Future;
use std::sync::Mutex;
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio::time::{self, MissedTickBehavior};

use crate::lifecycle::Shutdown;

/// Shortest period a task will tick at.
const MIN_PERIOD: Duration = Duration::from_millis(1);

/// A loop that runs `tick` every period until stopped.
pub struct PeriodicTask {
    name: &'static str,
    shutdown: Shutdown,
    handle: Mutex<Option<JoinHandle<()>>>,
}

impl PeriodicTask {
    /// Spawn the loop on the current runtime. The first tick fires one
    /// period after spawning. Periods shorter than a millisecond are raised
    /// to one.
    pub fn spawn<F, Fut>(name: &'static str, period: Duration, mut tick: F) -> Self
    where
        F: FnMut() -> Fut + Send + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let period = period.max(MIN_PERIOD);
        let shutdown = Shutdown::new();
        let mut stop = shutdown.subscribe();

        let handle = tokio::spawn(async move {
            let mut ticker = time::interval_at(time::Instant::now() + period, period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

            loop {
                tokio::select! {
                    _ = ticker.tick() => tick().await,
                    _ = stop.recv() => {
                        tracing::debug!(task = name, "Background task received shutdown signal");
                        break;
                    }
                }
            }
        });

        Self {
            name,
            shutdown,
            handle: Mutex::new(Some(handle)),
        }
    }

    /// Signal the loop and wait for it to exit. A tick already running is
    /// allowed to finish. Returns `false` if the task had panicked.
    pub async fn stop(&self) -> bool {
        let handle = self
            .handle
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .take();
        let Some(handle) = handle else {
            return true;
        };

        self.shutdown.trigger();
        match handle.await {
            Ok(()) => true,
            Err(e) => {
                tracing::error!(task = self.name, error = %e, "Background task failed");
                false
            }
        }
    }

    pub fn is_running(&self) -> bool {
        self.handle
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .as_ref()
            .is_some_and(|h| !h.is_finished())
    }
}
