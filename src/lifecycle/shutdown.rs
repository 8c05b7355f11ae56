//! Shutdown coordination.
//!
//! Teardown runs in resource-ownership order: producers of new work (the
//! metrics monitor, then the listener) stop before the stores they write to,
//! and the database connection goes last. Every step is attempted even when an
//! earlier one fails; failures are collected and reported together.

use std::fmt;
use std::sync::Arc;

use thiserror::Error;
use tokio::sync::broadcast;

use crate::http::BoundServer;
use crate::observability::Monitor;
use crate::stores::{Stores, Teardown};

type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// Broadcast signal for long-running tasks.
pub struct Shutdown {
    tx: broadcast::Sender<()>,
}

impl Shutdown {
    pub fn new() -> Self {
        let (tx, _) = broadcast::channel(1);
        Self { tx }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<()> {
        self.tx.subscribe()
    }

    pub fn trigger(&self) {
        let _ = self.tx.send(());
    }

    /// Number of tasks still listening.
    pub fn receiver_count(&self) -> usize {
        self.tx.receiver_count()
    }
}

impl Default for Shutdown {
    fn default() -> Self {
        Self::new()
    }
}

/// Which part of teardown failed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ShutdownStep {
    ListenerClose,
    StoreDestroy(&'static str),
    DbDestroy,
}

impl fmt::Display for ShutdownStep {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ShutdownStep::ListenerClose => write!(f, "listener close"),
            ShutdownStep::StoreDestroy(name) => write!(f, "destroy of store '{name}'"),
            ShutdownStep::DbDestroy => write!(f, "database close"),
        }
    }
}

#[derive(Debug, Error)]
#[error("{step} failed: {cause}")]
pub struct ShutdownStepFailure {
    pub step: ShutdownStep,
    #[source]
    pub cause: BoxError,
}

/// Teardown finished, but not cleanly.
#[derive(Debug, Error)]
#[error("shutdown finished with {} failure(s){}", .failures.len(), describe(.failures))]
pub struct ShutdownError {
    pub failures: Vec<ShutdownStepFailure>,
}

fn describe(failures: &[ShutdownStepFailure]) -> String {
    failures.iter().map(|f| format!("; {f}")).collect()
}

/// Everything a running or half-started instance must release.
pub(crate) struct ShutdownPlan {
    pub(crate) monitor: Option<Arc<dyn Monitor>>,
    pub(crate) server: Option<Arc<dyn BoundServer>>,
    pub(crate) resources: Vec<Arc<dyn Teardown>>,
    pub(crate) connection: Arc<dyn Teardown>,
}

impl ShutdownPlan {
    /// A plan covering the store layer only.
    pub(crate) fn for_stores(stores: &Stores) -> Self {
        Self {
            monitor: None,
            server: None,
            resources: stores.resources.clone(),
            connection: Arc::clone(&stores.connection),
        }
    }

    pub(crate) fn with_monitor(mut self, monitor: Arc<dyn Monitor>) -> Self {
        self.monitor = Some(monitor);
        self
    }

    pub(crate) fn with_server(mut self, server: Arc<dyn BoundServer>) -> Self {
        self.server = Some(server);
        self
    }

    pub(crate) async fn run(self) -> Result<(), ShutdownError> {
        let mut failures = Vec::new();

        if let Some(monitor) = &self.monitor {
            monitor.stop_monitoring();
        }

        if let Some(server) = &self.server {
            if let Err(e) = server.close().await {
                tracing::error!(error = %e, "Failed to close listener");
                failures.push(ShutdownStepFailure {
                    step: ShutdownStep::ListenerClose,
                    cause: Box::new(e),
                });
            }
        }

        for resource in &self.resources {
            if let Err(e) = resource.destroy().await {
                tracing::error!(store = resource.name(), error = %e, "Failed to destroy store");
                failures.push(ShutdownStepFailure {
                    step: ShutdownStep::StoreDestroy(resource.name()),
                    cause: Box::new(e),
                });
            }
        }

        if let Err(e) = self.connection.destroy().await {
            tracing::error!(error = %e, "Failed to close database");
            failures.push(ShutdownStepFailure {
                step: ShutdownStep::DbDestroy,
                cause: Box::new(e),
            });
        }

        if failures.is_empty() {
            Ok(())
        } else {
            Err(ShutdownError { failures })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::stores::StoreError;
    use async_trait::async_trait;
    use std::sync::Mutex;

    struct Step {
        name: &'static str,
        fail: bool,
        log: Arc<Mutex<Vec<&'static str>>>,
    }

    #[async_trait]
    impl Teardown for Step {
        fn name(&self) -> &'static str {
            self.name
        }

        async fn destroy(&self) -> Result<(), StoreError> {
            self.log.lock().unwrap().push(self.name);
            if self.fail {
                Err(StoreError::Background(self.name))
            } else {
                Ok(())
            }
        }
    }

    fn step(name: &'static str, fail: bool, log: &Arc<Mutex<Vec<&'static str>>>) -> Arc<dyn Teardown> {
        Arc::new(Step {
            name,
            fail,
            log: Arc::clone(log),
        })
    }

    #[tokio::test]
    async fn failures_do_not_stop_later_steps() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let plan = ShutdownPlan {
            monitor: None,
            server: None,
            resources: vec![step("a", true, &log), step("b", false, &log)],
            connection: step("db", true, &log),
        };

        let err = plan.run().await.unwrap_err();
        assert_eq!(*log.lock().unwrap(), vec!["a", "b", "db"]);
        let steps: Vec<_> = err.failures.iter().map(|f| f.step.clone()).collect();
        assert_eq!(steps, vec![ShutdownStep::StoreDestroy("a"), ShutdownStep::DbDestroy]);
        assert!(err.to_string().contains("2 failure(s)"));
    }

    #[test]
    fn shutdown_signal_reaches_subscribers() {
        let shutdown = Shutdown::new();
        let mut rx = shutdown.subscribe();
        assert_eq!(shutdown.receiver_count(), 1);
        shutdown.trigger();
        assert!(rx.try_recv().is_ok());
    }
}
