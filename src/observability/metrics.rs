//! Metrics collection and exposition.
//!
//! # Metrics
//! - `flagpole_feature_toggles` (gauge): active feature toggles
//! - `flagpole_client_instances` (gauge): known SDK instances
//! - `flagpole_db_pool_available` (gauge): free database connections
//! - `flagpole_uptime_seconds` (gauge): time since monitoring started
//! - `flagpole_version_info` (gauge): always 1, labelled with the version
//! - `flagpole_http_requests_total` (counter): requests by method, status
//! - `flagpole_http_request_duration_seconds` (histogram): latency by path
//! - `flagpole_db_query_duration_seconds` (histogram): store latency by action
//! - `flagpole_events_total` (counter): stored domain events by type
//!
//! # Design Decisions
//! - Gauges are sampled on a fixed interval, everything else is driven by
//!   the instance's event bus
//! - The Prometheus recorder is process-wide and installed at most once

use std::sync::{Arc, Mutex, OnceLock};
use std::time::Duration;

use metrics::{counter, gauge, histogram};
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};
use tokio::sync::broadcast::{error::RecvError, Receiver};
use tokio::task::JoinHandle;
use tokio::time::{self, Instant, MissedTickBehavior};

use crate::config::ResolvedConfig;
use crate::db::Database;
use crate::events::{AppEvent, EventBus};
use crate::stores::{ClientInstanceStore, FeatureToggleStore, Stores};

const LATENCY_BUCKETS: &[f64] = &[0.001, 0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0];

static PROMETHEUS: OnceLock<Option<PrometheusHandle>> = OnceLock::new();

/// Install the Prometheus recorder on first use and return its handle.
///
/// Returns `None` if another recorder already owns the process.
pub fn prometheus_handle() -> Option<PrometheusHandle> {
    PROMETHEUS
        .get_or_init(|| {
            match PrometheusBuilder::new()
                .set_buckets(LATENCY_BUCKETS)
                .and_then(|builder| builder.install_recorder())
            {
                Ok(handle) => Some(handle),
                Err(e) => {
                    tracing::warn!(error = %e, "Prometheus recorder unavailable");
                    None
                }
            }
        })
        .clone()
}

/// Background reporter of operational metrics.
pub trait Monitor: Send + Sync {
    /// Start reporting. A second call while running is ignored.
    fn start_monitoring(&self, config: &ResolvedConfig, stores: &Stores, version: &str, bus: &EventBus);

    /// Stop reporting without waiting for an in-flight sample.
    /// Stopping a monitor that is not running is a no-op.
    fn stop_monitoring(&self);
}

/// Production monitor feeding the `metrics` facade.
#[derive(Debug, Default)]
pub struct MetricsMonitor {
    task: Mutex<Option<JoinHandle<()>>>,
}

impl MetricsMonitor {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_running(&self) -> bool {
        self.task
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .as_ref()
            .is_some_and(|t| !t.is_finished())
    }
}

impl Monitor for MetricsMonitor {
    fn start_monitoring(&self, config: &ResolvedConfig, stores: &Stores, version: &str, bus: &EventBus) {
        let mut task = self.task.lock().unwrap_or_else(|e| e.into_inner());
        if task.is_some() {
            tracing::debug!("Metrics monitor already running");
            return;
        }
        if !config.observability.metrics_enabled {
            tracing::info!("Metrics disabled, monitor not started");
            return;
        }

        gauge!("flagpole_version_info", "version" => version.to_string()).set(1.0);

        let sources = GaugeSources {
            features: Arc::clone(&stores.features),
            instances: Arc::clone(&stores.client_instances),
            db: Arc::clone(&stores.db),
        };
        let period = Duration::from_secs(config.observability.monitor_interval_secs.max(1));
        *task = Some(tokio::spawn(report(sources, bus.subscribe(), period, prometheus_handle())));

        tracing::info!(interval_secs = period.as_secs(), "Metrics monitor started");
    }

    fn stop_monitoring(&self) {
        let task = self.task.lock().unwrap_or_else(|e| e.into_inner()).take();
        if let Some(task) = task {
            task.abort();
            tracing::info!("Metrics monitor stopped");
        }
    }
}

impl Drop for MetricsMonitor {
    fn drop(&mut self) {
        self.stop_monitoring();
    }
}

struct GaugeSources {
    features: Arc<FeatureToggleStore>,
    instances: Arc<ClientInstanceStore>,
    db: Arc<Database>,
}

impl GaugeSources {
    async fn sample(&self, started: Instant) {
        match self.features.count().await {
            Ok(n) => gauge!("flagpole_feature_toggles").set(n as f64),
            Err(e) => tracing::debug!(error = %e, "Failed to count feature toggles"),
        }
        match self.instances.count().await {
            Ok(n) => gauge!("flagpole_client_instances").set(n as f64),
            Err(e) => tracing::debug!(error = %e, "Failed to count client instances"),
        }
        gauge!("flagpole_db_pool_available").set(self.db.available_connections() as f64);
        gauge!("flagpole_uptime_seconds").set(started.elapsed().as_secs_f64());
    }
}

async fn report(
    sources: GaugeSources,
    mut events: Receiver<AppEvent>,
    period: Duration,
    prometheus: Option<PrometheusHandle>,
) {
    let started = Instant::now();
    let mut ticker = time::interval(period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
    let mut bus_open = true;

    loop {
        tokio::select! {
            _ = ticker.tick() => {
                sources.sample(started).await;
                if let Some(handle) = &prometheus {
                    handle.run_upkeep();
                }
            }
            received = events.recv(), if bus_open => match received {
                Ok(event) => record_event(&event),
                Err(RecvError::Lagged(skipped)) => {
                    tracing::warn!(skipped, "Metrics monitor lagging behind event bus");
                }
                Err(RecvError::Closed) => bus_open = false,
            },
        }
    }
}

/// Translate one bus notification into metric updates.
pub fn record_event(event: &AppEvent) {
    match event {
        AppEvent::RequestTime {
            method,
            path,
            status,
            elapsed,
        } => {
            counter!(
                "flagpole_http_requests_total",
                "method" => method.clone(),
                "status" => status.to_string()
            )
            .increment(1);
            histogram!(
                "flagpole_http_request_duration_seconds",
                "method" => method.clone(),
                "path" => path.clone()
            )
            .record(elapsed.as_secs_f64());
        }
        AppEvent::DbTime { store, action, elapsed } => {
            histogram!(
                "flagpole_db_query_duration_seconds",
                "store" => *store,
                "action" => *action
            )
            .record(elapsed.as_secs_f64());
        }
        AppEvent::Stored(stored) => {
            counter!("flagpole_events_total", "type" => stored.event_type.clone()).increment(1);
        }
    }
}
