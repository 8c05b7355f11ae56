//! Observability subsystem.
//!
//! # Data Flow
//! ```text
//! All subsystems produce:
//!     → logging.rs (structured log events)
//!     → EventBus (db and request timings, stored events)
//!         → metrics.rs (Metrics Monitor → Prometheus recorder)
//!
//! Consumers:
//!     → stdout (pretty or JSON)
//!     → GET /internal-backstage/prometheus
//! ```

pub mod logging;
pub mod metrics;

pub use self::logging::init_tracing;
pub use self::metrics::{prometheus_handle, MetricsMonitor, Monitor};
