//! Flagpole feature-flag server library.
//!
//! # Architecture Overview
//!
//! ```text
//!   ┌──────────────────────────── lifecycle ─────────────────────────────┐
//!   │                                                                    │
//!   │  db::migrator ─▶ stores ─▶ services ─▶ http ─▶ observability       │
//!   │                    ▲          ▲          │          │              │
//!   │                    └── events (EventBus) ┴──────────┘              │
//!   │                                                                    │
//!   │  net (bounded listener) ◀── http::binder (start mode only)         │
//!   └────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! [`lifecycle::start`] brings an instance up listening on a socket,
//! [`lifecycle::create`] builds the same instance without one. Both return a
//! [`RunningInstance`] whose `stop` releases everything it holds.

pub mod config;
pub mod db;
pub mod events;
pub mod http;
pub mod lifecycle;
pub mod net;
pub mod observability;
pub mod services;
pub mod stores;

pub use config::{ResolvedConfig, ServerConfig, StartOptions};
pub use lifecycle::{create, start, LifecycleState, Orchestrator, RunningInstance, StartupError, Wiring};

/// Version reported by the server.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
