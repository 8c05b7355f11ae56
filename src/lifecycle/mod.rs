//! Lifecycle management subsystem.
//!
//! # Data Flow
//! ```text
//! Startup (startup.rs):
//!     migrate → event bus → stores → services → secret → HTTP surface
//!     → metrics monitor → event hook → import → bind (start mode only)
//!
//! Shutdown (shutdown.rs):
//!     metrics stop → listener close → store destroy → database close
//!
//! Signals (signals.rs):
//!     SIGTERM/SIGINT → RunningInstance::stop
//! ```
//!
//! # State Machine
//! ```text
//! Unstarted → Migrating → Wiring → Listening | ReadyEmbedded → Stopping → Stopped
//! ```
//! `Migrating` is skipped when migrations are disabled.

pub mod instance;
pub mod shutdown;
pub mod signals;
pub mod startup;

pub use instance::RunningInstance;
pub use shutdown::{Shutdown, ShutdownError, ShutdownStep, ShutdownStepFailure};
pub use signals::{register_graceful_shutdown, register_shutdown_on, shutdown_signal};
pub use startup::{create, start, Orchestrator, StartupError, Wiring};

/// Where an instance is in its lifetime.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LifecycleState {
    Unstarted,
    Migrating,
    Wiring,
    Listening,
    ReadyEmbedded,
    Stopping,
    Stopped,
}

/// Operating mode of a launch.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Mode {
    /// Bind a listening socket.
    Start,
    /// Embedded: everything but the socket.
    Create,
}
