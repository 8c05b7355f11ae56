//! HTTP surface.
//!
//! # Data Flow
//! ```text
//! TCP connection
//!     → binder.rs (accept, header/keep-alive timeouts, drain on close)
//!     → server.rs (request id, trace, timeout, body limit, timing)
//!     → auth.rs (admin routes only)
//!     → handlers.rs → services
//! ```
//!
//! # Design Decisions
//! - The application is built in both operating modes; only `start` binds it
//! - Handlers never touch the database directly, except for health and the
//!   event log

pub mod auth;
pub mod binder;
pub mod error;
pub mod handlers;
pub mod middleware;
pub mod server;

pub use binder::{BindError, Binder, BoundServer, CloseError, TcpBinder, TcpServer};
pub use error::ApiError;
pub use server::{build_app, AppState};
