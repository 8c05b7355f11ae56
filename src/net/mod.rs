//! Network layer subsystem.
//!
//! # Data Flow
//! ```text
//! Incoming TCP connection
//!     → listener.rs (accept, connection limits)
//!     → connection.rs (id, request activity for keep-alive expiry)
//!     → Hand off to the HTTP surface
//! ```
//!
//! # Design Decisions
//! - Bounded accept prevents resource exhaustion
//! - Each connection is tracked so closing the server can drain it

pub mod connection;
pub mod listener;

pub use connection::{Activity, ConnectionId};
pub use listener::{ConnectionPermit, Listener, ListenerError};
