//! Network layer subsystem.
//!
//! # Data Flow
//! ```text
//! Incoming TCP connection
//!     → listener.rs (non-blocking bind, registered with the reactor)
//!     → connection.rs (drain reads, queued writes, connection ids)
//!     → Hand off to the tunnel state machine
//! ```
//!
//! # Design Decisions
//! - Every socket is non-blocking; the readiness poll is the only wait
//! - Pending output is queued per socket instead of spinning on writes

pub mod connection;
pub mod listener;

pub use connection::{drain_into, ConnectionId, DrainStop, Flush, WriteQueue};
pub use listener::{bind, ListenerError};
