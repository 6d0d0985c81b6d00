//! Lifecycle management subsystem.
//!
//! # Data Flow
//! ```text
//! Startup (startup.rs):
//!     Validate config → Resolve backend → Bind → Spawn reactor thread
//!
//! Signals (signals.rs):
//!     SIGTERM/SIGINT → caller triggers shutdown
//!
//! Shutdown (shutdown.rs):
//!     Flag set → Waker interrupts poll → Reactor exits → Sockets dropped
//! ```
//!
//! # Design Decisions
//! - Ordered startup: config first, then listener, then reactor
//! - Shutdown is immediate; open tunnels are closed, not drained

pub mod shutdown;
pub mod signals;
pub mod startup;

pub use shutdown::Shutdown;
pub use startup::{start, RunningProxy};
