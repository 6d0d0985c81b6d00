//! Security subsystem.
//!
//! # Data Flow
//! ```text
//! Parsed request:
//!     → routing host (target authority or Host header)
//!     → access_control.rs (suffix allow-list)
//!     → Allowed: continue to CONNECT / redirect / forward
//!     → Forbidden / HostMissing: 403 / 400 and close
//! ```
//!
//! # Design Decisions
//! - Fail closed: an empty allow-list forbids every host
//! - No trust in client input: host comparison is literal

pub mod access_control;

pub use access_control::{AccessDecision, AccessPolicy};
