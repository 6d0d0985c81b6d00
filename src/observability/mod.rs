//! Observability subsystem.
//!
//! # Data Flow
//! ```text
//! Reactor and lifecycle produce:
//!     → logging.rs (structured log events)
//!     → metrics.rs (counters, gauges)
//!
//! Consumers:
//!     → stdout (pretty or JSON lines)
//!     → Metrics endpoint (Prometheus scrape, optional)
//! ```
//!
//! # Design Decisions
//! - Structured logging (JSON) for machine parsing
//! - Every connection event carries its connection id
//! - Metrics are cheap (atomic increments)

pub mod logging;
pub mod metrics;
