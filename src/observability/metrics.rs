//! Metrics collection and exposition.
//!
//! # Responsibilities
//! - Name the proxy's counters and gauges in one place
//! - Optionally expose them on a Prometheus scrape endpoint
//!
//! # Metrics
//! - `proxy_connections_accepted_total` (counter)
//! - `proxy_connections_refused_total` (counter): over the connection limit
//! - `proxy_requests_total` (counter): by `outcome`
//! - `proxy_backend_failures_total` (counter)
//! - `proxy_tunnels_active` (gauge)
//! - `proxy_relay_bytes_total` (counter): by `direction`
//!
//! # Design Decisions
//! - Without an installed recorder every call is a no-op, so the reactor
//!   records unconditionally

use std::net::SocketAddr;

use metrics::{counter, gauge};
use metrics_exporter_prometheus::{BuildError, PrometheusBuilder};

use crate::proxy::relay::Direction;

/// Install the global recorder and start the scrape endpoint.
pub fn init_metrics(addr: SocketAddr) -> Result<(), BuildError> {
    PrometheusBuilder::new().with_http_listener(addr).install()?;
    tracing::info!(address = %addr, "Metrics endpoint listening");
    Ok(())
}

pub fn record_accepted() {
    counter!("proxy_connections_accepted_total").increment(1);
}

pub fn record_refused() {
    counter!("proxy_connections_refused_total").increment(1);
}

/// Count one judged request (`connect`, `redirect`, `forbidden`, ...).
pub fn record_request(outcome: &'static str) {
    counter!("proxy_requests_total", "outcome" => outcome).increment(1);
}

pub fn record_backend_failure() {
    counter!("proxy_backend_failures_total").increment(1);
}

pub fn tunnel_opened() {
    gauge!("proxy_tunnels_active").increment(1.0);
}

pub fn tunnel_closed() {
    gauge!("proxy_tunnels_active").decrement(1.0);
}

pub fn record_relay_bytes(direction: Direction, bytes: usize) {
    counter!("proxy_relay_bytes_total", "direction" => direction.as_str()).increment(bytes as u64);
}
