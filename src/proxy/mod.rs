//! Intercepting proxy core.
//!
//! # Data Flow
//! ```text
//! Client socket (readable)
//!     → reactor.rs (drain into the session buffer)
//!     → tunnel.rs (parse, allow-list, decide a Step)
//!     → reactor.rs (write response / open backend / install relay)
//!     → relay.rs (byte pumps in both directions until either side closes)
//! ```
//!
//! # Design Decisions
//! - One thread, one readiness loop; no locks around connection state
//! - Negotiation is pure so it can be tested without sockets

pub mod reactor;
pub mod relay;
pub mod tunnel;

use std::net::SocketAddr;

use crate::config::ProxyConfig;
use crate::security::AccessPolicy;

pub use reactor::Reactor;
pub use relay::{Direction, PumpOutcome, RelayPump};
pub use tunnel::{RejectReason, Step, TunnelContext, TunnelSession, TunnelState};

/// Everything the reactor needs, resolved once at startup.
#[derive(Debug, Clone)]
pub struct TunnelSettings {
    pub policy: AccessPolicy,
    pub backend: SocketAddr,
    pub server_name: String,
    pub max_connections: usize,
    pub max_request_bytes: usize,
    pub read_chunk_bytes: usize,
    pub relay_buffer_bytes: usize,
    pub event_capacity: usize,
}

impl TunnelSettings {
    pub fn from_config(config: &ProxyConfig, backend: SocketAddr) -> Self {
        Self {
            policy: AccessPolicy::from_config(&config.access),
            backend,
            server_name: config.tunnel.server_name.clone(),
            max_connections: config.listener.max_connections,
            max_request_bytes: config.tunnel.max_request_bytes,
            read_chunk_bytes: config.tunnel.read_chunk_bytes,
            relay_buffer_bytes: config.tunnel.relay_buffer_bytes,
            event_capacity: config.tunnel.event_capacity,
        }
    }

    pub fn tunnel_context(&self) -> TunnelContext<'_> {
        TunnelContext {
            policy: &self.policy,
            server_name: &self.server_name,
            max_request_bytes: self.max_request_bytes,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn settings_follow_config() {
        let mut config = ProxyConfig::default();
        config.tunnel.relay_buffer_bytes = 4096;
        config.tunnel.read_chunk_bytes = 512;
        let backend: SocketAddr = "127.0.0.1:8000".parse().unwrap();

        let settings = TunnelSettings::from_config(&config, backend);
        assert_eq!(settings.backend, backend);
        assert_eq!(settings.relay_buffer_bytes, 4096);
        assert_eq!(settings.read_chunk_bytes, 512);
        assert!(settings.policy.is_allowed("game.granbluefantasy.jp"));
        assert_eq!(settings.tunnel_context().server_name, config.tunnel.server_name);
    }
}
