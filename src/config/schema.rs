//! Configuration schema definitions.
//!
//! This module defines the complete configuration structure for the proxy.
//! All types derive Serde traits for deserialization from config files.

use serde::{Deserialize, Serialize};

/// Root configuration for the proxy.
#[derive(Debug, Clone, Deserialize, Serialize, Default, PartialEq)]
#[serde(default)]
pub struct ProxyConfig {
    /// Listener configuration (bind address, connection limit).
    pub listener: ListenerConfig,

    /// The single fixed upstream every tunnel ends at.
    pub backend: BackendConfig,

    /// Host allow-list.
    pub access: AccessConfig,

    /// Tunnel negotiation and relay tuning.
    pub tunnel: TunnelConfig,

    /// Observability settings.
    pub observability: ObservabilityConfig,
}

/// Listener configuration.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
#[serde(default)]
pub struct ListenerConfig {
    /// Bind address (e.g., "127.0.0.1:8088").
    pub bind_address: String,

    /// Maximum concurrent client connections.
    pub max_connections: usize,
}

impl Default for ListenerConfig {
    fn default() -> Self {
        Self {
            bind_address: "127.0.0.1:8088".to_string(),
            max_connections: 10_000,
        }
    }
}

/// Backend configuration.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
#[serde(default)]
pub struct BackendConfig {
    /// Backend address (e.g., "127.0.0.1:8000"); resolved once at startup.
    pub address: String,
}

impl Default for BackendConfig {
    fn default() -> Self {
        Self {
            address: "127.0.0.1:8000".to_string(),
        }
    }
}

/// Allow-list configuration.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
#[serde(default)]
pub struct AccessConfig {
    /// Host suffixes permitted as tunnel/forward targets.
    pub allowed_suffixes: Vec<String>,
}

impl Default for AccessConfig {
    fn default() -> Self {
        Self {
            allowed_suffixes: vec![".granbluefantasy.jp".to_string(), ".mobage.jp".to_string()],
        }
    }
}

/// Tunnel tuning.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
#[serde(default)]
pub struct TunnelConfig {
    /// Value of the `Server` header on proxy-generated responses.
    pub server_name: String,

    /// Largest request head buffered while negotiating.
    pub max_request_bytes: usize,

    /// Size of a single socket read.
    pub read_chunk_bytes: usize,

    /// Pending bytes a relay destination may hold before its source pauses.
    pub relay_buffer_bytes: usize,

    /// Readiness events fetched per poll.
    pub event_capacity: usize,
}

impl Default for TunnelConfig {
    fn default() -> Self {
        Self {
            server_name: default_server_name(),
            max_request_bytes: 64 * 1024,
            read_chunk_bytes: 16 * 1024,
            relay_buffer_bytes: 256 * 1024,
            event_capacity: 1024,
        }
    }
}

pub fn default_server_name() -> String {
    concat!("gbf-proxy/", env!("CARGO_PKG_VERSION")).to_string()
}

/// Observability configuration.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
#[serde(default)]
pub struct ObservabilityConfig {
    /// Log level (trace, debug, info, warn, error).
    pub log_level: String,

    /// Log output format: "pretty" or "json".
    pub log_format: String,

    /// Enable metrics endpoint.
    pub metrics_enabled: bool,

    /// Metrics endpoint bind address.
    pub metrics_address: String,
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            log_format: "pretty".to_string(),
            metrics_enabled: false,
            metrics_address: "127.0.0.1:9090".to_string(),
        }
    }
}
