//! gbf-proxy library
//!
//! Intercepting CONNECT/redirect proxy restricted to allow-listed hosts.

// Core subsystems
pub mod config;
pub mod http;
pub mod net;
pub mod proxy;

// Cross-cutting concerns
pub mod error;
pub mod lifecycle;
pub mod observability;
pub mod security;

pub use config::schema::ProxyConfig;
pub use error::{DispatchError, ProxyError};
pub use lifecycle::{start, RunningProxy, Shutdown};
pub use security::AccessPolicy;
