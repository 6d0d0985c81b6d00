//! Non-blocking TCP listener.
//!
//! # Responsibilities
//! - Bind to the configured address
//! - Hand the reactor a socket ready for readiness registration
//!
//! # Design Decisions
//! - Connection limits are enforced by the reactor at accept time, since the
//!   reactor is the only owner of the registration table

use std::net::SocketAddr;

use mio::net::TcpListener;

use crate::config::ListenerConfig;

/// Error type for listener operations.
#[derive(Debug)]
pub enum ListenerError {
    /// Configured address does not parse.
    Address(String),
    /// Failed to bind to address.
    Bind(std::io::Error),
}

impl std::fmt::Display for ListenerError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ListenerError::Address(addr) => write!(f, "Invalid bind address: {}", addr),
            ListenerError::Bind(e) => write!(f, "Failed to bind: {}", e),
        }
    }
}

impl std::error::Error for ListenerError {}

/// Bind a non-blocking listener for the configured address.
pub fn bind(config: &ListenerConfig) -> Result<TcpListener, ListenerError> {
    let addr: SocketAddr = config
        .bind_address
        .parse()
        .map_err(|_| ListenerError::Address(config.bind_address.clone()))?;

    let listener = TcpListener::bind(addr).map_err(ListenerError::Bind)?;
    let local_addr = listener.local_addr().map_err(ListenerError::Bind)?;

    tracing::info!(
        address = %local_addr,
        max_connections = config.max_connections,
        "Listener bound"
    );

    Ok(listener)
}
