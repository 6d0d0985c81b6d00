//! Crate-level error types.

use std::io;
use std::net::SocketAddr;

use crate::config::ConfigError;
use crate::net::ListenerError;

/// Fatal errors: the proxy cannot start or the reactor died.
#[derive(Debug, thiserror::Error)]
pub enum ProxyError {
    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("listener error: {0}")]
    Listener(#[from] ListenerError),

    #[error("cannot resolve backend address '{0}'")]
    BackendResolve(String),

    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    #[error("reactor thread panicked")]
    ReactorPanicked,
}

/// Per-connection failures. The reactor logs these and closes the
/// affected pair; they never stop the loop.
#[derive(Debug, thiserror::Error)]
pub enum DispatchError {
    #[error("socket error: {0}")]
    Io(#[from] io::Error),

    #[error("backend {addr} unreachable: {source}")]
    BackendUnreachable {
        addr: SocketAddr,
        #[source]
        source: io::Error,
    },

    #[error("backend closed before the tunnel was established")]
    PeerClosed,
}

impl DispatchError {
    pub fn is_backend_failure(&self) -> bool {
        matches!(self, DispatchError::BackendUnreachable { .. } | DispatchError::PeerClosed)
    }
}
