//! Startup orchestration.
//!
//! # Responsibilities
//! - Validate configuration and resolve the backend address
//! - Bind the listener and build the reactor
//! - Start the reactor on its own thread
//!
//! # Design Decisions
//! - Fail fast: any startup error is fatal
//! - The backend is resolved once; later DNS changes are not picked up
//! - The listener is bound before `start` returns, so callers can connect
//!   to `local_addr()` immediately

use std::net::{SocketAddr, ToSocketAddrs};
use std::thread::{self, JoinHandle};

use crate::config::{validate_config, ConfigError, ProxyConfig};
use crate::error::ProxyError;
use crate::lifecycle::Shutdown;
use crate::net;
use crate::proxy::{Reactor, TunnelSettings};

const REACTOR_THREAD: &str = "gbf-proxy-reactor";

/// A proxy whose reactor thread is running.
#[derive(Debug)]
pub struct RunningProxy {
    local_addr: SocketAddr,
    backend: SocketAddr,
    shutdown: Shutdown,
    handle: JoinHandle<std::io::Result<()>>,
}

impl RunningProxy {
    /// Address clients connect to.
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    pub fn backend_addr(&self) -> SocketAddr {
        self.backend
    }

    pub fn shutdown_handle(&self) -> Shutdown {
        self.shutdown.clone()
    }

    /// Wait for the reactor thread to exit.
    pub fn join(self) -> Result<(), ProxyError> {
        match self.handle.join() {
            Ok(result) => result.map_err(ProxyError::Io),
            Err(_) => Err(ProxyError::ReactorPanicked),
        }
    }

    /// Trigger shutdown and wait for the reactor to exit.
    pub fn stop(self) -> Result<(), ProxyError> {
        self.shutdown.trigger();
        self.join()
    }
}

/// Resolve `address` to the first socket address it names.
pub fn resolve_backend(address: &str) -> Result<SocketAddr, ProxyError> {
    address
        .to_socket_addrs()
        .map_err(|_| ProxyError::BackendResolve(address.to_string()))?
        .next()
        .ok_or_else(|| ProxyError::BackendResolve(address.to_string()))
}

/// Validate `config`, bind, and start the reactor thread.
pub fn start(config: &ProxyConfig) -> Result<RunningProxy, ProxyError> {
    validate_config(config).map_err(ConfigError::Validation)?;

    let backend = resolve_backend(&config.backend.address)?;
    let listener = net::bind(&config.listener)?;
    let local_addr = listener.local_addr()?;

    let reactor = Reactor::new(listener, TunnelSettings::from_config(config, backend))?;
    let shutdown = reactor.shutdown_handle();

    let handle = thread::Builder::new()
        .name(REACTOR_THREAD.to_string())
        .spawn(move || reactor.run())?;

    tracing::info!(
        address = %local_addr,
        backend = %backend,
        "Proxy started"
    );

    Ok(RunningProxy {
        local_addr,
        backend,
        shutdown,
        handle,
    })
}
