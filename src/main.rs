//! gbf-proxy
//!
//! An intercepting proxy that only tunnels traffic for an allow-listed set
//! of host suffixes, and always tunnels it to one fixed backend.
//!
//! # Architecture Overview
//!
//! ```text
//!                        ┌──────────────────────────────────────────────┐
//!                        │                  GBF PROXY                   │
//!     Client             │  ┌─────────┐   ┌─────────┐   ┌───────────┐   │
//!     ───────────────────┼─▶│listener │──▶│ tunnel  │──▶│  access   │   │
//!                        │  │ (mio)   │   │ session │   │  policy   │   │
//!                        │  └─────────┘   └────┬────┘   └───────────┘   │
//!                        │                     │ 200 / 302 / 400 / 403  │
//!                        │                     ▼                        │
//!     ◀──────────────────┼──────────────  relay pumps  ◀───────────────┼──── Backend
//!                        │              (bounded queues)                │
//!                        └──────────────────────────────────────────────┘
//! ```
//!
//! The reactor runs on its own thread; this binary only parses arguments,
//! installs logging and metrics, and waits for a stop signal.

use std::path::PathBuf;

use clap::Parser;

use gbf_proxy::config::{load_config, ProxyConfig};
use gbf_proxy::lifecycle::{self, signals};
use gbf_proxy::observability::{logging, metrics};

#[derive(Parser, Debug)]
#[command(name = "gbf-proxy", version)]
#[command(about = "Allow-listed CONNECT/redirect proxy in front of a fixed backend", long_about = None)]
struct Cli {
    /// TOML configuration file
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Listen address, overrides `listener.bind_address`
    #[arg(short, long)]
    bind: Option<String>,

    /// Backend address, overrides `backend.address`
    #[arg(long)]
    backend: Option<String>,

    /// Allowed host suffix (repeatable), replaces `access.allowed_suffixes`
    #[arg(long = "allow", value_name = "SUFFIX")]
    allow: Vec<String>,

    /// Log level, overrides `observability.log_level`
    #[arg(long)]
    log_level: Option<String>,
}

impl Cli {
    fn apply(&self, config: &mut ProxyConfig) {
        if let Some(bind) = &self.bind {
            config.listener.bind_address = bind.clone();
        }
        if let Some(backend) = &self.backend {
            config.backend.address = backend.clone();
        }
        if !self.allow.is_empty() {
            config.access.allowed_suffixes = self.allow.clone();
        }
        if let Some(level) = &self.log_level {
            config.observability.log_level = level.clone();
        }
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    let mut config = match &cli.config {
        Some(path) => load_config(path)?,
        None => ProxyConfig::default(),
    };
    cli.apply(&mut config);

    logging::init_logging(&config.observability);

    tracing::info!("gbf-proxy v{} starting", env!("CARGO_PKG_VERSION"));
    tracing::info!(
        bind_address = %config.listener.bind_address,
        backend = %config.backend.address,
        allowed = ?config.access.allowed_suffixes,
        max_connections = config.listener.max_connections,
        "Configuration loaded"
    );

    if config.observability.metrics_enabled {
        match config.observability.metrics_address.parse() {
            Ok(addr) => metrics::init_metrics(addr)?,
            Err(_) => tracing::error!(
                metrics_address = %config.observability.metrics_address,
                "Failed to parse metrics address"
            ),
        }
    }

    let proxy = lifecycle::start(&config)?;
    tracing::info!(
        address = %proxy.local_addr(),
        backend = %proxy.backend_addr(),
        "Listening for connections"
    );

    signals::wait_for_signal().await;
    proxy.shutdown_handle().trigger();
    tokio::task::spawn_blocking(move || proxy.join()).await??;

    tracing::info!("Shutdown complete");
    Ok(())
}
