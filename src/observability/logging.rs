//! Structured logging.
//!
//! # Responsibilities
//! - Initialize the global `tracing` subscriber
//! - Pick the output format and default level from configuration
//!
//! # Design Decisions
//! - `RUST_LOG` wins over the configured level when set
//! - JSON format for production, pretty format for development

use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use crate::config::ObservabilityConfig;

/// Directive used when `RUST_LOG` is absent.
pub fn default_directive(config: &ObservabilityConfig) -> String {
    format!("gbf_proxy={}", config.log_level)
}

/// Install the subscriber. Call once, before the reactor starts.
pub fn init_logging(config: &ObservabilityConfig) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(default_directive(config)));
    let registry = tracing_subscriber::registry().with(filter);

    match config.log_format.as_str() {
        "json" => registry.with(fmt::layer().json()).init(),
        _ => registry.with(fmt::layer()).init(),
    }
}
