//! Configuration validation.
//!
//! # Responsibilities
//! - Semantic validation (serde handles syntactic)
//! - Validate value ranges (sizes > 0, addresses parse)
//! - Reject allow-list entries that would match everything
//!
//! # Design Decisions
//! - Returns all validation errors, not just first
//! - Validation is pure function: ProxyConfig → Result<(), Vec<ValidationError>>
//! - Runs before config is accepted into the system

use std::fmt;
use std::net::SocketAddr;

use crate::config::schema::ProxyConfig;

/// A single semantic problem in a configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidationError {
    /// Dotted path of the offending field.
    pub field: String,
    pub message: String,
}

impl ValidationError {
    fn new(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            message: message.into(),
        }
    }
}

impl fmt::Display for ValidationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.field, self.message)
    }
}

impl std::error::Error for ValidationError {}

pub fn validate_config(config: &ProxyConfig) -> Result<(), Vec<ValidationError>> {
    let mut errors = Vec::new();

    if config.listener.bind_address.parse::<SocketAddr>().is_err() {
        errors.push(ValidationError::new(
            "listener.bind_address",
            format!("'{}' is not a socket address", config.listener.bind_address),
        ));
    }
    if config.listener.max_connections == 0 {
        errors.push(ValidationError::new("listener.max_connections", "must be greater than 0"));
    }

    if config.backend.address.trim().is_empty() {
        errors.push(ValidationError::new("backend.address", "must not be empty"));
    }

    for (i, suffix) in config.access.allowed_suffixes.iter().enumerate() {
        if suffix.trim().is_empty() {
            errors.push(ValidationError::new(
                format!("access.allowed_suffixes[{}]", i),
                "empty suffix would allow every host",
            ));
        }
    }

    let tunnel = &config.tunnel;
    if tunnel.server_name.trim().is_empty() {
        errors.push(ValidationError::new("tunnel.server_name", "must not be empty"));
    }
    for (field, value) in [
        ("tunnel.max_request_bytes", tunnel.max_request_bytes),
        ("tunnel.read_chunk_bytes", tunnel.read_chunk_bytes),
        ("tunnel.relay_buffer_bytes", tunnel.relay_buffer_bytes),
        ("tunnel.event_capacity", tunnel.event_capacity),
    ] {
        if value == 0 {
            errors.push(ValidationError::new(field, "must be greater than 0"));
        }
    }
    if tunnel.relay_buffer_bytes < tunnel.read_chunk_bytes {
        errors.push(ValidationError::new(
            "tunnel.relay_buffer_bytes",
            "must be at least tunnel.read_chunk_bytes",
        ));
    }

    let obs = &config.observability;
    if !matches!(obs.log_format.as_str(), "pretty" | "json") {
        errors.push(ValidationError::new(
            "observability.log_format",
            format!("unknown format '{}', expected 'pretty' or 'json'", obs.log_format),
        ));
    }
    if obs.metrics_enabled && obs.metrics_address.parse::<SocketAddr>().is_err() {
        errors.push(ValidationError::new(
            "observability.metrics_address",
            format!("'{}' is not a socket address", obs.metrics_address),
        ));
    }

    if errors.is_empty() {
        Ok(())
    } else {
        Err(errors)
    }
}
