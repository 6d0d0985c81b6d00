//! Configuration management subsystem.
//!
//! # Data Flow
//! ```text
//! config file (TOML)
//!     → loader.rs (parse & deserialize)
//!     → validation.rs (semantic checks)
//!     → ProxyConfig (validated, immutable)
//!     → CLI overrides applied once in main
//!     → handed to the reactor at startup
//! ```
//!
//! # Design Decisions
//! - Config is immutable once loaded; the allow-list and backend are fixed
//!   for the life of the process
//! - All fields have defaults to allow minimal configs
//! - Validation separates syntactic (serde) from semantic checks

pub mod loader;
pub mod schema;
pub mod validation;

pub use loader::{load_config, parse_config, ConfigError};
pub use schema::{
    AccessConfig, BackendConfig, ListenerConfig, ObservabilityConfig, ProxyConfig, TunnelConfig,
};
pub use validation::{validate_config, ValidationError};
