//! HTTP protocol handling subsystem.
//!
//! # Data Flow
//! ```text
//! buffered client bytes
//!     → request.rs (lenient parse: method, target, version, headers, body)
//!     → [tunnel state machine decides]
//!     → response.rs (200 / 302 / 400 / 403 wire bytes)
//!     → client write queue
//! ```

pub mod request;
pub mod response;

pub use request::{parse_request, Headers, MalformedRequest, ParsedRequest, Target};
pub use response::Response;
