//! Response construction and serialization.
//!
//! # Responsibilities
//! - Hold an immutable status/header/body triple
//! - Provide factories for the four responses the proxy emits
//!   (200 Connection Established, 302 Found, 400, 403)
//! - Serialize verbatim to wire bytes
//!
//! # Design Decisions
//! - No chunking or length inference; callers set what they need
//! - Every proxy-generated response carries a `Server` header

use crate::http::request::Headers;

/// A fully specified HTTP response.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Response {
    pub version: String,
    pub code: u16,
    pub reason: String,
    pub headers: Headers,
    pub body: Vec<u8>,
}

impl Default for Response {
    fn default() -> Self {
        Self {
            version: "1.1".to_string(),
            code: 200,
            reason: "OK".to_string(),
            headers: Headers::new(),
            body: Vec::new(),
        }
    }
}

impl Response {
    /// `HTTP/1.1 <code> <reason>` with no headers and no body.
    pub fn new(code: u16, reason: impl Into<String>) -> Self {
        Self {
            code,
            reason: reason.into(),
            ..Self::default()
        }
    }

    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.insert(name, value);
        self
    }

    pub fn with_body(mut self, body: impl Into<Vec<u8>>) -> Self {
        self.body = body.into();
        self
    }

    /// Answer to an accepted `CONNECT`.
    pub fn connection_established(server: &str) -> Self {
        Self::new(200, "Connection Established").with_header("Server", server)
    }

    /// HTTPS upgrade redirect.
    pub fn redirect(location: &str, server: &str) -> Self {
        Self::new(302, "Found")
            .with_header("Location", location)
            .with_header("Connection", "keep-alive")
            .with_header("Content-Length", "0")
            .with_header("Server", server)
    }

    pub fn bad_request(server: &str) -> Self {
        Self::new(400, "Bad Request").with_header("Server", server)
    }

    pub fn forbidden(server: &str) -> Self {
        Self::new(403, "Forbidden").with_header("Server", server)
    }

    /// Wire representation.
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut head = format!("HTTP/{} {} {}\r\n", self.version, self.code, self.reason);
        for (name, value) in self.headers.iter() {
            head.push_str(name);
            head.push_str(": ");
            head.push_str(value);
            head.push_str("\r\n");
        }
        head.push_str("\r\n");

        let mut out = head.into_bytes();
        out.extend_from_slice(&self.body);
        out
    }
}
