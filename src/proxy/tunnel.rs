//! Per-connection tunnel negotiation.
//!
//! # Responsibilities
//! - Accumulate client bytes until a request can be judged
//! - Resolve the routing host and apply the allow-list
//! - Decide between reject, redirect, CONNECT-accept and forward
//! - Fall back to raw relaying once a backend peer exists
//!
//! # Design Decisions
//! - Pure logic: the session never touches a socket. It yields a [`Step`]
//!   and the reactor performs the I/O that step asks for
//! - After hand-off to a relay pair the session is inert
//!
//! ```text
//! AwaitingRequest ──400/403──▶ Rejected        (close after flush)
//!        │  ▲
//!        │  └── CONNECT accepted (peer kept) / 302 (Redirected, stays open)
//!        ├──https forward──▶ TunnelEstablished (relay pair installed)
//!        └──unparsable + peer──▶ RawRelay      (relay pair installed)
//! ```

use std::fmt;

use mio::Token;

use crate::http::request::{looks_like_partial_head, parse_request, MalformedRequest, ParsedRequest};
use crate::http::response::Response;
use crate::security::{AccessDecision, AccessPolicy};

/// What a session needs to know about the proxy to make decisions.
#[derive(Debug, Clone, Copy)]
pub struct TunnelContext<'a> {
    pub policy: &'a AccessPolicy,
    pub server_name: &'a str,
    /// Largest head we wait for before giving up with 400.
    pub max_request_bytes: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TunnelState {
    AwaitingRequest,
    Rejected,
    /// A 302 was sent; the client may retry on the same connection.
    Redirected,
    TunnelEstablished,
    RawRelay,
}

/// Why a request was refused.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RejectReason {
    Malformed(MalformedRequest),
    HostMissing,
    Forbidden(String),
}

impl fmt::Display for RejectReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RejectReason::Malformed(e) => write!(f, "{}", e),
            RejectReason::HostMissing => write!(f, "no routable host"),
            RejectReason::Forbidden(host) => write!(f, "host '{}' is not allowed", host),
        }
    }
}

/// The I/O the reactor must perform after a session advanced.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Step {
    /// Nothing to do until more bytes arrive.
    Wait,
    /// Write the response, then close the client.
    Reject { response: Response, reason: RejectReason },
    /// Open a backend peer (replacing any existing one) and write the 200.
    /// Non-empty `early_data` is forwarded as the first tunnel bytes.
    Connect { response: Response, host: String, early_data: Vec<u8> },
    /// Write the 302 and drop any existing peer; the client stays connected.
    Redirect { response: Response, location: String },
    /// Send `payload` to the peer (opening one if needed) and install the
    /// relay pair.
    Forward { payload: Vec<u8>, raw: bool },
}

impl Step {
    /// Label used for the request outcome metric.
    pub fn outcome(&self) -> Option<&'static str> {
        match self {
            Step::Wait => None,
            Step::Reject { reason: RejectReason::Forbidden(_), .. } => Some("forbidden"),
            Step::Reject { .. } => Some("bad_request"),
            Step::Connect { .. } => Some("connect"),
            Step::Redirect { .. } => Some("redirect"),
            Step::Forward { raw: true, .. } => Some("raw_relay"),
            Step::Forward { raw: false, .. } => Some("forward"),
        }
    }
}

/// Negotiation state owned by one client connection.
#[derive(Debug)]
pub struct TunnelSession {
    state: TunnelState,
    buffer: Vec<u8>,
    peer: Option<Token>,
}

impl Default for TunnelSession {
    fn default() -> Self {
        Self::new()
    }
}

impl TunnelSession {
    pub fn new() -> Self {
        Self {
            state: TunnelState::AwaitingRequest,
            buffer: Vec::new(),
            peer: None,
        }
    }

    pub fn state(&self) -> TunnelState {
        self.state
    }

    /// Whether new bytes can still change the session.
    pub fn is_negotiating(&self) -> bool {
        matches!(self.state, TunnelState::AwaitingRequest | TunnelState::Redirected)
    }

    /// Read buffer the reactor drains the client socket into.
    pub fn buffer_mut(&mut self) -> &mut Vec<u8> {
        &mut self.buffer
    }

    pub fn buffered(&self) -> usize {
        self.buffer.len()
    }

    pub fn peer(&self) -> Option<Token> {
        self.peer
    }

    /// Record the backend peer; returns the one it replaces.
    pub fn attach_peer(&mut self, peer: Token) -> Option<Token> {
        self.peer.replace(peer)
    }

    pub fn detach_peer(&mut self) -> Option<Token> {
        self.peer.take()
    }

    /// Judge the buffered bytes.
    pub fn advance(&mut self, ctx: &TunnelContext<'_>) -> Step {
        if !self.is_negotiating() || self.buffer.is_empty() {
            return Step::Wait;
        }

        match parse_request(&self.buffer) {
            Ok(request) => {
                self.buffer.clear();
                self.route(request, ctx)
            }
            Err(_) if self.peer.is_some() => {
                // Bytes racing the hand-off after CONNECT (e.g. a TLS ClientHello).
                self.state = TunnelState::RawRelay;
                Step::Forward {
                    payload: std::mem::take(&mut self.buffer),
                    raw: true,
                }
            }
            Err(_)
                if self.buffer.len() < ctx.max_request_bytes
                    && looks_like_partial_head(&self.buffer) =>
            {
                Step::Wait
            }
            Err(err) => {
                self.buffer.clear();
                self.reject(Response::bad_request(ctx.server_name), RejectReason::Malformed(err))
            }
        }
    }

    fn route(&mut self, request: ParsedRequest, ctx: &TunnelContext<'_>) -> Step {
        let host = request.routing_host().map(str::to_string);
        match ctx.policy.check(host.as_deref()) {
            AccessDecision::Allowed => {}
            AccessDecision::HostMissing => {
                return self.reject(Response::bad_request(ctx.server_name), RejectReason::HostMissing);
            }
            AccessDecision::Forbidden => {
                let host = host.unwrap_or_default();
                return self.reject(Response::forbidden(ctx.server_name), RejectReason::Forbidden(host));
            }
        }
        let host = host.unwrap_or_default();

        if request.is_connect() {
            self.state = TunnelState::AwaitingRequest;
            return Step::Connect {
                response: Response::connection_established(ctx.server_name),
                host,
                early_data: request.body,
            };
        }

        if request.target.scheme != "https" {
            let location = redirect_location(&request);
            self.state = TunnelState::Redirected;
            return Step::Redirect {
                response: Response::redirect(&location, ctx.server_name),
                location,
            };
        }

        self.state = TunnelState::TunnelEstablished;
        Step::Forward {
            payload: request.to_bytes(),
            raw: false,
        }
    }

    fn reject(&mut self, response: Response, reason: RejectReason) -> Step {
        self.state = TunnelState::Rejected;
        Step::Reject { response, reason }
    }
}

/// The original target with its scheme switched to https. Origin-form
/// targets borrow their authority from the `Host` header.
fn redirect_location(request: &ParsedRequest) -> String {
    let target = request.target.with_scheme("https");
    let target = match request.headers.get_ignore_case("Host") {
        Some(host) => target.with_default_authority(host.trim()),
        None => target,
    };
    target.to_string()
}
