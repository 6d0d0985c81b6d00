//! Lenient request parsing.
//!
//! # Responsibilities
//! - Split a buffered byte span into request line, headers and body
//! - Decompose the request target into scheme/authority/path/query/fragment
//! - Extract the routing host (target authority or `Host` header)
//! - Re-serialize a parsed request for the direct-forward path
//!
//! # Design Decisions
//! - Only enough structure is extracted to route and authorize
//! - Every failure collapses into one typed [`MalformedRequest`]; callers
//!   branch on the result (the raw-relay fallback depends on it)
//! - Header names keep the case they were received with

use std::fmt;

/// Separator between the request head and the body.
pub const HEAD_TERMINATOR: &[u8] = b"\r\n\r\n";

/// Longest method token we are willing to wait for in a partial head.
const MAX_METHOD_LEN: usize = 16;

/// The single parse failure outcome.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
#[error("malformed request: {reason}")]
pub struct MalformedRequest {
    pub reason: &'static str,
}

impl MalformedRequest {
    fn new(reason: &'static str) -> Self {
        Self { reason }
    }
}

/// Header mapping that keeps received case and collapses duplicates.
///
/// A repeated name (exact match) overwrites the earlier value in place.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Headers {
    entries: Vec<(String, String)>,
}

impl Headers {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a header, replacing any value stored under the same name.
    pub fn insert(&mut self, name: impl Into<String>, value: impl Into<String>) {
        let name = name.into();
        let value = value.into();
        match self.entries.iter_mut().find(|(n, _)| *n == name) {
            Some(entry) => entry.1 = value,
            None => self.entries.push((name, value)),
        }
    }

    /// Exact-name lookup.
    pub fn get(&self, name: &str) -> Option<&str> {
        self.entries
            .iter()
            .find(|(n, _)| n == name)
            .map(|(_, v)| v.as_str())
    }

    /// ASCII case-insensitive lookup, last matching entry wins.
    pub fn get_ignore_case(&self, name: &str) -> Option<&str> {
        self.entries
            .iter()
            .rev()
            .find(|(n, _)| n.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.entries.iter().map(|(n, v)| (n.as_str(), v.as_str()))
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Decomposed request target.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Target {
    /// Explicit or defaulted (`http`) scheme.
    pub scheme: String,
    /// Raw authority text, `None` for origin-form targets.
    pub authority: Option<String>,
    /// Always starts with `/`.
    pub path: String,
    pub query: Option<String>,
    pub fragment: Option<String>,
}

impl Target {
    /// Parse a request target with the permissive proxy grammar.
    ///
    /// Handles absolute (`https://host/x`), authority (`host:443`) and
    /// origin (`/x?y`) forms alike.
    pub fn parse(raw: &str) -> Result<Self, MalformedRequest> {
        let (scheme, rest_start) = match raw.find("://") {
            Some(idx) if idx > 0 => (raw[..idx].to_string(), idx + 3),
            _ => ("http".to_string(), 0),
        };

        let fragment_start = find_from(raw, '#', rest_start).unwrap_or(raw.len());
        let fragment = (fragment_start < raw.len()).then(|| raw[fragment_start + 1..].to_string());

        let query_start = raw[rest_start..fragment_start]
            .find('?')
            .map(|idx| idx + rest_start)
            .unwrap_or(fragment_start);
        let query = (query_start < fragment_start)
            .then(|| raw[query_start + 1..fragment_start].to_string());

        let path_start = raw[rest_start..query_start]
            .find('/')
            .map(|idx| idx + rest_start)
            .unwrap_or(query_start);
        let path = if path_start < query_start {
            raw[path_start..query_start].to_string()
        } else {
            "/".to_string()
        };

        let authority = &raw[rest_start..path_start];
        let authority = if authority.is_empty() {
            None
        } else {
            validate_authority(&scheme, authority)?;
            Some(authority.to_string())
        };

        Ok(Self {
            scheme,
            authority,
            path,
            query,
            fragment,
        })
    }

    /// Host portion of the authority, without userinfo or port.
    ///
    /// Case is preserved; access checks compare literally.
    pub fn host(&self) -> Option<&str> {
        let authority = self.authority.as_deref()?;
        let host_port = authority.rsplit_once('@').map_or(authority, |(_, hp)| hp);
        let host = if host_port.starts_with('[') {
            host_port
                .find(']')
                .map_or(host_port, |end| &host_port[..=end])
        } else {
            strip_port(host_port)
        };
        (!host.is_empty()).then_some(host)
    }

    /// Copy of this target with a different scheme.
    pub fn with_scheme(&self, scheme: &str) -> Self {
        Self {
            scheme: scheme.to_string(),
            ..self.clone()
        }
    }

    /// Copy of this target with the authority filled in when it is missing.
    pub fn with_default_authority(&self, authority: &str) -> Self {
        Self {
            authority: self.authority.clone().or_else(|| Some(authority.to_string())),
            ..self.clone()
        }
    }
}

impl fmt::Display for Target {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if let Some(authority) = &self.authority {
            write!(f, "{}://{}", self.scheme, authority)?;
        }
        f.write_str(&self.path)?;
        if let Some(query) = &self.query {
            write!(f, "?{}", query)?;
        }
        if let Some(fragment) = &self.fragment {
            write!(f, "#{}", fragment)?;
        }
        Ok(())
    }
}

/// Routing-relevant view of one buffered request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParsedRequest {
    pub method: String,
    pub target: Target,
    /// Text after the `/` in `HTTP/x.y`.
    pub version: String,
    pub headers: Headers,
    pub body: Vec<u8>,
}

impl ParsedRequest {
    pub fn is_connect(&self) -> bool {
        self.method == "CONNECT"
    }

    /// Host to route on: target authority first, then the `Host` header
    /// with any `:port` removed.
    pub fn routing_host(&self) -> Option<&str> {
        self.target.host().or_else(|| {
            self.headers
                .get_ignore_case("Host")
                .map(|h| strip_port(h.trim()))
                .filter(|h| !h.is_empty())
        })
    }

    /// Serialize back to wire bytes.
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut head = format!("{} {} HTTP/{}\r\n", self.method, self.target, self.version);
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

/// Attempt to parse one request from `buf`.
pub fn parse_request(buf: &[u8]) -> Result<ParsedRequest, MalformedRequest> {
    let head_end = find_subslice(buf, HEAD_TERMINATOR)
        .ok_or(MalformedRequest::new("missing header terminator"))?;
    let head = std::str::from_utf8(&buf[..head_end])
        .map_err(|_| MalformedRequest::new("request head is not valid UTF-8"))?;
    let body = buf[head_end + HEAD_TERMINATOR.len()..].to_vec();

    // A head that is only the request line has no inner CRLF.
    let (request_line, header_block) = head.split_once("\r\n").unwrap_or((head, ""));
    if request_line.is_empty() {
        return Err(MalformedRequest::new("missing request line"));
    }

    let mut tokens = request_line.split(' ');
    let (method, raw_target, protocol) = match (tokens.next(), tokens.next(), tokens.next()) {
        (Some(m), Some(t), Some(p)) => (m.trim(), t.trim(), p.trim()),
        _ => return Err(MalformedRequest::new("request line has fewer than three tokens")),
    };
    if method.is_empty() || raw_target.is_empty() {
        return Err(MalformedRequest::new("empty method or target"));
    }
    let version = protocol
        .split_once('/')
        .map(|(_, v)| v.trim())
        .filter(|v| !v.is_empty())
        .ok_or(MalformedRequest::new("missing protocol version"))?;

    let target = Target::parse(raw_target)?;

    let mut headers = Headers::new();
    for line in header_block.split("\r\n") {
        // Lines without ": " (or with an empty name) are skipped.
        if let Some((name, value)) = line.split_once(": ") {
            if !name.is_empty() {
                headers.insert(name, value);
            }
        }
    }

    Ok(ParsedRequest {
        method: method.to_string(),
        target,
        version: version.to_string(),
        headers,
        body,
    })
}

/// Whether `buf` may still become a request head once more bytes arrive.
///
/// True only while no head terminator has been seen and everything before
/// the first space is an ASCII-uppercase method token.
pub fn looks_like_partial_head(buf: &[u8]) -> bool {
    if buf.is_empty() || find_subslice(buf, HEAD_TERMINATOR).is_some() {
        return false;
    }
    let method = match buf.iter().position(|&b| b == b' ') {
        Some(idx) => &buf[..idx],
        None => buf,
    };
    !method.is_empty()
        && method.len() <= MAX_METHOD_LEN
        && method.iter().all(|b| b.is_ascii_uppercase())
}

fn validate_authority(scheme: &str, authority: &str) -> Result<(), MalformedRequest> {
    let scheme = if scheme.is_empty() { "http" } else { scheme };
    url::Url::parse(&format!("{}://{}/", scheme, authority))
        .map(|_| ())
        .map_err(|_| MalformedRequest::new("invalid authority"))
}

fn strip_port(host_port: &str) -> &str {
    match host_port.rfind(':') {
        Some(idx) if idx > 0 => &host_port[..idx],
        _ => host_port,
    }
}

fn find_from(haystack: &str, needle: char, from: usize) -> Option<usize> {
    haystack[from..].find(needle).map(|idx| idx + from)
}

fn find_subslice(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    haystack
        .windows(needle.len())
        .position(|window| window == needle)
}
