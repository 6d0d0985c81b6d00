//! Per-socket I/O primitives for the reactor.
//!
//! # Responsibilities
//! - Generate unique connection IDs for tracing
//! - Drain an edge-triggered readable socket without blocking
//! - Queue outbound bytes and flush them as the socket allows
//!
//! # Design Decisions
//! - Writes never loop on `WouldBlock`; unsent bytes stay queued until the
//!   next writable event
//! - Helpers are generic over `Read`/`Write` so they can be exercised with
//!   in-memory streams

use std::io::{self, Read, Write};
use std::sync::atomic::{AtomicU64, Ordering};

/// Global atomic counter for connection IDs.
/// Using relaxed ordering is sufficient since we only need uniqueness, not synchronization.
static CONNECTION_ID_COUNTER: AtomicU64 = AtomicU64::new(1);

/// Unique identifier for a connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ConnectionId(u64);

impl ConnectionId {
    /// Generate a new unique connection ID.
    pub fn new() -> Self {
        Self(CONNECTION_ID_COUNTER.fetch_add(1, Ordering::Relaxed))
    }
}

impl Default for ConnectionId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "conn-{}", self.0)
    }
}

/// Why a drain stopped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DrainStop {
    /// Socket has nothing more right now.
    WouldBlock,
    /// Peer closed its write side.
    Eof,
    /// Caller's byte limit reached; the socket may hold more.
    Limit,
}

/// Read from `source` into `buf` until it would block, hits EOF, or `buf`
/// reaches `limit` bytes. Each read goes through the caller's `scratch`
/// buffer, which must not be empty. Returns the number of bytes appended.
pub fn drain_into<R: Read>(
    source: &mut R,
    buf: &mut Vec<u8>,
    limit: usize,
    scratch: &mut [u8],
) -> io::Result<(usize, DrainStop)> {
    let mut total = 0;
    loop {
        if buf.len() >= limit {
            return Ok((total, DrainStop::Limit));
        }
        let want = scratch.len().min(limit - buf.len());
        match source.read(&mut scratch[..want]) {
            Ok(0) => return Ok((total, DrainStop::Eof)),
            Ok(n) => {
                buf.extend_from_slice(&scratch[..n]);
                total += n;
            }
            Err(e) if e.kind() == io::ErrorKind::WouldBlock => {
                return Ok((total, DrainStop::WouldBlock))
            }
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(e),
        }
    }
}

/// Result of a flush attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Flush {
    /// Queue is empty.
    Done,
    /// Socket stopped accepting bytes; wait for writable readiness.
    Blocked,
}

/// Bytes accepted for sending but not yet written to the socket.
#[derive(Debug, Default)]
pub struct WriteQueue {
    buf: Vec<u8>,
    pos: usize,
}

impl WriteQueue {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, bytes: &[u8]) {
        if self.pos > 0 && self.pos == self.buf.len() {
            self.buf.clear();
            self.pos = 0;
        }
        self.buf.extend_from_slice(bytes);
    }

    /// Pending byte count.
    pub fn len(&self) -> usize {
        self.buf.len() - self.pos
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Write as much as `sink` takes without blocking.
    pub fn flush_into<W: Write>(&mut self, sink: &mut W) -> io::Result<Flush> {
        while self.pos < self.buf.len() {
            match sink.write(&self.buf[self.pos..]) {
                Ok(0) => {
                    return Err(io::Error::new(
                        io::ErrorKind::WriteZero,
                        "socket accepted zero bytes",
                    ))
                }
                Ok(n) => self.pos += n,
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => {
                    self.compact();
                    return Ok(Flush::Blocked);
                }
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => return Err(e),
            }
        }
        self.buf.clear();
        self.pos = 0;
        Ok(Flush::Done)
    }

    fn compact(&mut self) {
        if self.pos > 0 {
            self.buf.drain(..self.pos);
            self.pos = 0;
        }
    }
}
