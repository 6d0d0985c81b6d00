//! One direction of an established tunnel.
//!
//! # Responsibilities
//! - Move bytes from a source socket into the peer's outbound queue
//! - Flush the queue toward the peer as far as it accepts
//! - Stop reading while the peer is backed up
//!
//! # Design Decisions
//! - Output is bounded: once the destination holds `high_water` unsent
//!   bytes the source is paused. The reactor resumes it when the
//!   destination drains below that mark.
//! - Source EOF is reported, not acted on; the reactor flushes the
//!   destination and then closes the pair.

use std::io::{self, Read, Write};

use mio::Token;

use crate::net::WriteQueue;

/// Which way a pump moves bytes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    ClientToBackend,
    BackendToClient,
}

impl Direction {
    pub fn as_str(&self) -> &'static str {
        match self {
            Direction::ClientToBackend => "client_to_backend",
            Direction::BackendToClient => "backend_to_client",
        }
    }
}

/// How a pump pass ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PumpOutcome {
    /// Source has nothing more right now.
    Drained,
    /// Destination is full; the source was left unread.
    Paused,
    /// Source reached EOF.
    SourceClosed,
}

/// Relay state attached to the source side of a tunnel.
#[derive(Debug)]
pub struct RelayPump {
    peer: Token,
    direction: Direction,
    paused: bool,
    source_closed: bool,
    forwarded: u64,
}

impl RelayPump {
    pub fn new(peer: Token, direction: Direction) -> Self {
        Self {
            peer,
            direction,
            paused: false,
            source_closed: false,
            forwarded: 0,
        }
    }

    /// Token of the destination socket.
    pub fn peer(&self) -> Token {
        self.peer
    }

    pub fn direction(&self) -> Direction {
        self.direction
    }

    pub fn is_paused(&self) -> bool {
        self.paused
    }

    pub fn is_source_closed(&self) -> bool {
        self.source_closed
    }

    /// Total bytes moved by this pump.
    pub fn forwarded(&self) -> u64 {
        self.forwarded
    }

    /// Read from `source` until it blocks, closes, or the destination is
    /// full. `dest` is `None` while the destination is still connecting;
    /// bytes then only accumulate in `queue`. Reads go through `scratch`,
    /// which must not be empty.
    ///
    /// Returns the bytes read during this pass.
    pub fn pump<R, W>(
        &mut self,
        source: &mut R,
        queue: &mut WriteQueue,
        mut dest: Option<&mut W>,
        scratch: &mut [u8],
        high_water: usize,
    ) -> io::Result<(usize, PumpOutcome)>
    where
        R: Read,
        W: Write,
    {
        let mut total = 0;
        self.paused = false;

        loop {
            if queue.len() >= high_water {
                if let Some(dest) = dest.as_deref_mut() {
                    queue.flush_into(dest)?;
                }
                if queue.len() >= high_water {
                    self.paused = true;
                    return Ok((total, PumpOutcome::Paused));
                }
            }

            match source.read(scratch) {
                Ok(0) => {
                    self.source_closed = true;
                    return Ok((total, PumpOutcome::SourceClosed));
                }
                Ok(n) => {
                    queue.push(&scratch[..n]);
                    total += n;
                    self.forwarded += n as u64;
                    if let Some(dest) = dest.as_deref_mut() {
                        queue.flush_into(dest)?;
                    }
                }
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => {
                    return Ok((total, PumpOutcome::Drained));
                }
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => return Err(e),
            }
        }
    }
}
