//! Single-threaded readiness loop.
//!
//! # Responsibilities
//! - Accept clients and enforce the connection limit
//! - Dispatch readiness to the owning handler (negotiation, pending
//!   backend, relay)
//! - Open backend sockets without blocking and detect connect completion
//! - Close both halves of a pair when either side fails or finishes
//!
//! # Design Decisions
//! - Every socket is registered once for READABLE | WRITABLE, edge
//!   triggered. Handlers therefore drain reads and flush queued writes
//!   until `WouldBlock`.
//! - A connection fault is logged and closes its pair; the loop goes on
//! - Tokens are never reused, so a late event for a closed token is
//!   simply ignored

use std::collections::HashMap;
use std::io;
use std::net::SocketAddr;

use mio::event::Event;
use mio::net::{TcpListener, TcpStream};
use mio::{Events, Interest, Poll, Token, Waker};

use crate::error::DispatchError;
use crate::http::Response;
use crate::lifecycle::Shutdown;
use crate::net::{drain_into, ConnectionId, DrainStop, Flush, WriteQueue};
use crate::observability::metrics;
use crate::proxy::relay::{Direction, PumpOutcome, RelayPump};
use crate::proxy::tunnel::{Step, TunnelSession};
use crate::proxy::TunnelSettings;

const LISTENER: Token = Token(0);
const WAKER: Token = Token(1);
const FIRST_CONNECTION: usize = 2;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Side {
    Client,
    Backend,
}

/// Who reacts to readiness on a socket.
enum Handler {
    /// Client still negotiating.
    Tunnel(TunnelSession),
    /// Backend opened for a client that has not handed off yet.
    PendingPeer { owner: Token },
    /// One half of an established tunnel.
    Relay(RelayPump),
}

struct Connection {
    id: ConnectionId,
    side: Side,
    stream: TcpStream,
    remote: Option<SocketAddr>,
    connected: bool,
    outbound: WriteQueue,
    close_after_flush: bool,
    /// Bytes owed to the paired client once this backend connects.
    greeting: Option<Vec<u8>>,
    handler: Handler,
}

impl Connection {
    fn client(stream: TcpStream, remote: SocketAddr) -> Self {
        Self {
            id: ConnectionId::new(),
            side: Side::Client,
            stream,
            remote: Some(remote),
            connected: true,
            outbound: WriteQueue::new(),
            close_after_flush: false,
            greeting: None,
            handler: Handler::Tunnel(TunnelSession::new()),
        }
    }

    fn backend(stream: TcpStream, owner: Token) -> Self {
        Self {
            id: ConnectionId::new(),
            side: Side::Backend,
            stream,
            remote: None,
            connected: false,
            outbound: WriteQueue::new(),
            close_after_flush: false,
            greeting: None,
            handler: Handler::PendingPeer { owner },
        }
    }

    /// The other half of this connection's pair, if any.
    fn linked(&self) -> Option<Token> {
        match &self.handler {
            Handler::Tunnel(session) => session.peer(),
            Handler::PendingPeer { owner } => Some(*owner),
            Handler::Relay(pump) => Some(pump.peer()),
        }
    }

    /// Whether a non-blocking connect has completed.
    fn finish_connect(&mut self) -> io::Result<bool> {
        if let Some(err) = self.stream.take_error()? {
            return Err(err);
        }
        match self.stream.peer_addr() {
            Ok(addr) => {
                self.remote = Some(addr);
                Ok(true)
            }
            Err(e) if e.kind() == io::ErrorKind::NotConnected => Ok(false),
            Err(e) => Err(e),
        }
    }
}

/// The proxy event loop. Owns every socket; run it on a dedicated thread.
pub struct Reactor {
    poll: Poll,
    listener: TcpListener,
    connections: HashMap<Token, Connection>,
    next_token: usize,
    clients: usize,
    settings: TunnelSettings,
    /// Read buffer shared by every drain and pump pass.
    scratch: Vec<u8>,
    shutdown: Shutdown,
}

impl Reactor {
    pub fn new(mut listener: TcpListener, settings: TunnelSettings) -> io::Result<Self> {
        let poll = Poll::new()?;
        poll.registry()
            .register(&mut listener, LISTENER, Interest::READABLE)?;
        let waker = Waker::new(poll.registry(), WAKER)?;

        Ok(Self {
            poll,
            listener,
            connections: HashMap::new(),
            next_token: FIRST_CONNECTION,
            clients: 0,
            scratch: vec![0u8; settings.read_chunk_bytes.max(1)],
            settings,
            shutdown: Shutdown::new(waker),
        })
    }

    pub fn local_addr(&self) -> io::Result<SocketAddr> {
        self.listener.local_addr()
    }

    pub fn shutdown_handle(&self) -> Shutdown {
        self.shutdown.clone()
    }

    /// Run until shutdown is triggered. Only a failing poll is fatal.
    pub fn run(mut self) -> io::Result<()> {
        let mut events = Events::with_capacity(self.settings.event_capacity.max(1));
        tracing::info!(
            address = ?self.listener.local_addr().ok(),
            backend = %self.settings.backend,
            allowed = ?self.settings.policy.suffixes(),
            "Reactor running"
        );

        while !self.shutdown.is_triggered() {
            if let Err(e) = self.poll.poll(&mut events, None) {
                if e.kind() == io::ErrorKind::Interrupted {
                    continue;
                }
                tracing::error!(error = %e, "Readiness poll failed");
                return Err(e);
            }

            for event in events.iter() {
                match event.token() {
                    LISTENER => self.accept_ready(),
                    WAKER => {}
                    token => {
                        if let Err(e) = self.dispatch(token, event) {
                            self.report(token, &e);
                            self.close_pair(token);
                        }
                    }
                }
            }
        }

        tracing::info!(
            open_connections = self.connections.len(),
            "Reactor stopped"
        );
        Ok(())
    }

    fn report(&self, token: Token, error: &DispatchError) {
        let id = self.connections.get(&token).map(|c| c.id.to_string());
        if error.is_backend_failure() {
            metrics::record_backend_failure();
        }
        tracing::warn!(connection_id = ?id, error = %error, "Connection fault, closing pair");
    }

    fn accept_ready(&mut self) {
        loop {
            match self.listener.accept() {
                Ok((stream, remote)) => self.admit(stream, remote),
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => return,
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => {
                    tracing::warn!(error = %e, "Accept failed");
                    return;
                }
            }
        }
    }

    fn admit(&mut self, mut stream: TcpStream, remote: SocketAddr) {
        if self.clients >= self.settings.max_connections {
            metrics::record_refused();
            tracing::warn!(
                peer_addr = %remote,
                max_connections = self.settings.max_connections,
                "Connection limit reached, refusing"
            );
            return;
        }

        let token = self.allocate_token();
        if let Err(e) = self
            .poll
            .registry()
            .register(&mut stream, token, Interest::READABLE | Interest::WRITABLE)
        {
            tracing::warn!(peer_addr = %remote, error = %e, "Failed to register client");
            return;
        }

        let conn = Connection::client(stream, remote);
        tracing::debug!(connection_id = %conn.id, peer_addr = %remote, "Connection accepted");
        metrics::record_accepted();
        self.clients += 1;
        self.connections.insert(token, conn);
    }

    fn allocate_token(&mut self) -> Token {
        let token = Token(self.next_token);
        self.next_token += 1;
        token
    }

    fn dispatch(&mut self, token: Token, event: &Event) -> Result<(), DispatchError> {
        if !self.connections.contains_key(&token) {
            return Ok(());
        }
        if event.is_writable() {
            self.on_writable(token)?;
        }
        if event.is_readable() || event.is_read_closed() || event.is_error() {
            self.on_readable(token, event)?;
        }
        Ok(())
    }

    fn on_readable(&mut self, token: Token, event: &Event) -> Result<(), DispatchError> {
        let Some(conn) = self.connections.get_mut(&token) else {
            return Ok(());
        };
        if !conn.connected {
            // A refused connect may surface only as error/hang-up readiness.
            if event.is_error() || event.is_read_closed() {
                let source = conn
                    .stream
                    .take_error()?
                    .unwrap_or_else(|| io::ErrorKind::ConnectionRefused.into());
                return Err(DispatchError::BackendUnreachable {
                    addr: self.settings.backend,
                    source,
                });
            }
            return Ok(());
        }

        if let Handler::PendingPeer { .. } = conn.handler {
            // Bytes from the backend wait until hand-off; only failures matter here.
            if event.is_error() || event.is_read_closed() {
                return Err(DispatchError::PeerClosed);
            }
            return Ok(());
        }

        if matches!(conn.handler, Handler::Tunnel(_)) {
            self.negotiate(token)
        } else {
            self.pump_relay(token)
        }
    }

    fn on_writable(&mut self, token: Token) -> Result<(), DispatchError> {
        let Some(conn) = self.connections.get_mut(&token) else {
            return Ok(());
        };

        let mut greeting = None;
        let just_connected = if conn.connected {
            false
        } else {
            match conn.finish_connect() {
                Ok(true) => {
                    conn.connected = true;
                    tracing::debug!(
                        connection_id = %conn.id,
                        backend = ?conn.remote,
                        "Backend connected"
                    );
                    greeting = conn.greeting.take().zip(conn.linked());
                    true
                }
                Ok(false) => return Ok(()),
                Err(source) => {
                    return Err(DispatchError::BackendUnreachable {
                        addr: self.settings.backend,
                        source,
                    })
                }
            }
        };

        if let Some((bytes, owner)) = greeting {
            if let Some(client) = self.connections.get_mut(&owner) {
                client.outbound.push(&bytes);
            }
            self.flush(owner)?;
        }

        self.flush(token)?;

        let Some(conn) = self.connections.get(&token) else {
            return Ok(());
        };
        let Handler::Relay(pump) = &conn.handler else {
            return Ok(());
        };
        let source = pump.peer();
        let drained = conn.outbound.len() < self.settings.relay_buffer_bytes;

        if just_connected {
            // Anything the backend sent before hand-off is still unread.
            self.pump_relay(token)?;
        }
        if drained && self.is_paused(source) {
            self.pump_relay(source)?;
        }
        Ok(())
    }

    /// Read client bytes into the session and act on its decision.
    fn negotiate(&mut self, token: Token) -> Result<(), DispatchError> {
        loop {
            let Some(conn) = self.connections.get_mut(&token) else {
                return Ok(());
            };
            let Handler::Tunnel(session) = &mut conn.handler else {
                return Ok(());
            };
            if !session.is_negotiating() || conn.close_after_flush {
                return Ok(());
            }

            let (read, stop) = drain_into(
                &mut conn.stream,
                session.buffer_mut(),
                self.settings.max_request_bytes,
                &mut self.scratch,
            )?;
            // No new bytes, no new decision.
            let step = if read > 0 {
                session.advance(&self.settings.tunnel_context())
            } else {
                Step::Wait
            };
            let id = conn.id;
            self.apply(token, id, step)?;

            match stop {
                DrainStop::WouldBlock => return Ok(()),
                DrainStop::Limit if read > 0 => continue,
                DrainStop::Limit => return Ok(()),
                DrainStop::Eof => {
                    let negotiating = self.connections.get(&token).is_some_and(|c| {
                        matches!(c.handler, Handler::Tunnel(_)) && !c.close_after_flush
                    });
                    if negotiating {
                        tracing::debug!(connection_id = %id, "Client closed during negotiation");
                        self.close_pair(token);
                    }
                    return Ok(());
                }
            }
        }
    }

    fn apply(&mut self, token: Token, id: ConnectionId, step: Step) -> Result<(), DispatchError> {
        if let Some(outcome) = step.outcome() {
            metrics::record_request(outcome);
        }

        match step {
            Step::Wait => Ok(()),
            Step::Reject { response, reason } => {
                tracing::info!(
                    connection_id = %id,
                    status = response.code,
                    reason = %reason,
                    "Request rejected"
                );
                self.drop_stale_peer(token);
                self.respond(token, &response, true)
            }
            Step::Connect {
                response,
                host,
                early_data,
            } => {
                self.drop_stale_peer(token);
                let peer = self.open_backend(token)?;
                if let Some(session) = self.session_mut(token) {
                    session.attach_peer(peer);
                }
                // The 200 goes out only once the backend connect succeeds.
                if let Some(backend) = self.connections.get_mut(&peer) {
                    backend.greeting = Some(response.to_bytes());
                }
                tracing::info!(
                    connection_id = %id,
                    host = %host,
                    backend = %self.settings.backend,
                    "Tunnel requested"
                );
                if early_data.is_empty() {
                    Ok(())
                } else {
                    self.install_relay(token, peer, early_data)
                }
            }
            Step::Redirect { response, location } => {
                self.drop_stale_peer(token);
                tracing::info!(connection_id = %id, location = %location, "Redirected to https");
                self.respond(token, &response, false)
            }
            Step::Forward { payload, raw } => {
                let peer = match self.session_mut(token).and_then(|s| s.peer()) {
                    Some(peer) => peer,
                    None => self.open_backend(token)?,
                };
                tracing::info!(
                    connection_id = %id,
                    raw,
                    bytes = payload.len(),
                    "Forwarding to backend"
                );
                self.install_relay(token, peer, payload)
            }
        }
    }

    fn session_mut(&mut self, token: Token) -> Option<&mut TunnelSession> {
        match &mut self.connections.get_mut(&token)?.handler {
            Handler::Tunnel(session) => Some(session),
            _ => None,
        }
    }

    fn drop_stale_peer(&mut self, token: Token) {
        if let Some(stale) = self.session_mut(token).and_then(|s| s.detach_peer()) {
            self.close_connection(stale);
        }
    }

    fn respond(&mut self, token: Token, response: &Response, close: bool) -> Result<(), DispatchError> {
        if let Some(conn) = self.connections.get_mut(&token) {
            conn.outbound.push(&response.to_bytes());
            conn.close_after_flush |= close;
        }
        self.flush(token)
    }

    /// Start a non-blocking connect to the backend on behalf of `owner`.
    fn open_backend(&mut self, owner: Token) -> Result<Token, DispatchError> {
        let addr = self.settings.backend;
        let mut stream = TcpStream::connect(addr)
            .map_err(|source| DispatchError::BackendUnreachable { addr, source })?;

        let token = self.allocate_token();
        self.poll
            .registry()
            .register(&mut stream, token, Interest::READABLE | Interest::WRITABLE)?;

        let conn = Connection::backend(stream, owner);
        tracing::debug!(connection_id = %conn.id, backend = %addr, "Connecting to backend");
        self.connections.insert(token, conn);
        Ok(token)
    }

    /// Turn `client` and `peer` into a relay pair, with `initial` queued
    /// toward the backend ahead of anything else.
    fn install_relay(&mut self, client: Token, peer: Token, initial: Vec<u8>) -> Result<(), DispatchError> {
        let Some(backend) = self.connections.get_mut(&peer) else {
            return Err(DispatchError::PeerClosed);
        };
        backend.handler = Handler::Relay(RelayPump::new(client, Direction::BackendToClient));
        backend.outbound.push(&initial);

        let Some(conn) = self.connections.get_mut(&client) else {
            self.close_connection(peer);
            return Ok(());
        };
        conn.handler = Handler::Relay(RelayPump::new(peer, Direction::ClientToBackend));
        tracing::debug!(connection_id = %conn.id, initial_bytes = initial.len(), "Relay installed");

        metrics::tunnel_opened();
        metrics::record_relay_bytes(Direction::ClientToBackend, initial.len());

        self.flush(peer)?;
        self.pump_relay(client)?;
        self.pump_relay(peer)
    }

    fn is_paused(&self, token: Token) -> bool {
        self.connections
            .get(&token)
            .is_some_and(|c| matches!(&c.handler, Handler::Relay(pump) if pump.is_paused()))
    }

    /// Move bytes from `token` toward its relay peer.
    fn pump_relay(&mut self, token: Token) -> Result<(), DispatchError> {
        let Some(mut source) = self.connections.remove(&token) else {
            return Ok(());
        };

        let pumped = match &mut source.handler {
            Handler::Relay(pump) if source.connected && !pump.is_source_closed() => {
                let peer = pump.peer();
                match self.connections.get_mut(&peer) {
                    Some(dest) => {
                        let sink = if dest.connected { Some(&mut dest.stream) } else { None };
                        Some(
                            pump.pump(
                                &mut source.stream,
                                &mut dest.outbound,
                                sink,
                                &mut self.scratch,
                                self.settings.relay_buffer_bytes,
                            )
                            .map(|(bytes, outcome)| (peer, pump.direction(), bytes, outcome)),
                        )
                    }
                    None => Some(Err(io::Error::new(io::ErrorKind::NotConnected, "relay peer is gone"))),
                }
            }
            _ => None,
        };
        self.connections.insert(token, source);

        let Some(pumped) = pumped else {
            return Ok(());
        };
        let (peer, direction, bytes, outcome) = pumped?;
        if bytes > 0 {
            metrics::record_relay_bytes(direction, bytes);
        }

        match outcome {
            // A paused source is resumed from the peer's writable event.
            PumpOutcome::Drained | PumpOutcome::Paused => Ok(()),
            PumpOutcome::SourceClosed => {
                tracing::debug!(
                    direction = direction.as_str(),
                    "Relay source closed, flushing peer before close"
                );
                if let Some(dest) = self.connections.get_mut(&peer) {
                    dest.close_after_flush = true;
                }
                self.flush(peer)
            }
        }
    }

    /// Write queued bytes; close the pair once a closing socket is empty.
    fn flush(&mut self, token: Token) -> Result<(), DispatchError> {
        let Some(conn) = self.connections.get_mut(&token) else {
            return Ok(());
        };
        if !conn.connected {
            return Ok(());
        }
        let flushed = conn.outbound.flush_into(&mut conn.stream)?;
        if flushed == Flush::Done && conn.close_after_flush {
            self.close_pair(token);
        }
        Ok(())
    }

    fn close_connection(&mut self, token: Token) -> Option<Connection> {
        let mut conn = self.connections.remove(&token)?;
        if let Err(e) = self.poll.registry().deregister(&mut conn.stream) {
            tracing::trace!(connection_id = %conn.id, error = %e, "Deregister failed");
        }
        if conn.side == Side::Client {
            self.clients = self.clients.saturating_sub(1);
        }
        if let Handler::Relay(pump) = &conn.handler {
            if pump.direction() == Direction::ClientToBackend {
                metrics::tunnel_closed();
            }
            tracing::debug!(
                connection_id = %conn.id,
                forwarded = pump.forwarded(),
                direction = pump.direction().as_str(),
                "Relay closed"
            );
        }
        tracing::debug!(connection_id = %conn.id, peer_addr = ?conn.remote, "Connection closed");
        Some(conn)
    }

    /// Close `token` and whatever it is paired with.
    fn close_pair(&mut self, token: Token) {
        if let Some(conn) = self.close_connection(token) {
            if let Some(other) = conn.linked() {
                self.close_connection(other);
            }
        }
    }
}
