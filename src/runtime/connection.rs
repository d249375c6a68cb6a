//! Connection state and the registry of live connections.
//!
//! Each connection owns its socket, its framing buffer and any reply bytes
//! the socket has not accepted yet. The registry is the only owner of
//! connections; the event loop borrows them per event and takes them back
//! out (by value) to tear them down.

use crate::runtime::buffer::{ConnectionBuffer, FrameTooLarge};
use bytes::{Buf, BytesMut};
use mio::net::TcpStream;
use mio::{Interest, Token};
use slab::Slab;
use std::fmt;
use std::io::{self, Write};
use std::net::SocketAddr;
use std::os::unix::io::{AsRawFd, RawFd};
use thiserror::Error;

/// Identifies a live connection; doubles as its poll token.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ConnectionId(usize);

impl ConnectionId {
    pub fn token(self) -> Token {
        Token(self.0)
    }
}

impl From<Token> for ConnectionId {
    fn from(token: Token) -> Self {
        ConnectionId(token.0)
    }
}

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Why a connection is being torn down.
#[derive(Debug, Error)]
pub enum ConnectionError {
    /// Peer closed its end (zero-length read).
    #[error("connection closed by peer")]
    Closed,
    /// Handler requested close and the reply has been flushed.
    #[error("connection closed by handler")]
    HandlerClosed,
    #[error("i/o error: {0}")]
    Io(#[from] io::Error),
    #[error(transparent)]
    FrameTooLarge(#[from] FrameTooLarge),
}

/// Registration state of a connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnState {
    /// Registered with the reactor, reading input.
    Open,
    /// No more input is processed; close once pending output is flushed.
    Closing,
}

/// Outcome of a flush attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Flush {
    /// All pending output was written.
    Done,
    /// Socket stopped accepting bytes; wait for write readiness.
    Blocked,
}

/// A single accepted client connection.
#[derive(Debug)]
pub struct Connection {
    pub stream: TcpStream,
    pub peer: SocketAddr,
    pub input: ConnectionBuffer,
    /// Reply bytes not yet accepted by the socket.
    pub output: BytesMut,
    pub state: ConnState,
    /// Interest currently registered with the poller.
    pub interest: Interest,
    /// Reading stopped because too much output is pending.
    pub read_paused: bool,
}

impl Connection {
    pub fn new(stream: TcpStream, peer: SocketAddr, max_frame: usize) -> Self {
        Self {
            stream,
            peer,
            input: ConnectionBuffer::new(max_frame),
            output: BytesMut::new(),
            state: ConnState::Open,
            interest: Interest::READABLE,
            read_paused: false,
        }
    }

    pub fn fd(&self) -> RawFd {
        self.stream.as_raw_fd()
    }

    /// Write pending output until it is drained or the socket would block.
    pub fn flush(&mut self) -> io::Result<Flush> {
        flush_output(&mut self.stream, &mut self.output)
    }

    /// Mark the connection pending removal.
    pub fn close(&mut self) {
        self.state = ConnState::Closing;
    }

    pub fn is_closing(&self) -> bool {
        self.state == ConnState::Closing
    }
}

/// Write `output` to `stream` until it is drained or the socket would block.
///
/// Takes the fields separately so callers can keep the input buffer borrowed.
pub fn flush_output(stream: &mut TcpStream, output: &mut BytesMut) -> io::Result<Flush> {
    while !output.is_empty() {
        match stream.write(output) {
            Ok(0) => {
                return Err(io::Error::new(io::ErrorKind::WriteZero, "write returned 0"));
            }
            Ok(n) => output.advance(n),
            Err(ref e) if e.kind() == io::ErrorKind::WouldBlock => return Ok(Flush::Blocked),
            Err(ref e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(e),
        }
    }
    Ok(Flush::Done)
}

/// Registry of active connections using slab allocation.
///
/// Provides O(1) insert, lookup, and remove operations. A key stays bound to
/// one connection until `unregister` hands that connection back; only then
/// can a later `register` reuse it.
pub struct ConnectionRegistry {
    connections: Slab<Connection>,
    max_connections: usize,
}

impl ConnectionRegistry {
    /// Create a new registry with specified maximum capacity.
    pub fn new(max_connections: usize) -> Self {
        Self {
            connections: Slab::with_capacity(max_connections.min(1024)),
            max_connections,
        }
    }

    /// Insert a new connection into the registry.
    ///
    /// Hands the connection back if the registry is at capacity.
    pub fn register(&mut self, conn: Connection) -> Result<ConnectionId, Connection> {
        if self.connections.len() >= self.max_connections {
            return Err(conn);
        }
        Ok(ConnectionId(self.connections.insert(conn)))
    }

    /// Get a mutable reference to a connection.
    pub fn lookup(&mut self, id: ConnectionId) -> Option<&mut Connection> {
        self.connections.get_mut(id.0)
    }

    /// Remove a connection, returning ownership for disposal.
    ///
    /// Returns `None` if `id` is not registered.
    pub fn unregister(&mut self, id: ConnectionId) -> Option<Connection> {
        self.connections.try_remove(id.0)
    }

    /// Number of active connections.
    pub fn len(&self) -> usize {
        self.connections.len()
    }

    #[allow(dead_code)]
    pub fn is_empty(&self) -> bool {
        self.connections.is_empty()
    }

    /// Remove every connection.
    pub fn drain(&mut self) -> impl Iterator<Item = (ConnectionId, Connection)> + '_ {
        let ids: Vec<usize> = self.connections.iter().map(|(key, _)| key).collect();
        ids.into_iter()
            .filter_map(|key| Some((ConnectionId(key), self.connections.try_remove(key)?)))
    }
}
