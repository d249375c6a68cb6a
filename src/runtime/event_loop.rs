//! The reactor: a single-threaded, edge-triggered event loop.
//!
//! Readiness-based model: poll tells us when sockets are ready, then we
//! perform non-blocking read/write syscalls. mio registrations are
//! edge-triggered, so every readiness event is drained until the kernel
//! reports `WouldBlock`; stopping early would strand bytes with no further
//! event to announce them.
//!
//! ## Per-connection flow
//!
//! ```text
//! readable -> read chunk -> ConnectionBuffer::append -> next_message
//!          -> MessageHandler::handle -> output -> flush
//! ```
//!
//! Replies the socket cannot take yet stay in the connection's output buffer
//! and write interest is registered until they drain. Once pending output
//! reaches the high watermark the connection stops reading; the reactor
//! resumes the read drain itself after the output shrinks.

use crate::config::{Config, ConfigError};
use crate::protocols::{Action, MessageHandler};
use crate::runtime::buffer::FrameTooLarge;
use crate::runtime::connection::{
    flush_output, Connection, ConnectionError, ConnectionId, ConnectionRegistry, Flush,
};
use crate::runtime::listener::{Listener, ListenerError};
use crate::runtime::shutdown::ShutdownHandle;
use mio::event::Event;
use mio::net::TcpStream;
use mio::{Events, Interest, Poll, Registry, Token, Waker};
use std::io::{self, Read};
use std::net::SocketAddr;
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, error, info, trace, warn};

const LISTENER_TOKEN: Token = Token(usize::MAX);
const WAKER_TOKEN: Token = Token(usize::MAX - 1);

/// Errors that stop the reactor.
#[derive(Debug, Error)]
pub enum ReactorError {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error(transparent)]
    Listener(#[from] ListenerError),
    #[error("failed to set up event loop: {0}")]
    Setup(#[source] io::Error),
    #[error("readiness wait failed: {0}")]
    Wait(#[source] io::Error),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum RunState {
    Running,
    Stopping,
}

/// Owns the poller, the listening socket and every live connection.
pub struct Reactor<H> {
    poll: Poll,
    listener: Listener,
    registry: ConnectionRegistry,
    handler: H,
    shutdown: ShutdownHandle,
    state: RunState,
    /// Read staging area shared by all connections.
    scratch: Vec<u8>,
    poll_timeout: Duration,
    max_events: usize,
    max_frame: usize,
    nodelay: bool,
    write_high_watermark: usize,
}

impl<H: MessageHandler> Reactor<H> {
    /// Bind the listener and prepare the poller.
    pub fn new(config: &Config, handler: H) -> Result<Self, ReactorError> {
        config.validate()?;
        let mut listener = Listener::bind(config.listen, config.backlog)?;

        let poll = Poll::new().map_err(ReactorError::Setup)?;
        poll.registry()
            .register(listener.source(), LISTENER_TOKEN, Interest::READABLE)
            .map_err(ReactorError::Setup)?;
        let waker = Waker::new(poll.registry(), WAKER_TOKEN).map_err(ReactorError::Setup)?;

        Ok(Self {
            poll,
            listener,
            registry: ConnectionRegistry::new(config.max_connections),
            handler,
            shutdown: ShutdownHandle::new(waker),
            state: RunState::Running,
            scratch: vec![0u8; config.read_chunk],
            poll_timeout: config.poll_timeout,
            max_events: config.max_events,
            max_frame: config.max_frame,
            nodelay: config.nodelay,
            write_high_watermark: config.write_high_watermark,
        })
    }

    pub fn local_addr(&self) -> io::Result<SocketAddr> {
        self.listener.local_addr()
    }

    /// Handle for stopping this reactor from another thread or a signal.
    pub fn shutdown_handle(&self) -> ShutdownHandle {
        self.shutdown.clone()
    }

    /// Drive the event loop until shutdown is requested or the wait fails.
    ///
    /// All connections and the listening socket are closed before returning.
    pub fn run(mut self) -> Result<(), ReactorError> {
        let mut events = Events::with_capacity(self.max_events);
        let mut result = Ok(());

        if let Ok(addr) = self.local_addr() {
            info!(addr = %addr, "Listening");
        }

        while self.state == RunState::Running {
            if let Err(e) = self.turn(&mut events) {
                error!(error = %e, "Event loop failed");
                self.state = RunState::Stopping;
                result = Err(e);
            }
        }

        self.close_all();
        result
    }

    /// One iteration: observe the stop flag, wait, dispatch.
    fn turn(&mut self, events: &mut Events) -> Result<(), ReactorError> {
        if self.shutdown.is_requested() {
            info!(connections = self.registry.len(), "Shutdown requested");
            self.state = RunState::Stopping;
            return Ok(());
        }

        match self.poll.poll(events, Some(self.poll_timeout)) {
            Ok(()) => {}
            Err(ref e) if e.kind() == io::ErrorKind::Interrupted => return Ok(()),
            Err(e) => return Err(ReactorError::Wait(e)),
        }

        for event in events.iter() {
            match event.token() {
                LISTENER_TOKEN => self.accept_connections(),
                // The stop flag is checked at the top of the next turn
                WAKER_TOKEN => {}
                token => {
                    let id = ConnectionId::from(token);
                    if let Err(e) = self.handle_connection_event(id, event) {
                        self.close_connection(id, e);
                    }
                }
            }
        }

        Ok(())
    }

    /// Accept until the listener reports no pending connection.
    fn accept_connections(&mut self) {
        loop {
            match self.listener.accept() {
                Ok(Some((stream, peer))) => self.register_connection(stream, peer),
                Ok(None) => break,
                Err(e) => {
                    error!(error = %e, "Accept error");
                    break;
                }
            }
        }
    }

    fn register_connection(&mut self, stream: TcpStream, peer: SocketAddr) {
        if self.nodelay {
            if let Err(e) = stream.set_nodelay(true) {
                debug!(peer = %peer, error = %e, "Failed to set TCP_NODELAY");
            }
        }

        let id = match self
            .registry
            .register(Connection::new(stream, peer, self.max_frame))
        {
            Ok(id) => id,
            Err(_rejected) => {
                warn!(peer = %peer, "Connection limit reached");
                return;
            }
        };

        let Some(conn) = self.registry.lookup(id) else {
            return;
        };
        let fd = conn.fd();
        if let Err(e) = self
            .poll
            .registry()
            .register(&mut conn.stream, id.token(), Interest::READABLE)
        {
            error!(peer = %peer, error = %e, "Failed to register connection");
            self.registry.unregister(id);
            return;
        }

        debug!(
            conn = %id,
            fd,
            peer = %peer,
            connections = self.registry.len(),
            "Connection registered"
        );
    }

    fn handle_connection_event(
        &mut self,
        id: ConnectionId,
        event: &Event,
    ) -> Result<(), ConnectionError> {
        let Reactor {
            poll,
            registry,
            handler,
            scratch,
            write_high_watermark,
            ..
        } = self;

        let Some(conn) = registry.lookup(id) else {
            return Ok(());
        };

        if event.is_error() {
            let err = conn
                .stream
                .take_error()?
                .unwrap_or_else(|| io::Error::other("socket error"));
            return Err(err.into());
        }

        if event.is_writable() && !conn.output.is_empty() {
            conn.flush()?;
        }

        let resume = conn.read_paused && conn.output.len() < *write_high_watermark;
        if event.is_readable() || event.is_read_closed() || resume {
            drain_readable(conn, handler, scratch, *write_high_watermark, id)?;
        }

        if conn.is_closing() && conn.output.is_empty() {
            return Err(ConnectionError::HandlerClosed);
        }

        update_interest(poll.registry(), id, conn)?;
        Ok(())
    }

    /// Tear down a connection: remove it, deregister, close the socket.
    fn close_connection(&mut self, id: ConnectionId, reason: ConnectionError) {
        let Some(mut conn) = self.registry.unregister(id) else {
            return;
        };
        let _ = self.poll.registry().deregister(&mut conn.stream);

        match &reason {
            ConnectionError::Closed | ConnectionError::HandlerClosed => {
                debug!(conn = %id, peer = %conn.peer, reason = %reason, "Connection closed");
            }
            ConnectionError::FrameTooLarge(_) => {
                warn!(conn = %id, peer = %conn.peer, error = %reason, "Closing connection");
            }
            ConnectionError::Io(_) => {
                error!(conn = %id, peer = %conn.peer, error = %reason, "Closing connection");
            }
        }
        // Dropping the stream closes the socket
    }

    fn close_all(&mut self) {
        let mut closed = 0usize;
        for (_id, mut conn) in self.registry.drain() {
            let _ = conn.flush();
            let _ = self.poll.registry().deregister(&mut conn.stream);
            closed += 1;
        }
        let _ = self.poll.registry().deregister(self.listener.source());
        info!(closed, "Shutdown complete");
    }
}

/// Read until `WouldBlock`, feeding every complete message to the handler.
fn drain_readable<H: MessageHandler>(
    conn: &mut Connection,
    handler: &mut H,
    scratch: &mut [u8],
    write_high_watermark: usize,
    id: ConnectionId,
) -> Result<(), ConnectionError> {
    conn.read_paused = false;

    loop {
        if conn.is_closing() {
            return Ok(());
        }
        if conn.output.len() >= write_high_watermark {
            conn.read_paused = true;
            return Ok(());
        }

        let spare = conn.input.remaining();
        if spare == 0 {
            return Err(FrameTooLarge {
                limit: conn.input.limit(),
            }
            .into());
        }
        let want = spare.min(scratch.len());

        let n = match conn.stream.read(&mut scratch[..want]) {
            Ok(0) => return Err(ConnectionError::Closed),
            Ok(n) => n,
            Err(ref e) if e.kind() == io::ErrorKind::WouldBlock => return Ok(()),
            Err(ref e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(e.into()),
        };

        conn.input.append(&scratch[..n])?;
        trace!(conn = %id, read = n, buffered = conn.input.len(), "Read");
        process_messages(conn, handler, id)?;
    }
}

/// Reply to every complete message, in order.
fn process_messages<H: MessageHandler>(
    conn: &mut Connection,
    handler: &mut H,
    id: ConnectionId,
) -> Result<(), ConnectionError> {
    let mut close = false;
    let Connection {
        input,
        output,
        stream,
        ..
    } = conn;

    for message in input.messages() {
        trace!(conn = %id, len = message.len(), "Dispatching message");
        let action = handler.handle(&message, output);

        if flush_output(stream, output)? == Flush::Blocked {
            trace!(conn = %id, pending = output.len(), "Output blocked");
        }

        if action == Action::Close {
            close = true;
            break;
        }
    }

    if close {
        conn.close();
    }
    Ok(())
}

/// Register write interest exactly while output is pending.
fn update_interest(
    registry: &Registry,
    id: ConnectionId,
    conn: &mut Connection,
) -> io::Result<()> {
    let wanted = if conn.output.is_empty() {
        Interest::READABLE
    } else {
        Interest::READABLE | Interest::WRITABLE
    };

    if wanted != conn.interest {
        registry.reregister(&mut conn.stream, id.token(), wanted)?;
        conn.interest = wanted;
    }
    Ok(())
}
