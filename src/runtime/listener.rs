//! Listening socket setup and non-blocking accept.

use mio::net::{TcpListener, TcpStream};
use std::io;
use std::net::SocketAddr;
use thiserror::Error;
use tracing::debug;

/// Errors creating the listening socket.
#[derive(Debug, Error)]
pub enum ListenerError {
    /// The address/port cannot be bound.
    #[error("failed to bind {addr}: {source}")]
    Bind {
        addr: SocketAddr,
        #[source]
        source: io::Error,
    },
    /// Any other OS-level socket failure.
    #[error("socket setup failed: {0}")]
    Socket(#[source] io::Error),
}

/// The process-wide listening socket.
#[derive(Debug)]
pub struct Listener {
    inner: TcpListener,
}

impl Listener {
    /// Bind to `addr` with address reuse, non-blocking, listening with `backlog`.
    pub fn bind(addr: SocketAddr, backlog: i32) -> Result<Self, ListenerError> {
        let socket = socket2::Socket::new(
            match addr {
                SocketAddr::V4(_) => socket2::Domain::IPV4,
                SocketAddr::V6(_) => socket2::Domain::IPV6,
            },
            socket2::Type::STREAM,
            Some(socket2::Protocol::TCP),
        )
        .map_err(ListenerError::Socket)?;

        socket
            .set_reuse_address(true)
            .map_err(ListenerError::Socket)?;
        socket.set_nonblocking(true).map_err(ListenerError::Socket)?;
        socket
            .bind(&addr.into())
            .map_err(|source| bind_error(addr, source))?;
        socket
            .listen(backlog)
            .map_err(|source| bind_error(addr, source))?;

        let std_listener: std::net::TcpListener = socket.into();
        Ok(Self {
            inner: TcpListener::from_std(std_listener),
        })
    }

    /// A single non-blocking accept attempt.
    ///
    /// `Ok(None)` means no connection is pending and the caller should stop
    /// accepting for this readiness event. Accepted streams are already in
    /// non-blocking mode.
    pub fn accept(&self) -> io::Result<Option<(TcpStream, SocketAddr)>> {
        loop {
            match self.inner.accept() {
                Ok((stream, peer)) => {
                    debug!(peer = %peer, "Accepted connection");
                    return Ok(Some((stream, peer)));
                }
                Err(ref e) if e.kind() == io::ErrorKind::WouldBlock => return Ok(None),
                Err(ref e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => return Err(e),
            }
        }
    }

    pub fn local_addr(&self) -> io::Result<SocketAddr> {
        self.inner.local_addr()
    }

    /// Borrow the mio source for (de)registration.
    pub fn source(&mut self) -> &mut TcpListener {
        &mut self.inner
    }
}

fn bind_error(addr: SocketAddr, source: io::Error) -> ListenerError {
    match source.kind() {
        io::ErrorKind::AddrInUse
        | io::ErrorKind::AddrNotAvailable
        | io::ErrorKind::PermissionDenied => ListenerError::Bind { addr, source },
        _ => ListenerError::Socket(source),
    }
}
