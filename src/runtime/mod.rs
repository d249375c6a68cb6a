//! Single-threaded, readiness-driven runtime.
//!
//! Built on mio (epoll on Linux, kqueue on macOS):
//! - `Listener`: bound, non-blocking listening socket
//! - `ConnectionRegistry`: live connections keyed by poll token
//! - `ConnectionBuffer`: per-connection CRLF framing
//! - `Reactor`: the event loop tying them to a `MessageHandler`

mod buffer;
mod connection;
mod event_loop;
mod listener;
mod shutdown;

pub use event_loop::{Reactor, ReactorError};
pub use shutdown::ShutdownHandle;

use crate::config::Config;
use crate::protocols::Protocol;

/// Serve the configured protocol until SIGINT/SIGTERM.
pub fn run(config: Config) -> Result<(), ReactorError> {
    let protocol = Protocol::from(config.protocol);
    let reactor = Reactor::new(&config, protocol)?;

    reactor
        .shutdown_handle()
        .install_signal_handlers()
        .map_err(ReactorError::Setup)?;

    reactor.run()
}
