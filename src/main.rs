//! lineward: a line-protocol TCP server on a single event loop.
//!
//! Clients send CRLF-terminated messages; the server answers each one, in
//! order, through a pluggable message handler.
//!
//! Features:
//! - One thread, one edge-triggered poller, many connections
//! - Bounded per-connection framing buffers
//! - Buffered replies with write-readiness resumption
//! - Graceful shutdown on SIGINT/SIGTERM
//! - Configuration via CLI arguments or TOML file

mod config;
mod protocols;
mod runtime;

use config::Config;
use tracing::info;
use tracing_subscriber::EnvFilter;

fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Load configuration
    let config = Config::load()?;

    // Initialize logging
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.log_level));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .init();

    info!(
        listen = %config.listen,
        backlog = config.backlog,
        protocol = ?config.protocol,
        max_connections = config.max_connections,
        max_frame = config.max_frame,
        "Starting lineward server"
    );

    runtime::run(config)?;
    Ok(())
}
