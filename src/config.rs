//! Configuration module for the lineward server.
//!
//! Supports both command-line arguments and TOML configuration file.
//! CLI arguments take precedence over config file values.

use clap::{Parser, ValueEnum};
use serde::Deserialize;
use std::net::{Ipv4Addr, SocketAddr, SocketAddrV4};
use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

/// Bundled message handlers selectable at startup.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize, ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum ProtocolType {
    /// Reply `ok\r\n` to every message
    #[default]
    Ack,
    /// PING/PONG with QUIT
    Ping,
    /// Echo each message back
    Echo,
}

/// Command-line arguments for the server
#[derive(Parser, Debug)]
#[command(name = "lineward")]
#[command(author = "lineward authors")]
#[command(version = "0.1.0")]
#[command(about = "A CRLF line-protocol server on a single edge-triggered reactor", long_about = None)]
pub struct CliArgs {
    /// Path to TOML configuration file
    #[arg(short, long)]
    pub config: Option<PathBuf>,

    /// IPv4 address to bind to
    #[arg(long)]
    pub host: Option<String>,

    /// TCP port to listen on
    #[arg(short, long)]
    pub port: Option<u16>,

    /// Listen backlog (defaults to the OS maximum)
    #[arg(long)]
    pub backlog: Option<i32>,

    /// Maximum number of simultaneously open connections
    #[arg(long)]
    pub max_connections: Option<usize>,

    /// Enable or disable TCP_NODELAY on accepted sockets
    #[arg(long)]
    pub nodelay: Option<bool>,

    /// Message handler to serve
    #[arg(long, value_enum)]
    pub protocol: Option<ProtocolType>,

    /// Largest unterminated message a connection may buffer, in bytes
    #[arg(long)]
    pub max_frame: Option<usize>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, default_value = "info")]
    pub log_level: String,
}

/// TOML configuration file structure
#[derive(Debug, Deserialize, Default)]
pub struct TomlConfig {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub runtime: RuntimeConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Server-related configuration
#[derive(Debug, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
    /// Listen backlog; unset means `SOMAXCONN`
    pub backlog: Option<i32>,
    #[serde(default = "default_max_connections")]
    pub max_connections: usize,
    #[serde(default = "default_nodelay")]
    pub nodelay: bool,
    #[serde(default)]
    pub protocol: ProtocolType,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            backlog: None,
            max_connections: default_max_connections(),
            nodelay: default_nodelay(),
            protocol: ProtocolType::default(),
        }
    }
}

/// Event loop tuning
#[derive(Debug, Deserialize)]
pub struct RuntimeConfig {
    /// Upper bound on a single readiness wait, in milliseconds
    #[serde(default = "default_poll_timeout_ms")]
    pub poll_timeout_ms: u64,
    /// Events retrieved per wait
    #[serde(default = "default_max_events")]
    pub max_events: usize,
    /// Bytes requested per non-blocking read
    #[serde(default = "default_read_chunk")]
    pub read_chunk: usize,
    /// Per-connection input buffer cap
    #[serde(default = "default_max_frame")]
    pub max_frame: usize,
    /// Pending output at which reads are paused
    #[serde(default = "default_write_high_watermark")]
    pub write_high_watermark: usize,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            poll_timeout_ms: default_poll_timeout_ms(),
            max_events: default_max_events(),
            read_chunk: default_read_chunk(),
            max_frame: default_max_frame(),
            write_high_watermark: default_write_high_watermark(),
        }
    }
}

/// Logging configuration
#[derive(Debug, Deserialize)]
pub struct LoggingConfig {
    /// Log level
    #[serde(default = "default_log_level")]
    pub level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

fn default_host() -> String {
    "0.0.0.0".to_string()
}

fn default_port() -> u16 {
    6379
}

fn default_max_connections() -> usize {
    10_000
}

fn default_nodelay() -> bool {
    true
}

fn default_poll_timeout_ms() -> u64 {
    1000
}

fn default_max_events() -> usize {
    1024
}

fn default_read_chunk() -> usize {
    1024
}

fn default_max_frame() -> usize {
    64 * 1024
}

fn default_write_high_watermark() -> usize {
    256 * 1024
}

fn default_log_level() -> String {
    "info".to_string()
}

/// Final resolved configuration
#[derive(Debug, Clone)]
pub struct Config {
    pub listen: SocketAddr,
    pub backlog: i32,
    pub max_connections: usize,
    pub nodelay: bool,
    pub protocol: ProtocolType,
    pub poll_timeout: Duration,
    pub max_events: usize,
    pub read_chunk: usize,
    pub max_frame: usize,
    pub write_high_watermark: usize,
    pub log_level: String,
}

impl Default for Config {
    fn default() -> Self {
        let server = ServerConfig::default();
        let runtime = RuntimeConfig::default();
        Self {
            listen: SocketAddr::V4(SocketAddrV4::new(Ipv4Addr::UNSPECIFIED, server.port)),
            backlog: libc::SOMAXCONN,
            max_connections: server.max_connections,
            nodelay: server.nodelay,
            protocol: server.protocol,
            poll_timeout: Duration::from_millis(runtime.poll_timeout_ms),
            max_events: runtime.max_events,
            read_chunk: runtime.read_chunk,
            max_frame: runtime.max_frame,
            write_high_watermark: runtime.write_high_watermark,
            log_level: default_log_level(),
        }
    }
}

impl Config {
    /// Load configuration from CLI args and optional TOML file.
    /// CLI arguments take precedence over TOML file values.
    pub fn load() -> Result<Self, ConfigError> {
        Self::from_cli(CliArgs::parse())
    }

    fn from_cli(cli: CliArgs) -> Result<Self, ConfigError> {
        let toml_config = if let Some(ref config_path) = cli.config {
            let contents = std::fs::read_to_string(config_path)
                .map_err(|e| ConfigError::FileRead(config_path.clone(), e))?;
            toml::from_str(&contents)
                .map_err(|e| ConfigError::TomlParse(config_path.clone(), e))?
        } else {
            TomlConfig::default()
        };

        Self::merge(cli, toml_config)
    }

    fn merge(cli: CliArgs, toml_config: TomlConfig) -> Result<Self, ConfigError> {
        let host = cli.host.unwrap_or(toml_config.server.host);
        let ip: Ipv4Addr = host
            .parse()
            .map_err(|_| ConfigError::InvalidAddress(host.clone()))?;
        let port = cli.port.unwrap_or(toml_config.server.port);

        let config = Config {
            listen: SocketAddr::V4(SocketAddrV4::new(ip, port)),
            backlog: cli
                .backlog
                .or(toml_config.server.backlog)
                .unwrap_or(libc::SOMAXCONN),
            max_connections: cli
                .max_connections
                .unwrap_or(toml_config.server.max_connections),
            nodelay: cli.nodelay.unwrap_or(toml_config.server.nodelay),
            protocol: cli.protocol.unwrap_or(toml_config.server.protocol),
            poll_timeout: Duration::from_millis(toml_config.runtime.poll_timeout_ms),
            max_events: toml_config.runtime.max_events,
            read_chunk: toml_config.runtime.read_chunk,
            max_frame: cli.max_frame.unwrap_or(toml_config.runtime.max_frame),
            write_high_watermark: toml_config.runtime.write_high_watermark,
            log_level: if cli.log_level != "info" {
                cli.log_level
            } else {
                toml_config.logging.level
            },
        };

        config.validate()?;
        Ok(config)
    }

    /// Reject values the event loop cannot operate with.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.max_frame < 2 {
            return Err(ConfigError::InvalidValue {
                key: "max_frame",
                reason: "must hold at least the CRLF delimiter",
            });
        }
        if self.read_chunk == 0 {
            return Err(ConfigError::InvalidValue {
                key: "read_chunk",
                reason: "must be greater than zero",
            });
        }
        if self.max_events == 0 {
            return Err(ConfigError::InvalidValue {
                key: "max_events",
                reason: "must be greater than zero",
            });
        }
        if self.write_high_watermark == 0 {
            return Err(ConfigError::InvalidValue {
                key: "write_high_watermark",
                reason: "must be greater than zero",
            });
        }
        if self.max_connections == 0 {
            return Err(ConfigError::InvalidValue {
                key: "max_connections",
                reason: "must be greater than zero",
            });
        }
        if self.poll_timeout.is_zero() {
            return Err(ConfigError::InvalidValue {
                key: "poll_timeout_ms",
                reason: "must be greater than zero",
            });
        }
        Ok(())
    }
}

/// Configuration loading errors
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file '{}': {}", .0.display(), .1)]
    FileRead(PathBuf, #[source] std::io::Error),
    #[error("Failed to parse config file '{}': {}", .0.display(), .1)]
    TomlParse(PathBuf, #[source] toml::de::Error),
    #[error("Invalid IPv4 listen address '{0}'")]
    InvalidAddress(String),
    #[error("Invalid value for '{key}': {reason}")]
    InvalidValue {
        key: &'static str,
        reason: &'static str,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cli(args: &[&str]) -> CliArgs {
        let mut argv = vec!["lineward"];
        argv.extend_from_slice(args);
        CliArgs::parse_from(argv)
    }

    #[test]
    fn test_default_config() {
        let config = TomlConfig::default();
        assert_eq!(config.server.host, "0.0.0.0");
        assert_eq!(config.server.port, 6379);
        assert_eq!(config.server.protocol, ProtocolType::Ack);
        assert_eq!(config.runtime.poll_timeout_ms, 1000);
        assert_eq!(config.runtime.max_frame, 64 * 1024);
    }

    #[test]
    fn test_toml_parsing() {
        let toml_str = r#"
            [server]
            host = "127.0.0.1"
            port = 7000
            backlog = 128
            protocol = "ping"

            [runtime]
            poll_timeout_ms = 250
            max_frame = 2048

            [logging]
            level = "debug"
        "#;

        let config: TomlConfig = toml::from_str(toml_str).unwrap();
        assert_eq!(config.server.host, "127.0.0.1");
        assert_eq!(config.server.port, 7000);
        assert_eq!(config.server.backlog, Some(128));
        assert_eq!(config.server.protocol, ProtocolType::Ping);
        assert_eq!(config.runtime.poll_timeout_ms, 250);
        assert_eq!(config.runtime.max_frame, 2048);
        assert_eq!(config.runtime.read_chunk, 1024);
        assert_eq!(config.logging.level, "debug");
    }

    #[test]
    fn test_cli_overrides_toml() {
        let toml_config: TomlConfig = toml::from_str(
            r#"
            [server]
            port = 7000
            protocol = "echo"
        "#,
        )
        .unwrap();

        let config = Config::merge(cli(&["--port", "7100", "--max-frame", "4096"]), toml_config)
            .unwrap();
        assert_eq!(config.listen.port(), 7100);
        assert_eq!(config.protocol, ProtocolType::Echo);
        assert_eq!(config.max_frame, 4096);
        assert_eq!(config.backlog, libc::SOMAXCONN);
    }

    #[test]
    fn test_rejects_bad_host() {
        let err = Config::merge(cli(&["--host", "localhost"]), TomlConfig::default()).unwrap_err();
        assert!(matches!(err, ConfigError::InvalidAddress(h) if h == "localhost"));
    }

    #[test]
    fn test_rejects_tiny_frame() {
        let err = Config::merge(cli(&["--max-frame", "1"]), TomlConfig::default()).unwrap_err();
        assert!(matches!(err, ConfigError::InvalidValue { key: "max_frame", .. }));
    }

    #[test]
    fn test_rejects_zero_watermark() {
        let toml_config: TomlConfig = toml::from_str(
            r#"
            [runtime]
            write_high_watermark = 0
        "#,
        )
        .unwrap();

        let err = Config::merge(cli(&[]), toml_config).unwrap_err();
        assert!(matches!(err, ConfigError::InvalidValue { key: "write_high_watermark", .. }));

        let config = Config {
            write_high_watermark: 0,
            ..Config::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_rejects_zero_max_connections() {
        let err = Config::merge(cli(&["--max-connections", "0"]), TomlConfig::default()).unwrap_err();
        assert!(matches!(err, ConfigError::InvalidValue { key: "max_connections", .. }));
    }

    #[test]
    fn test_default_config_is_valid() {
        assert!(Config::default().validate().is_ok());
    }
}
