//! Message handlers.
//!
//! The event loop frames each connection's input into CRLF-delimited
//! messages and passes every message, delimiter stripped, to a
//! [`MessageHandler`]. The handler appends its reply to the connection's
//! output and tells the loop whether to keep the connection open.
//!
//! ## Bundled Handlers
//! - `ack`: replies `ok\r\n` to every message
//! - `ping`: PING/PONG with QUIT, for health checks
//! - `echo`: sends each message back

pub mod ack;
pub mod echo;
pub mod ping;

use crate::config::ProtocolType;
use bytes::BytesMut;

/// What the event loop should do after a reply.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Action {
    /// Keep serving the connection.
    Continue,
    /// Flush the reply, then close the connection.
    Close,
}

/// Produces the reply for one complete message.
///
/// Called synchronously on the event loop thread, in message order, once per
/// message. Implementations must not block.
pub trait MessageHandler {
    fn handle(&mut self, message: &[u8], reply: &mut BytesMut) -> Action;
}

impl<F> MessageHandler for F
where
    F: FnMut(&[u8], &mut BytesMut) -> Action,
{
    fn handle(&mut self, message: &[u8], reply: &mut BytesMut) -> Action {
        self(message, reply)
    }
}

/// Handler selected from configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Protocol {
    Ack,
    Ping,
    Echo,
}

impl From<ProtocolType> for Protocol {
    fn from(protocol: ProtocolType) -> Self {
        match protocol {
            ProtocolType::Ack => Protocol::Ack,
            ProtocolType::Ping => Protocol::Ping,
            ProtocolType::Echo => Protocol::Echo,
        }
    }
}

impl MessageHandler for Protocol {
    fn handle(&mut self, message: &[u8], reply: &mut BytesMut) -> Action {
        match self {
            Protocol::Ack => ack::process(message, reply),
            Protocol::Ping => ping::process(message, reply),
            Protocol::Echo => echo::process(message, reply),
        }
    }
}
