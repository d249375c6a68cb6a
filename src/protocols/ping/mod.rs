//! Ping protocol implementation.
//!
//! A minimal protocol for health checks and latency measurement:
//! - Client sends: `PING\r\n` or `PING <message>\r\n`
//! - Server responds: `PONG\r\n` or `PONG <message>\r\n`
//!
//! ## Protocol Format
//!
//! ```text
//! Request:  PING\r\n
//! Response: PONG\r\n
//!
//! Request:  PING hello\r\n
//! Response: PONG hello\r\n
//!
//! Request:  QUIT\r\n
//! Response: OK\r\n        (then the server closes the connection)
//! ```

pub mod parser;

use super::Action;
use bytes::BytesMut;
use parser::Command;

pub fn process(message: &[u8], reply: &mut BytesMut) -> Action {
    match parser::parse(message) {
        Some(Command::Ping) => {
            reply.extend_from_slice(b"PONG\r\n");
            Action::Continue
        }
        Some(Command::PingMsg(msg)) => {
            reply.reserve(5 + msg.len() + 2); // "PONG " + msg + "\r\n"
            reply.extend_from_slice(b"PONG ");
            reply.extend_from_slice(msg);
            reply.extend_from_slice(b"\r\n");
            Action::Continue
        }
        Some(Command::Quit) => {
            reply.extend_from_slice(b"OK\r\n");
            Action::Close
        }
        None => {
            reply.extend_from_slice(b"ERROR unknown command\r\n");
            Action::Continue
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn run(message: &[u8]) -> (Action, BytesMut) {
        let mut reply = BytesMut::new();
        let action = process(message, &mut reply);
        (action, reply)
    }

    #[test]
    fn test_pong() {
        let (action, reply) = run(b"PING");
        assert_eq!(action, Action::Continue);
        assert_eq!(&reply[..], b"PONG\r\n");
    }

    #[test]
    fn test_pong_with_message() {
        let (_, reply) = run(b"PING hello");
        assert_eq!(&reply[..], b"PONG hello\r\n");
    }

    #[test]
    fn test_quit_closes() {
        let (action, reply) = run(b"quit");
        assert_eq!(action, Action::Close);
        assert_eq!(&reply[..], b"OK\r\n");
    }

    #[test]
    fn test_unknown_command_keeps_connection() {
        let (action, reply) = run(b"GET x");
        assert_eq!(action, Action::Continue);
        assert_eq!(&reply[..], b"ERROR unknown command\r\n");
    }
}
