//! Ping protocol parser.
//!
//! Operates on a single framed message; the CRLF has already been stripped.

/// Parsed ping command.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command<'a> {
    /// Simple ping (no message).
    Ping,
    /// Ping with a message to echo back.
    PingMsg(&'a [u8]),
    /// Quit command.
    Quit,
}

/// Parse a ping protocol command from one message.
///
/// Returns `None` for an unknown command.
pub fn parse(line: &[u8]) -> Option<Command<'_>> {
    // Parse command (case-insensitive)
    if line.eq_ignore_ascii_case(b"PING") {
        Some(Command::Ping)
    } else if line.eq_ignore_ascii_case(b"QUIT") {
        Some(Command::Quit)
    } else if line.len() > 5 && line[..5].eq_ignore_ascii_case(b"PING ") {
        Some(Command::PingMsg(&line[5..]))
    } else {
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_ping() {
        assert_eq!(parse(b"PING"), Some(Command::Ping));
        assert_eq!(parse(b"ping"), Some(Command::Ping));
    }

    #[test]
    fn test_parse_ping_msg() {
        assert_eq!(parse(b"PING hello"), Some(Command::PingMsg(b"hello")));
        assert_eq!(parse(b"pInG a b"), Some(Command::PingMsg(b"a b")));
    }

    #[test]
    fn test_parse_quit() {
        assert_eq!(parse(b"QUIT"), Some(Command::Quit));
    }

    #[test]
    fn test_unknown_command() {
        assert_eq!(parse(b"FOO"), None);
        assert_eq!(parse(b"PING "), None);
        assert_eq!(parse(b""), None);
    }
}
