//! Per-connection input buffering and CRLF framing.
//!
//! Bytes read from a socket are appended to a `ConnectionBuffer`, which hands
//! out complete messages (delimiter stripped) and keeps any trailing partial
//! message at its head for the next read.
//!
//! ## Bounded Growth
//!
//! The buffer has a fixed cap. Appending past it fails with `FrameTooLarge`
//! instead of dropping bytes, so a peer that never sends a delimiter gets its
//! connection closed rather than silently corrupting the stream.

use bytes::{Bytes, BytesMut};
use thiserror::Error;

/// Message delimiter.
pub const CRLF: &[u8] = b"\r\n";

/// The input buffer reached its cap without a complete message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("frame exceeds {limit} bytes without a delimiter")]
pub struct FrameTooLarge {
    pub limit: usize,
}

/// Accumulated-but-not-yet-framed input for one connection.
#[derive(Debug)]
pub struct ConnectionBuffer {
    buf: BytesMut,
    /// Offset below which no delimiter can start.
    scanned: usize,
    limit: usize,
}

impl ConnectionBuffer {
    /// Create an empty buffer that holds at most `limit` bytes.
    pub fn new(limit: usize) -> Self {
        Self {
            buf: BytesMut::new(),
            scanned: 0,
            limit,
        }
    }

    /// Append newly read bytes to the tail.
    ///
    /// Fails without modifying the buffer if the result would exceed the cap.
    pub fn append(&mut self, bytes: &[u8]) -> Result<(), FrameTooLarge> {
        if self.buf.len() + bytes.len() > self.limit {
            return Err(FrameTooLarge { limit: self.limit });
        }
        self.buf.extend_from_slice(bytes);
        Ok(())
    }

    /// Lazily extract every complete message currently buffered.
    ///
    /// Once the iterator is exhausted only a partial message (or nothing)
    /// remains. Dropping it early leaves the rest for the next call.
    pub fn messages(&mut self) -> Messages<'_> {
        Messages { buffer: self }
    }

    /// Pop the next complete message, if any.
    pub fn next_message(&mut self) -> Option<Bytes> {
        let start = self.scanned;
        match find_crlf(&self.buf[start..]) {
            Some(pos) => {
                let end = start + pos;
                let mut frame = self.buf.split_to(end + CRLF.len());
                frame.truncate(end);
                self.scanned = 0;
                Some(frame.freeze())
            }
            None => {
                // A trailing '\r' may still pair with the next byte
                self.scanned = self.buf.len().saturating_sub(1);
                None
            }
        }
    }

    /// Bytes buffered (the in-progress message).
    pub fn len(&self) -> usize {
        self.buf.len()
    }

    #[allow(dead_code)]
    pub fn is_empty(&self) -> bool {
        self.buf.is_empty()
    }

    /// Bytes that can still be appended before hitting the cap.
    pub fn remaining(&self) -> usize {
        self.limit - self.buf.len()
    }

    pub fn limit(&self) -> usize {
        self.limit
    }
}

/// Iterator over complete messages, see [`ConnectionBuffer::messages`].
pub struct Messages<'a> {
    buffer: &'a mut ConnectionBuffer,
}

impl Iterator for Messages<'_> {
    type Item = Bytes;

    fn next(&mut self) -> Option<Bytes> {
        self.buffer.next_message()
    }
}

/// Find \r\n in buffer, returning the position of \r.
fn find_crlf(buffer: &[u8]) -> Option<usize> {
    buffer.windows(CRLF.len()).position(|w| w == CRLF)
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn drain(buffer: &mut ConnectionBuffer) -> Vec<Bytes> {
        buffer.messages().collect()
    }

    #[test]
    fn test_single_message() {
        let mut buffer = ConnectionBuffer::new(64);
        buffer.append(b"PING\r\n").unwrap();
        assert_eq!(drain(&mut buffer), vec![Bytes::from_static(b"PING")]);
        assert!(buffer.is_empty());
    }

    #[test]
    fn test_partial_then_complete() {
        let mut buffer = ConnectionBuffer::new(64);
        buffer.append(b"PI").unwrap();
        assert!(drain(&mut buffer).is_empty());
        assert_eq!(buffer.len(), 2);

        buffer.append(b"NG\r\n").unwrap();
        assert_eq!(drain(&mut buffer), vec![Bytes::from_static(b"PING")]);
        assert!(buffer.is_empty());
    }

    #[test]
    fn test_delimiter_split_across_appends() {
        let mut buffer = ConnectionBuffer::new(64);
        buffer.append(b"A\r").unwrap();
        assert!(drain(&mut buffer).is_empty());
        buffer.append(b"\nB").unwrap();
        assert_eq!(drain(&mut buffer), vec![Bytes::from_static(b"A")]);
        assert_eq!(buffer.len(), 1);
    }

    #[test]
    fn test_three_messages_one_append() {
        let mut buffer = ConnectionBuffer::new(64);
        buffer.append(b"one\r\ntwo\r\nthree\r\n").unwrap();
        let messages = drain(&mut buffer);
        assert_eq!(messages.len(), 3);
        assert_eq!(messages[0], "one");
        assert_eq!(messages[1], "two");
        assert_eq!(messages[2], "three");
        assert!(messages.iter().all(|m| !m.is_empty() && find_crlf(m).is_none()));
    }

    #[test]
    fn test_empty_message_between_delimiters() {
        let mut buffer = ConnectionBuffer::new(64);
        buffer.append(b"\r\nx\r\n").unwrap();
        assert_eq!(drain(&mut buffer), vec![Bytes::new(), Bytes::from_static(b"x")]);
    }

    #[test]
    fn test_lone_cr_and_lf_are_payload() {
        let mut buffer = ConnectionBuffer::new(64);
        buffer.append(b"a\rb\nc\r\n").unwrap();
        assert_eq!(drain(&mut buffer), vec![Bytes::from_static(b"a\rb\nc")]);
    }

    #[test]
    fn test_overflow_is_rejected() {
        let mut buffer = ConnectionBuffer::new(8);
        buffer.append(b"12345").unwrap();
        assert_eq!(buffer.append(b"6789"), Err(FrameTooLarge { limit: 8 }));
        // Rejected append leaves the buffer intact
        assert_eq!(buffer.len(), 5);
        assert_eq!(buffer.remaining(), 3);
    }

    #[test]
    fn test_space_reclaimed_after_extraction() {
        let mut buffer = ConnectionBuffer::new(8);
        buffer.append(b"abc\r\nde").unwrap();
        assert_eq!(drain(&mut buffer).len(), 1);
        assert_eq!(buffer.remaining(), 6);
        buffer.append(b"f\r\n").unwrap();
        assert_eq!(drain(&mut buffer), vec![Bytes::from_static(b"def")]);
    }

    #[test]
    fn test_early_drop_keeps_unread_messages() {
        let mut buffer = ConnectionBuffer::new(64);
        buffer.append(b"a\r\nb\r\n").unwrap();
        assert_eq!(buffer.messages().next(), Some(Bytes::from_static(b"a")));
        assert_eq!(drain(&mut buffer), vec![Bytes::from_static(b"b")]);
    }

    fn message_strategy() -> impl Strategy<Value = Vec<u8>> {
        // Payload bytes may include lone '\r' or '\n', never the pair
        prop::collection::vec(any::<u8>(), 0..40).prop_filter("no CRLF", |m| {
            find_crlf(m).is_none() && m.last() != Some(&b'\r')
        })
    }

    proptest! {
        #![proptest_config(ProptestConfig {
            cases: 200,
            ..ProptestConfig::default()
        })]

        #[test]
        fn test_chunking_invariance(
            messages in prop::collection::vec(message_strategy(), 0..10),
            tail in message_strategy().prop_filter("non-empty tail", |t| !t.is_empty()),
            cuts in prop::collection::vec(any::<prop::sample::Index>(), 0..50),
        ) {
            let mut stream = Vec::new();
            for m in &messages {
                stream.extend_from_slice(m);
                stream.extend_from_slice(CRLF);
            }
            stream.extend_from_slice(&tail);

            let mut points: Vec<usize> = cuts.iter().map(|i| i.index(stream.len() + 1)).collect();
            points.push(0);
            points.push(stream.len());
            points.sort_unstable();
            points.dedup();

            let mut buffer = ConnectionBuffer::new(stream.len() + CRLF.len());
            let mut extracted = Vec::new();
            for pair in points.windows(2) {
                buffer.append(&stream[pair[0]..pair[1]]).unwrap();
                extracted.extend(buffer.messages());
            }

            prop_assert_eq!(extracted.len(), messages.len());
            for (got, want) in extracted.iter().zip(&messages) {
                prop_assert_eq!(&got[..], &want[..]);
            }
            prop_assert_eq!(buffer.len(), tail.len());

            buffer.append(CRLF).unwrap();
            let last: Vec<Bytes> = buffer.messages().collect();
            prop_assert_eq!(last.len(), 1);
            prop_assert_eq!(&last[0][..], &tail[..]);
            prop_assert!(buffer.is_empty());
        }
    }
}
