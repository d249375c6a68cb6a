//! Echo protocol: each message is sent back followed by CRLF.

use super::Action;
use bytes::BytesMut;

pub fn process(message: &[u8], reply: &mut BytesMut) -> Action {
    reply.reserve(message.len() + 2);
    reply.extend_from_slice(message);
    reply.extend_from_slice(b"\r\n");
    Action::Continue
}
