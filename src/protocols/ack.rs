//! Acknowledgement protocol: every message is answered with `ok\r\n`.
//!
//! The message content is never inspected or echoed.

use super::Action;
use bytes::BytesMut;

const RESPONSE_OK: &[u8] = b"ok\r\n";

pub fn process(_message: &[u8], reply: &mut BytesMut) -> Action {
    reply.extend_from_slice(RESPONSE_OK);
    Action::Continue
}
