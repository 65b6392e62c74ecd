//! Outgoing message framing.

use crate::error::TransportResult;
use crate::session::Session;
use tracing::trace;

/// Byte appended to every directive.
pub const LINE_FEED: u8 = b'\n';

/// Byte substituted for characters outside 7-bit ASCII.
pub const REPLACEMENT: u8 = b'?';

/// Sends one directive per transfer, newline-terminated and ASCII-encoded.
#[derive(Debug, Clone, Copy, Default)]
pub struct MessageWriter;

impl MessageWriter {
    /// Create a writer.
    pub fn new() -> Self {
        Self
    }

    /// Wire bytes for `directive`: each character becomes one byte, non-ASCII
    /// characters become `?`, and a line feed is appended.
    pub fn encode(&self, directive: &str) -> Vec<u8> {
        let mut bytes = Vec::with_capacity(directive.len() + 1);
        bytes.extend(directive.chars().map(|c| {
            if c.is_ascii() {
                c as u8
            } else {
                REPLACEMENT
            }
        }));
        bytes.push(LINE_FEED);
        bytes
    }

    /// Encode `directive` and send it in a single write.
    ///
    /// Returns the number of bytes the transport accepted.
    pub async fn write(&self, session: &mut Session, directive: &str) -> TransportResult<usize> {
        let bytes = self.encode(directive);
        let written = session.write(&bytes).await?;
        trace!(directive, written, "directive sent");
        Ok(written)
    }
}
