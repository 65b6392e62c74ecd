//! Response reassembly.
//!
//! An instrument answer larger than the receive buffer arrives over several
//! physical reads. A read that fills the buffer exactly is taken to mean more data
//! is pending, so reading continues until one returns fewer bytes than the buffer
//! holds. The fragments are concatenated in arrival order.

use crate::error::{TransportError, TransportResult};
use crate::session::Session;
use tracing::{debug, warn};

/// A reassembled instrument response.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Response {
    bytes: Vec<u8>,
    chunks: usize,
    complete: bool,
}

impl Response {
    fn new(bytes: Vec<u8>, chunks: usize, complete: bool) -> Self {
        Self {
            bytes,
            chunks,
            complete,
        }
    }

    /// Raw bytes, terminator included.
    pub fn as_bytes(&self) -> &[u8] {
        &self.bytes
    }

    /// Number of physical reads that produced this response.
    pub fn chunks(&self) -> usize {
        self.chunks
    }

    /// False when a continuation read timed out or the link closed, so the bytes
    /// may be a prefix.
    pub fn is_complete(&self) -> bool {
        self.complete
    }

    /// Response decoded as ASCII, bytes above 0x7F shown as `?`.
    pub fn text(&self) -> String {
        self.bytes
            .iter()
            .map(|&b| if b.is_ascii() { b as char } else { '?' })
            .collect()
    }

    /// [`text`](Self::text) without leading or trailing whitespace.
    pub fn trimmed(&self) -> String {
        self.text().trim().to_string()
    }
}

/// Outcome of reading one response.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReadOutcome {
    /// The instrument answered.
    Complete(Response),
    /// Nothing arrived before the session timeout.
    TimedOut,
}

/// Reads whole responses from a session through a fixed-size buffer.
#[derive(Debug)]
pub struct MessageReader {
    buffer: Vec<u8>,
}

impl MessageReader {
    /// Reader with a receive buffer of `capacity` bytes (at least one).
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            buffer: vec![0; capacity.max(1)],
        }
    }

    /// Reader sized from the session's configured buffer capacity.
    pub fn for_session(session: &Session) -> Self {
        Self::with_capacity(session.buffer_capacity())
    }

    /// Receive buffer size.
    pub fn capacity(&self) -> usize {
        self.buffer.len()
    }

    /// Read one complete response.
    ///
    /// A timeout on the first read yields [`ReadOutcome::TimedOut`]. A timeout or a
    /// closed link on a continuation read yields the bytes gathered so far, marked
    /// incomplete. Any other transport failure is returned as an error.
    pub async fn read(&mut self, session: &mut Session) -> TransportResult<ReadOutcome> {
        let capacity = self.buffer.len();

        let first = match session.read(&mut self.buffer).await {
            Ok(read) => read,
            Err(TransportError::Timeout) => return Ok(ReadOutcome::TimedOut),
            Err(err) => return Err(err),
        };
        if first.count < capacity {
            let bytes = self.buffer[..first.count].to_vec();
            return Ok(ReadOutcome::Complete(Response::new(bytes, 1, true)));
        }

        let mut assembled = Vec::with_capacity(capacity * 2);
        assembled.extend_from_slice(&self.buffer[..first.count]);
        let mut chunks = 1;

        loop {
            match session.read(&mut self.buffer).await {
                Ok(next) => {
                    chunks += 1;
                    assembled.extend_from_slice(&self.buffer[..next.count]);
                    if next.count < capacity {
                        break;
                    }
                }
                Err(err @ (TransportError::Timeout | TransportError::ConnectionLost)) => {
                    warn!(
                        received = assembled.len(),
                        chunks,
                        error = %err,
                        "continuation read failed; keeping partial response"
                    );
                    return Ok(ReadOutcome::Complete(Response::new(assembled, chunks, false)));
                }
                Err(err) => return Err(err),
            }
        }

        debug!(bytes = assembled.len(), chunks, "reassembled multi-part response");
        Ok(ReadOutcome::Complete(Response::new(assembled, chunks, true)))
    }
}
