//! Mock transport backend for testing
//!
//! This backend implements [`Backend`] without requiring physical hardware. It provides:
//! - Scripted replies per command, plus an optional fallback reply for any query
//! - Controllable failure injection for every primitive
//! - Call logging for test verification
//!
//! State is shared behind `Arc<Mutex<..>>`, so a clone kept by a test can inspect
//! the call log after the session that owned the backend has been dropped.

use super::{
    AccessMode, Attribute, Backend, HandleArena, ReadCompletion, ReadCount, ResourceId,
    RmHandle, SessionHandle,
};
use crate::error::{TransportError, TransportResult};
use async_trait::async_trait;
use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tracing::debug;

/// Identity reported by [`MockBackend::simulated_instrument`].
pub const MOCK_IDENTITY: &str = "Mock Instrument,SCPI Player,0,1.0";

/// A recorded backend call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MockCall {
    /// `open_default_rm`
    OpenRm,
    /// `open` of a resource
    Open(String),
    /// `set_attribute`
    SetAttribute(Attribute),
    /// `write` with the exact bytes sent
    Write(Vec<u8>),
    /// `read` with the buffer capacity and the count returned (`None` on failure)
    Read {
        /// Capacity of the caller's buffer.
        capacity: usize,
        /// Bytes returned.
        returned: Option<usize>,
    },
    /// `close_session`
    CloseSession,
    /// `close_rm`
    CloseRm,
}

/// How the simulated instrument answers a command.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MockReply {
    /// Queue these bytes for reading.
    Bytes(Vec<u8>),
    /// Never answer; reads time out.
    Silent,
}

impl MockReply {
    /// Reply with `text` as ASCII bytes.
    pub fn text(text: impl Into<String>) -> Self {
        MockReply::Bytes(text.into().into_bytes())
    }
}

/// Primitive a failure can be injected into.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MockOp {
    /// `open_default_rm`
    OpenRm,
    /// `open`
    Open,
    /// `set_attribute`
    SetAttribute,
    /// `write`
    Write,
    /// `read`
    Read,
}

#[derive(Debug)]
struct MockSession {
    rm: u32,
    timeout_ms: u32,
    term_char: u8,
    term_enabled: bool,
    pending: VecDeque<u8>,
    /// A buffer-filling read left the current message open.
    in_message: bool,
}

#[derive(Debug)]
struct MockState {
    managers: HandleArena<()>,
    sessions: HandleArena<MockSession>,
    replies: HashMap<String, MockReply>,
    query_fallback: Option<Vec<u8>>,
    failures: HashMap<MockOp, VecDeque<TransportError>>,
    call_log: Vec<MockCall>,
}

impl Default for MockState {
    fn default() -> Self {
        Self {
            managers: HandleArena::with_base(0x10),
            sessions: HandleArena::with_base(0x100),
            replies: HashMap::new(),
            query_fallback: None,
            failures: HashMap::new(),
            call_log: Vec::new(),
        }
    }
}

impl MockState {
    fn take_failure(&mut self, op: MockOp) -> TransportResult<()> {
        match self.failures.get_mut(&op).and_then(VecDeque::pop_front) {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }

    fn reply_for(&self, written: &[u8]) -> Option<MockReply> {
        let command = String::from_utf8_lossy(written);
        let command = command.trim_end_matches(&['\r', '\n'][..]);
        if let Some(reply) = self.replies.get(command) {
            return Some(reply.clone());
        }
        match &self.query_fallback {
            Some(bytes) if command.contains('?') => Some(MockReply::Bytes(bytes.clone())),
            _ => None,
        }
    }
}

/// Simulated instrument.
///
/// # Example
///
/// ```
/// use scpi_player::transport::{MockBackend, MockReply};
///
/// let backend = MockBackend::new().with_reply("*IDN?", MockReply::text("Acme,Model1,SN123\n"));
/// assert!(backend.call_log().is_empty());
/// ```
#[derive(Debug, Clone, Default)]
pub struct MockBackend {
    state: Arc<Mutex<MockState>>,
}

impl MockBackend {
    /// Create a mock with no scripted replies.
    pub fn new() -> Self {
        Self::default()
    }

    /// Mock that answers `*IDN?` with [`MOCK_IDENTITY`] and any other query with `0`.
    pub fn simulated_instrument() -> Self {
        Self::new()
            .with_reply("*IDN?", MockReply::text(format!("{}\n", MOCK_IDENTITY)))
            .with_query_fallback("0\n")
    }

    /// Answer `command` (without terminator) with `reply`.
    pub fn with_reply(self, command: impl Into<String>, reply: MockReply) -> Self {
        self.lock().replies.insert(command.into(), reply);
        self
    }

    /// Answer any query without a scripted reply with `text`.
    pub fn with_query_fallback(self, text: impl Into<String>) -> Self {
        self.lock().query_fallback = Some(text.into().into_bytes());
        self
    }

    /// Make the next call to `op` fail with `err`. Failures queue up and are one-shot.
    pub fn fail_next(&self, op: MockOp, err: TransportError) {
        self.lock().failures.entry(op).or_default().push_back(err);
    }

    /// Get a copy of the call log for verification
    pub fn call_log(&self) -> Vec<MockCall> {
        self.lock().call_log.clone()
    }

    /// Clear the call log
    pub fn clear_call_log(&self) {
        self.lock().call_log.clear();
    }

    /// Bytes of every write, in order.
    pub fn writes(&self) -> Vec<Vec<u8>> {
        self.lock()
            .call_log
            .iter()
            .filter_map(|call| match call {
                MockCall::Write(bytes) => Some(bytes.clone()),
                _ => None,
            })
            .collect()
    }

    /// Number of read calls.
    pub fn read_count(&self) -> usize {
        self.lock()
            .call_log
            .iter()
            .filter(|call| matches!(call, MockCall::Read { .. }))
            .count()
    }

    /// Number of live resource-manager and session handles.
    pub fn open_handles(&self) -> (usize, usize) {
        let state = self.lock();
        (state.managers.len(), state.sessions.len())
    }

    fn lock(&self) -> MutexGuard<'_, MockState> {
        // Poisoning is ignored so the log stays readable after a failed assertion.
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

#[async_trait]
impl Backend for MockBackend {
    fn name(&self) -> &str {
        "mock"
    }

    fn open_default_rm(&mut self) -> TransportResult<RmHandle> {
        let mut state = self.lock();
        state.call_log.push(MockCall::OpenRm);
        state.take_failure(MockOp::OpenRm)?;
        Ok(RmHandle(state.managers.insert(())))
    }

    async fn open(
        &mut self,
        rm: RmHandle,
        resource: &ResourceId,
        _mode: AccessMode,
        _open_timeout: Duration,
    ) -> TransportResult<SessionHandle> {
        let mut state = self.lock();
        state.call_log.push(MockCall::Open(resource.to_string()));
        state.managers.get(rm.0)?;
        state.take_failure(MockOp::Open)?;
        let id = state.sessions.insert(MockSession {
            rm: rm.0,
            timeout_ms: 2000,
            term_char: b'\n',
            term_enabled: false,
            pending: VecDeque::new(),
            in_message: false,
        });
        debug!(handle = id, resource = %resource, "mock session opened");
        Ok(SessionHandle(id))
    }

    fn set_attribute(&mut self, vi: SessionHandle, attribute: Attribute) -> TransportResult<()> {
        let mut state = self.lock();
        state.call_log.push(MockCall::SetAttribute(attribute));
        state.take_failure(MockOp::SetAttribute)?;
        let session = state.sessions.get_mut(vi.0)?;
        match attribute {
            Attribute::TimeoutMs(ms) => session.timeout_ms = ms,
            Attribute::TermChar(byte) => session.term_char = byte,
            Attribute::TermCharEnabled(on) => session.term_enabled = on,
        }
        Ok(())
    }

    async fn write(&mut self, vi: SessionHandle, data: &[u8]) -> TransportResult<usize> {
        let mut state = self.lock();
        state.call_log.push(MockCall::Write(data.to_vec()));
        state.sessions.get(vi.0)?;
        state.take_failure(MockOp::Write)?;
        let reply = state.reply_for(data);
        let session = state.sessions.get_mut(vi.0)?;
        if let Some(MockReply::Bytes(bytes)) = reply {
            session.pending.extend(bytes);
        }
        Ok(data.len())
    }

    async fn read(&mut self, vi: SessionHandle, buf: &mut [u8]) -> TransportResult<ReadCount> {
        let mut state = self.lock();
        let result = read_pending(&mut state, vi, buf);
        state.call_log.push(MockCall::Read {
            capacity: buf.len(),
            returned: result.as_ref().ok().map(|r| r.count),
        });
        result
    }

    fn close_session(&mut self, vi: SessionHandle) -> TransportResult<()> {
        let mut state = self.lock();
        state.call_log.push(MockCall::CloseSession);
        state.sessions.remove(vi.0)?;
        Ok(())
    }

    fn close_rm(&mut self, rm: RmHandle) -> TransportResult<()> {
        let mut state = self.lock();
        state.call_log.push(MockCall::CloseRm);
        state.managers.remove(rm.0)?;
        for id in state.sessions.ids_where(|s| s.rm == rm.0) {
            state.sessions.remove(id)?;
        }
        Ok(())
    }
}

fn read_pending(
    state: &mut MockState,
    vi: SessionHandle,
    buf: &mut [u8],
) -> TransportResult<ReadCount> {
    state.sessions.get(vi.0)?;
    state.take_failure(MockOp::Read)?;
    let session = state.sessions.get_mut(vi.0)?;

    // Without terminator detection a socket read waits for a full buffer.
    let message_end = if session.term_enabled {
        session
            .pending
            .iter()
            .position(|b| *b == session.term_char)
            .map(|pos| pos + 1)
    } else {
        None
    };

    let count = match message_end {
        Some(end) => end.min(buf.len()),
        None if session.pending.len() >= buf.len() => buf.len(),
        None if session.in_message && session.pending.is_empty() => {
            session.in_message = false;
            return Ok(ReadCount {
                count: 0,
                completion: ReadCompletion::EndOfMessage,
            });
        }
        None => {
            debug!(handle = %vi, timeout_ms = session.timeout_ms, "mock read timed out");
            return Err(TransportError::Timeout);
        }
    };

    for (slot, byte) in buf.iter_mut().zip(session.pending.drain(..count)) {
        *slot = byte;
    }

    let completion = if count == buf.len() {
        session.in_message = true;
        ReadCompletion::MaxCount
    } else {
        session.in_message = false;
        ReadCompletion::TermChar
    };
    Ok(ReadCount { count, completion })
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn configured(backend: &mut MockBackend) -> SessionHandle {
        let rm = backend.open_default_rm().unwrap();
        let vi = backend
            .open(
                rm,
                &ResourceId::new("TCPIP::10.0.0.1::5025::SOCKET"),
                AccessMode::NoLock,
                Duration::ZERO,
            )
            .await
            .unwrap();
        backend.set_attribute(vi, Attribute::TermChar(b'\n')).unwrap();
        backend
            .set_attribute(vi, Attribute::TermCharEnabled(true))
            .unwrap();
        vi
    }

    #[tokio::test]
    async fn test_scripted_reply_is_read_back() {
        let mut backend = MockBackend::new().with_reply("*IDN?", MockReply::text("ACME\n"));
        let vi = configured(&mut backend).await;

        backend.write(vi, b"*IDN?\n").await.unwrap();
        let mut buf = [0u8; 32];
        let read = backend.read(vi, &mut buf).await.unwrap();

        assert_eq!(&buf[..read.count], b"ACME\n");
        assert_eq!(read.completion, ReadCompletion::TermChar);
    }

    #[tokio::test]
    async fn test_exact_fill_needs_a_zero_byte_read() {
        let mut backend = MockBackend::new().with_reply("Q?", MockReply::text("abc\n"));
        let vi = configured(&mut backend).await;
        backend.write(vi, b"Q?\n").await.unwrap();

        let mut buf = [0u8; 4];
        let first = backend.read(vi, &mut buf).await.unwrap();
        assert_eq!(first.count, 4);
        assert_eq!(first.completion, ReadCompletion::MaxCount);

        let second = backend.read(vi, &mut buf).await.unwrap();
        assert_eq!(second.count, 0);

        assert!(backend.read(vi, &mut buf).await.unwrap_err().is_timeout());
    }

    #[tokio::test]
    async fn test_unconfigured_session_times_out() {
        let mut backend = MockBackend::new().with_reply("*IDN?", MockReply::text("ACME\n"));
        let rm = backend.open_default_rm().unwrap();
        let vi = backend
            .open(rm, &"ASRL1::INSTR".into(), AccessMode::NoLock, Duration::ZERO)
            .await
            .unwrap();
        backend.write(vi, b"*IDN?\n").await.unwrap();

        let mut buf = [0u8; 64];
        assert!(backend.read(vi, &mut buf).await.unwrap_err().is_timeout());
    }

    #[tokio::test]
    async fn test_failure_is_one_shot() {
        let mut backend = MockBackend::new();
        backend.fail_next(MockOp::OpenRm, TransportError::Simulated("no visa".into()));

        assert!(backend.open_default_rm().is_err());
        assert!(backend.open_default_rm().is_ok());
        assert_eq!(backend.call_log(), vec![MockCall::OpenRm, MockCall::OpenRm]);
    }

    #[tokio::test]
    async fn test_silent_reply_times_out() {
        let mut backend = MockBackend::simulated_instrument().with_reply("SLOW?", MockReply::Silent);
        let vi = configured(&mut backend).await;
        backend.write(vi, b"SLOW?\n").await.unwrap();

        let mut buf = [0u8; 16];
        assert!(backend.read(vi, &mut buf).await.unwrap_err().is_timeout());
    }

    #[tokio::test]
    async fn test_clear_call_log() {
        let mut backend = MockBackend::new();
        backend.open_default_rm().unwrap();
        assert_eq!(backend.call_log().len(), 1);

        backend.clear_call_log();
        assert!(backend.call_log().is_empty());
    }
}
