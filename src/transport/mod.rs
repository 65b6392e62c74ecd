//! Instrument transport backends.
//!
//! A [`Backend`] exposes the handful of session-oriented primitives the player
//! needs, modelled on the VISA C API: open a resource manager, open a resource
//! through it, set session attributes, write, read, close. Handles are opaque
//! tokens that only the backend that issued them can validate.
//!
//! Backends:
//! - [`StreamBackend`]: raw TCP sockets and (with `instrument_serial`) serial ports
//! - [`VisaBackend`]: the system VISA library (with `instrument_visa`) for GPIB,
//!   USB-TMC and VXI-11 `INSTR` resources
//! - [`MockBackend`]: in-memory simulated instrument for tests and dry runs

use crate::error::{TransportResult, VI_SUCCESS, VI_SUCCESS_MAX_CNT, VI_SUCCESS_TERM_CHAR};
use async_trait::async_trait;
use std::fmt;
use std::time::Duration;

pub mod arena;
pub mod mock;
pub mod resource;
pub mod stream;
pub mod visa;

pub use arena::HandleArena;
pub use mock::{MockBackend, MockCall, MockReply};
pub use resource::{ResourceId, ResourceKind};
pub use stream::StreamBackend;
pub use visa::VisaBackend;

/// Handle to a resource manager.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct RmHandle(pub u32);

/// Handle to an open instrument session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SessionHandle(pub u32);

impl fmt::Display for RmHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "rm#{}", self.0)
    }
}

impl fmt::Display for SessionHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "vi#{}", self.0)
    }
}

/// Locking requested when opening a resource.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum AccessMode {
    /// No lock; other sessions may open the same resource.
    #[default]
    NoLock,
    /// Exclusive lock; a second open of the same resource fails.
    ExclusiveLock,
}

/// Session attribute understood by every backend.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Attribute {
    /// I/O timeout in milliseconds (`VI_ATTR_TMO_VALUE`).
    TimeoutMs(u32),
    /// Termination byte (`VI_ATTR_TERMCHAR`).
    TermChar(u8),
    /// Stop reads at the termination byte (`VI_ATTR_TERMCHAR_EN`).
    TermCharEnabled(bool),
}

impl fmt::Display for Attribute {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Attribute::TimeoutMs(ms) => write!(f, "VI_ATTR_TMO_VALUE={}", ms),
            Attribute::TermChar(byte) => write!(f, "VI_ATTR_TERMCHAR=0x{:02X}", byte),
            Attribute::TermCharEnabled(on) => write!(f, "VI_ATTR_TERMCHAR_EN={}", on),
        }
    }
}

/// Why a read returned.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReadCompletion {
    /// The termination byte was received (and is included in the data).
    TermChar,
    /// The peer signalled end of message or closed the link.
    EndOfMessage,
    /// The buffer filled; more data may be pending.
    MaxCount,
}

impl ReadCompletion {
    /// VISA success code for this completion.
    pub fn status_code(self) -> i32 {
        match self {
            ReadCompletion::TermChar => VI_SUCCESS_TERM_CHAR,
            ReadCompletion::EndOfMessage => VI_SUCCESS,
            ReadCompletion::MaxCount => VI_SUCCESS_MAX_CNT,
        }
    }
}

/// Result of one physical receive.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReadCount {
    /// Bytes placed at the front of the caller's buffer.
    pub count: usize,
    /// Why the receive returned.
    pub completion: ReadCompletion,
}

/// Session-oriented transport primitives.
///
/// Every method validates its handle and fails with
/// [`TransportError::InvalidHandle`](crate::error::TransportError::InvalidHandle)
/// for tokens it did not issue or that were already closed.
#[async_trait]
pub trait Backend: Send {
    /// Short backend name for logs.
    fn name(&self) -> &str;

    /// Acquire the default resource manager.
    fn open_default_rm(&mut self) -> TransportResult<RmHandle>;

    /// Open `resource` through `rm`. A zero `open_timeout` means no extra timeout.
    async fn open(
        &mut self,
        rm: RmHandle,
        resource: &ResourceId,
        mode: AccessMode,
        open_timeout: Duration,
    ) -> TransportResult<SessionHandle>;

    /// Set one session attribute.
    fn set_attribute(&mut self, vi: SessionHandle, attribute: Attribute) -> TransportResult<()>;

    /// Send `data` in one transfer, returning the bytes written.
    async fn write(&mut self, vi: SessionHandle, data: &[u8]) -> TransportResult<usize>;

    /// Receive into `buf`.
    async fn read(&mut self, vi: SessionHandle, buf: &mut [u8]) -> TransportResult<ReadCount>;

    /// Release a session.
    fn close_session(&mut self, vi: SessionHandle) -> TransportResult<()>;

    /// Release a resource manager and every session opened through it.
    fn close_rm(&mut self, rm: RmHandle) -> TransportResult<()>;
}

/// Pick the backend that can reach `resource`.
///
/// Raw sockets go through [`StreamBackend`]. GPIB, USB and VXI-11 resources need
/// the VISA library. Serial ports use tokio-serial when `instrument_serial` is on
/// and VISA otherwise, if that is available. Malformed identifiers are left to the
/// stream backend, whose open reports them.
pub fn backend_for(resource: &ResourceId, baud_rate: u32) -> Box<dyn Backend> {
    match resource.kind() {
        Ok(ResourceKind::Gpib { .. } | ResourceKind::Usb | ResourceKind::LanInstrument { .. }) => {
            Box::new(VisaBackend::new())
        }
        #[cfg(all(feature = "instrument_visa", not(feature = "instrument_serial")))]
        Ok(ResourceKind::Serial { .. }) => Box::new(VisaBackend::new()),
        _ => Box::new(StreamBackend::new(baud_rate)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_socket_resources_use_stream_backend() {
        let backend = backend_for(&ResourceId::new("TCPIP::10.0.0.5::5025::SOCKET"), 9600);
        assert_eq!(backend.name(), "stream");
    }

    #[test]
    fn test_instr_resources_use_visa_backend() {
        for raw in [
            "GPIB8::1::INSTR",
            "USB0::0x1313::0x804F::M01053290::0::INSTR",
            "TCPIP0::192.168.0.10::inst0::INSTR",
        ] {
            assert_eq!(backend_for(&ResourceId::new(raw), 9600).name(), "visa", "{raw}");
        }
    }

    #[test]
    fn test_malformed_resource_falls_back_to_stream() {
        assert_eq!(backend_for(&ResourceId::new("nonsense"), 9600).name(), "stream");
    }
}
