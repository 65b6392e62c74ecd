//! Byte-stream backend for socket and serial instruments.
//!
//! Raw sockets and serial ports have no message framing of their own, so this
//! backend reproduces the VISA read rules on top of a byte stream:
//!
//! - with `VI_ATTR_TERMCHAR_EN` set, a read returns as soon as the termination
//!   byte arrives (bytes received after it stay buffered for the next read)
//! - a read returns when the caller's buffer is full (`MaxCount`)
//! - a read returns what is buffered when the peer closes the link
//! - otherwise the read fails with `Timeout` once `VI_ATTR_TMO_VALUE` elapses
//!
//! Without termination-byte detection a short reply therefore times out, exactly
//! as a VISA socket session does.

use super::{
    AccessMode, Attribute, Backend, HandleArena, ReadCompletion, ReadCount, ResourceId,
    ResourceKind, RmHandle, SessionHandle,
};
use crate::error::{TransportError, TransportResult};
use async_trait::async_trait;
use bytes::BytesMut;
use std::io::ErrorKind;
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::time::{timeout, timeout_at, Instant};
use tracing::{debug, trace};

/// VISA default for `VI_ATTR_TMO_VALUE`.
const DEFAULT_TIMEOUT: Duration = Duration::from_millis(2000);
const READ_CHUNK: usize = 4096;

trait AsyncStream: AsyncRead + AsyncWrite + Unpin + Send {}

impl<T: AsyncRead + AsyncWrite + Unpin + Send> AsyncStream for T {}

struct StreamSession {
    rm: u32,
    key: String,
    exclusive: bool,
    io: Box<dyn AsyncStream>,
    pending: BytesMut,
    timeout: Duration,
    term_char: u8,
    term_enabled: bool,
}

impl StreamSession {
    fn new(rm: u32, key: String, exclusive: bool, io: Box<dyn AsyncStream>) -> Self {
        Self {
            rm,
            key,
            exclusive,
            io,
            pending: BytesMut::with_capacity(READ_CHUNK),
            timeout: DEFAULT_TIMEOUT,
            term_char: b'\n',
            term_enabled: false,
        }
    }

    /// Bytes that can be handed out without touching the stream.
    fn ready(&self, capacity: usize) -> Option<ReadCount> {
        if self.term_enabled {
            let window = &self.pending[..self.pending.len().min(capacity)];
            if let Some(pos) = window.iter().position(|b| *b == self.term_char) {
                return Some(ReadCount {
                    count: pos + 1,
                    completion: ReadCompletion::TermChar,
                });
            }
        }
        if self.pending.len() >= capacity {
            return Some(ReadCount {
                count: capacity,
                completion: ReadCompletion::MaxCount,
            });
        }
        None
    }

    fn drain_into(&mut self, buf: &mut [u8], ready: ReadCount) -> ReadCount {
        let chunk = self.pending.split_to(ready.count);
        buf[..ready.count].copy_from_slice(&chunk);
        ready
    }

    async fn receive(&mut self, buf: &mut [u8]) -> TransportResult<ReadCount> {
        let deadline = Instant::now() + self.timeout;
        loop {
            if let Some(ready) = self.ready(buf.len()) {
                return Ok(self.drain_into(buf, ready));
            }

            self.pending.reserve(READ_CHUNK);
            let received = match timeout_at(deadline, self.io.read_buf(&mut self.pending)).await {
                Ok(result) => result?,
                Err(_) => return Err(TransportError::Timeout),
            };
            trace!(bytes = received, buffered = self.pending.len(), "stream receive");

            if received == 0 {
                if self.pending.is_empty() {
                    return Err(TransportError::ConnectionLost);
                }
                let count = self.pending.len().min(buf.len());
                let completion = if count == buf.len() {
                    ReadCompletion::MaxCount
                } else {
                    ReadCompletion::EndOfMessage
                };
                return Ok(self.drain_into(buf, ReadCount { count, completion }));
            }
        }
    }

    async fn send(&mut self, data: &[u8]) -> TransportResult<usize> {
        let io = &mut self.io;
        let write = async {
            io.write_all(data).await?;
            io.flush().await
        };
        match timeout(self.timeout, write).await {
            Ok(result) => result?,
            Err(_) => return Err(TransportError::Timeout),
        }
        Ok(data.len())
    }
}

/// Socket and serial backend built on tokio streams.
pub struct StreamBackend {
    managers: HandleArena<()>,
    sessions: HandleArena<StreamSession>,
    baud_rate: u32,
}

impl StreamBackend {
    /// Create a backend; `baud_rate` applies to serial resources.
    pub fn new(baud_rate: u32) -> Self {
        Self {
            managers: HandleArena::with_base(0x1000),
            sessions: HandleArena::with_base(0x2000),
            baud_rate,
        }
    }

    /// Number of open sessions.
    pub fn session_count(&self) -> usize {
        self.sessions.len()
    }
}

impl Default for StreamBackend {
    fn default() -> Self {
        Self::new(9600)
    }
}

async fn connect_socket(host: &str, port: u16, open_timeout: Duration) -> TransportResult<TcpStream> {
    let connect = TcpStream::connect((host, port));
    let result = if open_timeout.is_zero() {
        connect.await
    } else {
        timeout(open_timeout, connect)
            .await
            .map_err(|_| TransportError::Timeout)?
    };
    let stream = result.map_err(|err| match err.kind() {
        ErrorKind::ConnectionRefused | ErrorKind::NotFound | ErrorKind::AddrNotAvailable => {
            TransportError::ResourceNotFound(format!("{}:{}: {}", host, port, err))
        }
        _ => TransportError::Io(err),
    })?;
    stream.set_nodelay(true)?;
    Ok(stream)
}

#[cfg(feature = "instrument_serial")]
fn open_serial(port: &str, baud_rate: u32) -> TransportResult<Box<dyn AsyncStream>> {
    use tokio_serial::SerialPortBuilderExt;

    let stream = tokio_serial::new(port, baud_rate)
        .data_bits(tokio_serial::DataBits::Eight)
        .parity(tokio_serial::Parity::None)
        .stop_bits(tokio_serial::StopBits::One)
        .flow_control(tokio_serial::FlowControl::None)
        .open_native_async()
        .map_err(|err| TransportError::ResourceNotFound(format!("{}: {}", port, err)))?;
    Ok(Box::new(stream))
}

#[cfg(not(feature = "instrument_serial"))]
fn open_serial(_port: &str, _baud_rate: u32) -> TransportResult<Box<dyn AsyncStream>> {
    Err(TransportError::FeatureNotEnabled("instrument_serial"))
}

#[async_trait]
impl Backend for StreamBackend {
    fn name(&self) -> &str {
        "stream"
    }

    fn open_default_rm(&mut self) -> TransportResult<RmHandle> {
        let rm = RmHandle(self.managers.insert(()));
        debug!(handle = %rm, "resource manager opened");
        Ok(rm)
    }

    async fn open(
        &mut self,
        rm: RmHandle,
        resource: &ResourceId,
        mode: AccessMode,
        open_timeout: Duration,
    ) -> TransportResult<SessionHandle> {
        self.managers.get(rm.0)?;

        let key = resource.as_str().trim().to_ascii_uppercase();
        let exclusive = mode == AccessMode::ExclusiveLock;
        if self
            .sessions
            .values()
            .any(|s| s.key == key && (s.exclusive || exclusive))
        {
            return Err(TransportError::ResourceLocked(resource.to_string()));
        }

        let io: Box<dyn AsyncStream> = match resource.kind()? {
            ResourceKind::Socket { host, port } => {
                Box::new(connect_socket(&host, port, open_timeout).await?)
            }
            ResourceKind::Serial { port } => open_serial(&port, self.baud_rate)?,
            _ => return Err(TransportError::UnsupportedResource(resource.to_string())),
        };

        let vi = SessionHandle(
            self.sessions
                .insert(StreamSession::new(rm.0, key, exclusive, io)),
        );
        debug!(handle = %vi, resource = %resource, "session opened");
        Ok(vi)
    }

    fn set_attribute(&mut self, vi: SessionHandle, attribute: Attribute) -> TransportResult<()> {
        let session = self.sessions.get_mut(vi.0)?;
        match attribute {
            Attribute::TimeoutMs(ms) => session.timeout = Duration::from_millis(u64::from(ms)),
            Attribute::TermChar(byte) => session.term_char = byte,
            Attribute::TermCharEnabled(on) => session.term_enabled = on,
        }
        trace!(handle = %vi, %attribute, "attribute set");
        Ok(())
    }

    async fn write(&mut self, vi: SessionHandle, data: &[u8]) -> TransportResult<usize> {
        self.sessions.get_mut(vi.0)?.send(data).await
    }

    async fn read(&mut self, vi: SessionHandle, buf: &mut [u8]) -> TransportResult<ReadCount> {
        self.sessions.get_mut(vi.0)?.receive(buf).await
    }

    fn close_session(&mut self, vi: SessionHandle) -> TransportResult<()> {
        self.sessions.remove(vi.0)?;
        debug!(handle = %vi, "session closed");
        Ok(())
    }

    fn close_rm(&mut self, rm: RmHandle) -> TransportResult<()> {
        self.managers.remove(rm.0)?;
        for id in self.sessions.ids_where(|s| s.rm == rm.0) {
            self.sessions.remove(id)?;
            debug!(handle = %SessionHandle(id), "session closed with its resource manager");
        }
        debug!(handle = %rm, "resource manager closed");
        Ok(())
    }
}
