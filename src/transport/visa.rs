//! VISA library backend for GPIB, USB-TMC, VXI-11 and other `INSTR` resources.
//!
//! Requires the `instrument_visa` feature and an installed VISA implementation
//! (NI-VISA, Keysight IO Libraries, R&S VISA). The VISA calls are blocking, so
//! each one runs on tokio's blocking pool.
//!
//! Without the feature, [`VisaBackend`] still exists but fails to open a resource
//! manager, the same way a machine without a VISA library does.

#[cfg(feature = "instrument_visa")]
pub use enabled::VisaBackend;

#[cfg(not(feature = "instrument_visa"))]
pub use disabled::VisaBackend;

#[cfg(feature = "instrument_visa")]
mod enabled {
    use crate::error::{TransportError, TransportResult};
    use crate::transport::{
        AccessMode, Attribute, Backend, HandleArena, ReadCompletion, ReadCount, ResourceId,
        RmHandle, SessionHandle,
    };
    use async_trait::async_trait;
    use std::ffi::CString;
    use std::io::{self, Read, Write};
    use std::sync::Arc;
    use std::time::Duration;
    use tokio::sync::Mutex;
    use tracing::{debug, trace};
    use visa_rs::enums::attribute::{self, Attribute as VisaAttribute};
    use visa_rs::enums::status::ErrorCode;
    use visa_rs::flags::AccessMode as VisaAccessMode;
    use visa_rs::{DefaultRM, Instrument};

    struct VisaSession {
        rm: u32,
        instr: Arc<Mutex<Instrument>>,
        term_char: u8,
        term_enabled: bool,
    }

    /// Backend over the system VISA library.
    pub struct VisaBackend {
        managers: HandleArena<Arc<DefaultRM>>,
        sessions: HandleArena<VisaSession>,
    }

    impl VisaBackend {
        /// Create a backend; the VISA library is loaded on the first resource manager.
        pub fn new() -> Self {
            Self {
                managers: HandleArena::with_base(0x3000),
                sessions: HandleArena::with_base(0x4000),
            }
        }

        fn instrument(&self, vi: SessionHandle) -> TransportResult<Arc<Mutex<Instrument>>> {
            Ok(self.sessions.get(vi.0)?.instr.clone())
        }
    }

    impl Default for VisaBackend {
        fn default() -> Self {
            Self::new()
        }
    }

    fn visa_error(err: &visa_rs::Error, resource: &str) -> TransportError {
        match err.0 {
            ErrorCode::ErrorTmo => TransportError::Timeout,
            ErrorCode::ErrorRsrcNfound => TransportError::ResourceNotFound(resource.to_string()),
            ErrorCode::ErrorRsrcLocked => TransportError::ResourceLocked(resource.to_string()),
            ErrorCode::ErrorInvRsrcName => TransportError::InvalidResource(resource.to_string()),
            ErrorCode::ErrorConnLost => TransportError::ConnectionLost,
            _ => TransportError::Visa(err.to_string()),
        }
    }

    /// Instrument I/O goes through `std::io`; recover the VISA status it wraps.
    fn io_error(err: io::Error, resource: &str) -> TransportError {
        if err.kind() == io::ErrorKind::TimedOut {
            return TransportError::Timeout;
        }
        match err
            .get_ref()
            .and_then(|inner| inner.downcast_ref::<visa_rs::Error>())
        {
            Some(status) => visa_error(status, resource),
            None => TransportError::Io(err),
        }
    }

    fn join_error(err: tokio::task::JoinError) -> TransportError {
        TransportError::Visa(format!("VISA call did not complete: {}", err))
    }

    fn visa_attribute(attribute: Attribute) -> TransportResult<VisaAttribute> {
        let converted = match attribute {
            Attribute::TimeoutMs(ms) => attribute::AttrTmoValue::new_checked(ms).map(VisaAttribute::from),
            Attribute::TermChar(byte) => {
                attribute::AttrTermchar::new_checked(byte).map(VisaAttribute::from)
            }
            Attribute::TermCharEnabled(true) => Some(attribute::AttrTermcharEn::VI_TRUE.into()),
            Attribute::TermCharEnabled(false) => Some(attribute::AttrTermcharEn::VI_FALSE.into()),
        };
        converted.ok_or_else(|| TransportError::Visa(format!("value out of range for {}", attribute)))
    }

    #[async_trait]
    impl Backend for VisaBackend {
        fn name(&self) -> &str {
            "visa"
        }

        fn open_default_rm(&mut self) -> TransportResult<RmHandle> {
            let rm = DefaultRM::new().map_err(|err| visa_error(&err, "default resource manager"))?;
            let rm = RmHandle(self.managers.insert(Arc::new(rm)));
            debug!(handle = %rm, "VISA resource manager opened");
            Ok(rm)
        }

        async fn open(
            &mut self,
            rm: RmHandle,
            resource: &ResourceId,
            mode: AccessMode,
            open_timeout: Duration,
        ) -> TransportResult<SessionHandle> {
            let manager = self.managers.get(rm.0)?.clone();
            let name = CString::new(resource.as_str())
                .map_err(|_| TransportError::InvalidResource(resource.to_string()))?;
            let access = match mode {
                AccessMode::NoLock => VisaAccessMode::NO_LOCK,
                AccessMode::ExclusiveLock => VisaAccessMode::EXCLUSIVE_LOCK,
            };

            let opened = tokio::task::spawn_blocking(move || {
                manager.open(&name.into(), access, open_timeout)
            })
            .await
            .map_err(join_error)?;
            let instr = opened.map_err(|err| visa_error(&err, resource.as_str()))?;

            let vi = SessionHandle(self.sessions.insert(VisaSession {
                rm: rm.0,
                instr: Arc::new(Mutex::new(instr)),
                term_char: b'\n',
                term_enabled: false,
            }));
            debug!(handle = %vi, resource = %resource, "VISA session opened");
            Ok(vi)
        }

        fn set_attribute(&mut self, vi: SessionHandle, attribute: Attribute) -> TransportResult<()> {
            let session = self.sessions.get_mut(vi.0)?;
            let converted = visa_attribute(attribute)?;
            {
                let instr = session
                    .instr
                    .try_lock()
                    .map_err(|_| TransportError::Visa("session busy".to_string()))?;
                instr
                    .set_attr(converted)
                    .map_err(|err| visa_error(&err, "session attribute"))?;
            }
            match attribute {
                Attribute::TermChar(byte) => session.term_char = byte,
                Attribute::TermCharEnabled(on) => session.term_enabled = on,
                Attribute::TimeoutMs(_) => {}
            }
            trace!(handle = %vi, %attribute, "VISA attribute set");
            Ok(())
        }

        async fn write(&mut self, vi: SessionHandle, data: &[u8]) -> TransportResult<usize> {
            let instr = self.instrument(vi)?;
            let data = data.to_vec();
            let written = tokio::task::spawn_blocking(move || {
                let mut instr = instr.blocking_lock();
                instr.write_all(&data).map(|()| data.len())
            })
            .await
            .map_err(join_error)?;
            written.map_err(|err| io_error(err, "write"))
        }

        /// `viRead` fills at most `buf.len()` bytes. A full buffer is reported as
        /// `MaxCount` (`VI_SUCCESS_MAX_CNT`), so the caller reads again.
        async fn read(&mut self, vi: SessionHandle, buf: &mut [u8]) -> TransportResult<ReadCount> {
            let session = self.sessions.get(vi.0)?;
            let (term_char, term_enabled) = (session.term_char, session.term_enabled);
            let instr = session.instr.clone();
            let mut chunk = vec![0u8; buf.len()];

            let received = tokio::task::spawn_blocking(move || {
                let instr = instr.blocking_lock();
                (&*instr).read(&mut chunk).map(|count| (count, chunk))
            })
            .await
            .map_err(join_error)?;
            let (count, chunk) = received.map_err(|err| io_error(err, "read"))?;

            buf[..count].copy_from_slice(&chunk[..count]);
            let completion = if count == buf.len() {
                ReadCompletion::MaxCount
            } else if term_enabled && count > 0 && buf[count - 1] == term_char {
                ReadCompletion::TermChar
            } else {
                ReadCompletion::EndOfMessage
            };
            trace!(handle = %vi, count, ?completion, "VISA read");
            Ok(ReadCount { count, completion })
        }

        fn close_session(&mut self, vi: SessionHandle) -> TransportResult<()> {
            // Dropping the instrument calls viClose.
            self.sessions.remove(vi.0)?;
            debug!(handle = %vi, "VISA session closed");
            Ok(())
        }

        fn close_rm(&mut self, rm: RmHandle) -> TransportResult<()> {
            self.managers.remove(rm.0)?;
            for id in self.sessions.ids_where(|s| s.rm == rm.0) {
                self.sessions.remove(id)?;
                debug!(handle = %SessionHandle(id), "VISA session closed with its resource manager");
            }
            debug!(handle = %rm, "VISA resource manager closed");
            Ok(())
        }
    }
}

#[cfg(not(feature = "instrument_visa"))]
mod disabled {
    use crate::error::{TransportError, TransportResult};
    use crate::transport::{
        AccessMode, Attribute, Backend, ReadCount, ResourceId, RmHandle, SessionHandle,
    };
    use async_trait::async_trait;
    use std::time::Duration;

    /// Placeholder used when the crate is built without `instrument_visa`.
    #[derive(Debug, Default)]
    pub struct VisaBackend;

    impl VisaBackend {
        /// Create the placeholder backend.
        pub fn new() -> Self {
            Self
        }
    }

    #[async_trait]
    impl Backend for VisaBackend {
        fn name(&self) -> &str {
            "visa"
        }

        fn open_default_rm(&mut self) -> TransportResult<RmHandle> {
            Err(TransportError::FeatureNotEnabled("instrument_visa"))
        }

        async fn open(
            &mut self,
            rm: RmHandle,
            _resource: &ResourceId,
            _mode: AccessMode,
            _open_timeout: Duration,
        ) -> TransportResult<SessionHandle> {
            Err(TransportError::InvalidHandle(rm.0))
        }

        fn set_attribute(&mut self, vi: SessionHandle, _attribute: Attribute) -> TransportResult<()> {
            Err(TransportError::InvalidHandle(vi.0))
        }

        async fn write(&mut self, vi: SessionHandle, _data: &[u8]) -> TransportResult<usize> {
            Err(TransportError::InvalidHandle(vi.0))
        }

        async fn read(&mut self, vi: SessionHandle, _buf: &mut [u8]) -> TransportResult<ReadCount> {
            Err(TransportError::InvalidHandle(vi.0))
        }

        fn close_session(&mut self, vi: SessionHandle) -> TransportResult<()> {
            Err(TransportError::InvalidHandle(vi.0))
        }

        fn close_rm(&mut self, rm: RmHandle) -> TransportResult<()> {
            Err(TransportError::InvalidHandle(rm.0))
        }
    }

}
