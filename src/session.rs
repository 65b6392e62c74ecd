//! Instrument session lifecycle.
//!
//! A [`Session`] owns one transport backend together with the resource-manager
//! handle and the instrument-session handle opened through it. Both handles are
//! released exactly once: explicitly through [`Session::close`], or by `Drop` on
//! any other exit path, including an open that failed half way.

use crate::error::{PlayerError, PlayerResult, TransportError, TransportResult};
use crate::transport::{
    AccessMode, Attribute, Backend, ReadCount, ResourceId, RmHandle, SessionHandle,
};
use std::time::Duration;
use tracing::{debug, info, warn};

/// Receive buffer size used when none is configured.
pub const DEFAULT_BUFFER_CAPACITY: usize = 0x10000;

/// Per-session I/O configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SessionSettings {
    /// Response timeout.
    pub timeout: Duration,
    /// Message terminator byte.
    pub terminator: u8,
    /// Whether reads stop at the terminator.
    pub terminator_enabled: bool,
    /// Capacity of the receive buffer used by readers of this session.
    pub buffer_capacity: usize,
}

impl Default for SessionSettings {
    fn default() -> Self {
        Self {
            timeout: Duration::from_millis(3000),
            terminator: b'\n',
            terminator_enabled: true,
            buffer_capacity: DEFAULT_BUFFER_CAPACITY,
        }
    }
}

impl SessionSettings {
    /// Attributes applied by [`Session::configure`], in order.
    pub fn attributes(&self) -> [Attribute; 3] {
        let timeout_ms = u32::try_from(self.timeout.as_millis()).unwrap_or(u32::MAX);
        [
            Attribute::TimeoutMs(timeout_ms),
            Attribute::TermChar(self.terminator),
            Attribute::TermCharEnabled(self.terminator_enabled),
        ]
    }
}

/// One logical connection to one instrument.
pub struct Session {
    backend: Box<dyn Backend>,
    resource: ResourceId,
    rm: Option<RmHandle>,
    vi: Option<SessionHandle>,
    settings: Option<SessionSettings>,
}

impl Session {
    /// Acquire the resource manager, then open `resource` without locking and
    /// without an extra open timeout.
    ///
    /// # Errors
    /// - [`PlayerError::ResourceManager`] if the manager cannot be acquired
    /// - [`PlayerError::Open`] if the resource cannot be reached; the manager is
    ///   released before returning
    pub async fn open(mut backend: Box<dyn Backend>, resource: ResourceId) -> PlayerResult<Self> {
        let rm = backend
            .open_default_rm()
            .map_err(PlayerError::ResourceManager)?;

        let mut session = Self {
            backend,
            resource,
            rm: Some(rm),
            vi: None,
            settings: None,
        };

        let vi = session
            .backend
            .open(rm, &session.resource, AccessMode::NoLock, Duration::ZERO)
            .await
            .map_err(|source| PlayerError::Open {
                resource: session.resource.to_string(),
                source,
            })?;
        session.vi = Some(vi);

        info!(
            resource = %session.resource,
            backend = session.backend.name(),
            handle = %vi,
            "instrument session opened"
        );
        Ok(session)
    }

    /// Apply timeout, terminator and terminator detection. Call before any I/O.
    ///
    /// # Errors
    /// [`PlayerError::Configure`] naming the attribute that was rejected.
    pub fn configure(&mut self, settings: SessionSettings) -> PlayerResult<()> {
        let vi = self.handle().map_err(|source| PlayerError::Configure {
            attribute: "session".into(),
            source,
        })?;
        for attribute in settings.attributes() {
            self.backend
                .set_attribute(vi, attribute)
                .map_err(|source| PlayerError::Configure {
                    attribute: attribute.to_string(),
                    source,
                })?;
        }
        debug!(handle = %vi, ?settings, "session configured");
        self.settings = Some(settings);
        Ok(())
    }

    /// Send bytes in one transfer.
    pub async fn write(&mut self, data: &[u8]) -> TransportResult<usize> {
        let vi = self.handle()?;
        self.backend.write(vi, data).await
    }

    /// Perform one physical receive.
    pub async fn read(&mut self, buf: &mut [u8]) -> TransportResult<ReadCount> {
        let vi = self.handle()?;
        if self.settings.is_none() {
            warn!(handle = %vi, "read on an unconfigured session; message boundaries are not detected");
        }
        self.backend.read(vi, buf).await
    }

    /// Release the session handle, then the resource-manager handle.
    ///
    /// Calling this again after a successful close does nothing. Both releases are
    /// attempted even if the first fails; the first failure is returned.
    pub fn close(&mut self) -> TransportResult<()> {
        let mut first_error = None;

        if let Some(vi) = self.vi.take() {
            match self.backend.close_session(vi) {
                Ok(()) => debug!(handle = %vi, "session handle released"),
                Err(err) => {
                    first_error.get_or_insert(err);
                }
            }
        }
        if let Some(rm) = self.rm.take() {
            match self.backend.close_rm(rm) {
                Ok(()) => debug!(handle = %rm, "resource manager released"),
                Err(err) => {
                    first_error.get_or_insert(err);
                }
            }
        }

        match first_error {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }

    /// Whether the instrument handle is still held.
    pub fn is_open(&self) -> bool {
        self.vi.is_some()
    }

    /// Resource this session was opened on.
    pub fn resource(&self) -> &ResourceId {
        &self.resource
    }

    /// Settings applied by [`configure`](Self::configure), if any.
    pub fn settings(&self) -> Option<&SessionSettings> {
        self.settings.as_ref()
    }

    /// Receive buffer size readers should use for this session.
    pub fn buffer_capacity(&self) -> usize {
        self.settings
            .map_or(DEFAULT_BUFFER_CAPACITY, |s| s.buffer_capacity)
    }

    fn handle(&self) -> TransportResult<SessionHandle> {
        self.vi.ok_or(TransportError::SessionClosed)
    }
}

impl Drop for Session {
    fn drop(&mut self) {
        if self.rm.is_none() && self.vi.is_none() {
            return;
        }
        if let Err(err) = self.close() {
            warn!(resource = %self.resource, error = %err, "failed to release instrument session");
        }
    }
}

impl std::fmt::Debug for Session {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session")
            .field("backend", &self.backend.name())
            .field("resource", &self.resource)
            .field("rm", &self.rm)
            .field("vi", &self.vi)
            .field("settings", &self.settings)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::mock::MockOp;
    use crate::transport::{MockBackend, MockCall};

    fn resource() -> ResourceId {
        ResourceId::new("TCPIP::169.254.56.79::5025::SOCKET")
    }

    #[tokio::test]
    async fn test_open_configure_close() {
        let mock = MockBackend::new();
        let mut session = Session::open(Box::new(mock.clone()), resource())
            .await
            .unwrap();
        session.configure(SessionSettings::default()).unwrap();
        assert!(session.is_open());
        assert_eq!(mock.open_handles(), (1, 1));

        session.close().unwrap();
        assert!(!session.is_open());
        assert_eq!(mock.open_handles(), (0, 0));

        // Second close is a no-op.
        session.close().unwrap();
        drop(session);

        let log = mock.call_log();
        assert_eq!(
            log,
            vec![
                MockCall::OpenRm,
                MockCall::Open("TCPIP::169.254.56.79::5025::SOCKET".into()),
                MockCall::SetAttribute(Attribute::TimeoutMs(3000)),
                MockCall::SetAttribute(Attribute::TermChar(b'\n')),
                MockCall::SetAttribute(Attribute::TermCharEnabled(true)),
                MockCall::CloseSession,
                MockCall::CloseRm,
            ]
        );
    }

    #[tokio::test]
    async fn test_resource_manager_failure() {
        let mock = MockBackend::new();
        mock.fail_next(MockOp::OpenRm, TransportError::Simulated("no library".into()));

        let err = Session::open(Box::new(mock.clone()), resource())
            .await
            .unwrap_err();
        assert!(matches!(err, PlayerError::ResourceManager(_)));
        assert_eq!(mock.call_log(), vec![MockCall::OpenRm]);
    }

    #[tokio::test]
    async fn test_open_failure_releases_resource_manager() {
        let mock = MockBackend::new();
        mock.fail_next(
            MockOp::Open,
            TransportError::ResourceNotFound("169.254.56.79:5025".into()),
        );

        let err = Session::open(Box::new(mock.clone()), resource())
            .await
            .unwrap_err();
        assert!(matches!(err, PlayerError::Open { .. }));
        assert_eq!(err.exit_code(), 6);
        assert_eq!(mock.open_handles(), (0, 0));
        assert_eq!(mock.call_log().last(), Some(&MockCall::CloseRm));
    }

    #[tokio::test]
    async fn test_drop_releases_both_handles() {
        let mock = MockBackend::new();
        {
            let session = Session::open(Box::new(mock.clone()), resource())
                .await
                .unwrap();
            assert!(session.is_open());
        }
        assert_eq!(mock.open_handles(), (0, 0));
        let log = mock.call_log();
        assert_eq!(&log[log.len() - 2..], &[MockCall::CloseSession, MockCall::CloseRm]);
    }

    #[tokio::test]
    async fn test_configure_failure_names_attribute() {
        let mock = MockBackend::new();
        let mut session = Session::open(Box::new(mock.clone()), resource())
            .await
            .unwrap();
        mock.fail_next(MockOp::SetAttribute, TransportError::Simulated("rejected".into()));

        let err = session.configure(SessionSettings::default()).unwrap_err();
        match err {
            PlayerError::Configure { attribute, .. } => {
                assert_eq!(attribute, "VI_ATTR_TMO_VALUE=3000")
            }
            other => panic!("unexpected error: {other:?}"),
        }
        assert!(session.settings().is_none());
    }

    #[tokio::test]
    async fn test_io_after_close_is_rejected() {
        let mut session = Session::open(Box::new(MockBackend::new()), resource())
            .await
            .unwrap();
        session.close().unwrap();
        let err = session.write(b"*RST\n").await.unwrap_err();
        assert!(matches!(err, TransportError::SessionClosed));
    }
}
