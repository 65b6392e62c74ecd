//! Error types for the player.
//!
//! Two layers of errors exist, mirroring the two layers of the system:
//!
//! - **`TransportError`**: a status reported by a transport backend for a single
//!   primitive (open, set attribute, write, read, close). Each variant maps to the
//!   VISA status code an equivalent VISA call would have returned, so log output can
//!   be correlated with vendor tooling.
//! - **`PlayerError`**: a run-level failure. Configuration- and connection-level
//!   variants are fatal and end the run before any directive is processed;
//!   `Write` and `Read` wrap transport failures during playback and are subject to
//!   the configured [`ErrorPolicy`](crate::config::ErrorPolicy).
//!
//! Timeouts on a query are *not* a `PlayerError`: the reader reports them as
//! [`ReadOutcome::TimedOut`](crate::reader::ReadOutcome) and the run continues.

use std::path::PathBuf;
use thiserror::Error;

/// VISA status: operation completed successfully.
pub const VI_SUCCESS: i32 = 0;
/// VISA status: the specified termination character was read.
pub const VI_SUCCESS_TERM_CHAR: i32 = 0x3FFF_0005;
/// VISA status: the number of bytes read equals the input count.
pub const VI_SUCCESS_MAX_CNT: i32 = 0x3FFF_0006;

const VI_ERROR_INV_OBJECT: u32 = 0xBFFF_000E;
const VI_ERROR_RSRC_LOCKED: u32 = 0xBFFF_000F;
const VI_ERROR_RSRC_NFOUND: u32 = 0xBFFF_0011;
const VI_ERROR_TMO: u32 = 0xBFFF_0015;
const VI_ERROR_IO: u32 = 0xBFFF_003E;
const VI_ERROR_NSUP_OPER: u32 = 0xBFFF_0067;
const VI_ERROR_CONN_LOST: u32 = 0xBFFF_00A6;

/// Convenience alias for results of transport primitives.
pub type TransportResult<T> = std::result::Result<T, TransportError>;

/// Convenience alias for results using the run-level error type.
pub type PlayerResult<T> = std::result::Result<T, PlayerError>;

/// Status of a failed transport primitive.
#[derive(Error, Debug)]
pub enum TransportError {
    #[error("Timeout expired before operation completed")]
    Timeout,

    #[error("Invalid handle: {0}")]
    InvalidHandle(u32),

    #[error("Session is closed")]
    SessionClosed,

    #[error("Resource not found: {0}")]
    ResourceNotFound(String),

    #[error("Resource is locked by another session: {0}")]
    ResourceLocked(String),

    #[error("Malformed resource identifier '{0}'")]
    InvalidResource(String),

    #[error("Unsupported resource class for this transport: {0}")]
    UnsupportedResource(String),

    #[error("Connection to instrument lost")]
    ConnectionLost,

    #[error("Feature '{0}' is not enabled. Please build with --features {0}")]
    FeatureNotEnabled(&'static str),

    #[error("VISA library error: {0}")]
    Visa(String),

    #[error("Injected failure: {0}")]
    Simulated(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl TransportError {
    /// The VISA status code an equivalent VISA call would have returned.
    pub fn status_code(&self) -> i32 {
        let code = match self {
            TransportError::Timeout => VI_ERROR_TMO,
            TransportError::InvalidHandle(_) | TransportError::SessionClosed => VI_ERROR_INV_OBJECT,
            TransportError::ResourceNotFound(_) | TransportError::InvalidResource(_) => {
                VI_ERROR_RSRC_NFOUND
            }
            TransportError::ResourceLocked(_) => VI_ERROR_RSRC_LOCKED,
            TransportError::UnsupportedResource(_) | TransportError::FeatureNotEnabled(_) => {
                VI_ERROR_NSUP_OPER
            }
            TransportError::ConnectionLost => VI_ERROR_CONN_LOST,
            TransportError::Visa(_) | TransportError::Simulated(_) | TransportError::Io(_) => {
                VI_ERROR_IO
            }
        };
        code as i32
    }

    /// Whether this status is the timeout condition.
    pub fn is_timeout(&self) -> bool {
        matches!(self, TransportError::Timeout)
    }
}

/// Run-level error.
#[derive(Error, Debug)]
pub enum PlayerError {
    #[error("Usage: vp <script>")]
    Usage,

    #[error("Cannot open \"{}\"", .0.display())]
    FileNotFound(PathBuf),

    #[error("Configuration error: {0}")]
    Config(#[from] Box<figment::Error>),

    #[error("Configuration validation error: {0}")]
    Configuration(String),

    #[error("Failed to open resource manager: {0}")]
    ResourceManager(#[source] TransportError),

    #[error("Failed to open resource '{resource}': {source}")]
    Open {
        resource: String,
        #[source]
        source: TransportError,
    },

    #[error("Failed to set session attribute {attribute}: {source}")]
    Configure {
        attribute: String,
        #[source]
        source: TransportError,
    },

    #[error("Write failed at line {line}: {source}")]
    Write {
        line: u64,
        #[source]
        source: TransportError,
    },

    #[error("Read failed at line {line}: {source}")]
    Read {
        line: u64,
        #[source]
        source: TransportError,
    },

    #[error("Playback finished with {0} transport error(s)")]
    PlaybackErrors(u64),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<figment::Error> for PlayerError {
    fn from(err: figment::Error) -> Self {
        PlayerError::Config(Box::new(err))
    }
}

impl PlayerError {
    /// Process exit code for this failure.
    pub fn exit_code(&self) -> u8 {
        match self {
            PlayerError::Io(_) => 1,
            PlayerError::Usage => 2,
            PlayerError::FileNotFound(_) => 3,
            PlayerError::Config(_) | PlayerError::Configuration(_) => 4,
            PlayerError::ResourceManager(_) => 5,
            PlayerError::Open { .. } | PlayerError::Configure { .. } => 6,
            PlayerError::Write { .. } | PlayerError::Read { .. } | PlayerError::PlaybackErrors(_) => 7,
        }
    }

    /// The transport status behind this error, if any.
    pub fn transport_error(&self) -> Option<&TransportError> {
        match self {
            PlayerError::ResourceManager(source)
            | PlayerError::Open { source, .. }
            | PlayerError::Configure { source, .. }
            | PlayerError::Write { source, .. }
            | PlayerError::Read { source, .. } => Some(source),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_timeout_status_matches_visa() {
        assert_eq!(TransportError::Timeout.status_code(), -1073807339);
        assert!(TransportError::Timeout.is_timeout());
        assert!(!TransportError::ConnectionLost.is_timeout());
    }

    #[test]
    fn test_exit_codes_are_distinct_per_failure_class() {
        let errors = [
            PlayerError::Usage,
            PlayerError::FileNotFound(PathBuf::from("missing.txt")),
            PlayerError::Configuration("bad".into()),
            PlayerError::ResourceManager(TransportError::Simulated("rm".into())),
            PlayerError::Open {
                resource: "GPIB8::1::INSTR".into(),
                source: TransportError::ResourceNotFound("GPIB8::1::INSTR".into()),
            },
            PlayerError::Write {
                line: 3,
                source: TransportError::ConnectionLost,
            },
        ];
        let codes: Vec<u8> = errors.iter().map(PlayerError::exit_code).collect();
        assert_eq!(codes, vec![2, 3, 4, 5, 6, 7]);
    }

    #[test]
    fn test_file_not_found_message() {
        let err = PlayerError::FileNotFound(PathBuf::from("script.txt"));
        assert_eq!(err.to_string(), "Cannot open \"script.txt\"");
    }

    #[test]
    fn test_transport_error_is_exposed() {
        let err = PlayerError::Read {
            line: 7,
            source: TransportError::ConnectionLost,
        };
        assert!(matches!(
            err.transport_error(),
            Some(TransportError::ConnectionLost)
        ));
        assert!(PlayerError::Usage.transport_error().is_none());
    }
}
