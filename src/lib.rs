//! # SCPI Script Player
//!
//! Replays a plain-text script of SCPI directives against a single instrument,
//! one directive per line, and prints a numbered transcript of what was sent and
//! what came back.
//!
//! ## Crate Structure
//!
//! - **`transport`**: the [`Backend`](transport::Backend) trait with its VISA-like
//!   primitives, plus the socket/serial, VISA-library and mock implementations.
//! - **`session`**: [`Session`](session::Session), the open/configure/close
//!   lifecycle of one instrument connection with scoped release of its handles.
//! - **`writer`** / **`reader`**: message framing. Outgoing directives are
//!   newline-terminated ASCII; incoming responses are reassembled from as many
//!   buffer-sized reads as it takes.
//! - **`directive`**: one script line and its classification.
//! - **`player`**: the driving loop and [`run_script`](player::run_script).
//! - **`config`**: layered configuration (defaults, TOML, environment).
//! - **`logging`**: `tracing` subscriber setup.
//! - **`error`**: transport statuses and run-level errors.

pub mod config;
pub mod directive;
pub mod error;
pub mod logging;
pub mod player;
pub mod reader;
pub mod session;
pub mod transport;
pub mod writer;

pub use config::{ErrorPolicy, PlayerConfig};
pub use directive::Directive;
pub use error::{PlayerError, PlayerResult, TransportError, TransportResult};
pub use player::{run_script, RunSummary, ScriptPlayer};
pub use reader::{MessageReader, ReadOutcome, Response};
pub use session::{Session, SessionSettings};
pub use writer::MessageWriter;
