//! Player configuration using Figment
//!
//! Configuration is layered, later sources winning:
//! 1. Built-in defaults
//! 2. `config/player.toml`, or the file given with `--config`
//! 3. Environment variables prefixed `SCPI_PLAYER_`, nested with `__`
//! 4. Command-line overrides, applied by the binary
//!
//! # Example
//! ```no_run
//! use scpi_player::config::PlayerConfig;
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let config = PlayerConfig::load()?;
//! println!("Instrument: {}", config.transport.resource);
//! # Ok(())
//! # }
//! ```

use crate::error::{PlayerError, PlayerResult};
use crate::logging::OutputFormat;
use crate::session::SessionSettings;
use crate::transport::ResourceId;
use figment::{
    providers::{Env, Format, Serialized, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

/// Configuration file read when no `--config` is given.
pub const DEFAULT_CONFIG_PATH: &str = "config/player.toml";

/// Prefix of environment overrides.
pub const ENV_PREFIX: &str = "SCPI_PLAYER_";

const VALID_LOG_LEVELS: [&str; 5] = ["trace", "debug", "info", "warn", "error"];

/// Top-level player configuration
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PlayerConfig {
    /// Application settings
    pub application: ApplicationConfig,
    /// Instrument connection settings
    pub transport: TransportConfig,
    /// Script playback settings
    pub playback: PlaybackConfig,
}

/// Application-level configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ApplicationConfig {
    /// Application name
    pub name: String,
    /// Logging level (trace, debug, info, warn, error)
    pub log_level: String,
    /// Log output format
    pub log_format: OutputFormat,
}

impl Default for ApplicationConfig {
    fn default() -> Self {
        Self {
            name: "SCPI Script Player".to_string(),
            log_level: "info".to_string(),
            log_format: OutputFormat::Compact,
        }
    }
}

/// Instrument connection configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TransportConfig {
    /// VISA-style resource identifier
    pub resource: ResourceId,
    /// Response timeout in milliseconds
    pub timeout_ms: u32,
    /// Message terminator byte
    pub terminator: u8,
    /// Whether reads stop at the terminator
    pub terminator_enabled: bool,
    /// Receive buffer size in bytes
    pub buffer_capacity: usize,
    /// Baud rate for serial resources
    pub baud_rate: u32,
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            resource: ResourceId::new("TCPIP::169.254.56.79::5025::SOCKET"),
            timeout_ms: 3000,
            terminator: b'\n',
            terminator_enabled: true,
            buffer_capacity: crate::session::DEFAULT_BUFFER_CAPACITY,
            baud_rate: 9600,
        }
    }
}

impl TransportConfig {
    /// Session settings derived from this section.
    pub fn session_settings(&self) -> SessionSettings {
        SessionSettings {
            timeout: Duration::from_millis(u64::from(self.timeout_ms)),
            terminator: self.terminator,
            terminator_enabled: self.terminator_enabled,
            buffer_capacity: self.buffer_capacity,
        }
    }
}

/// Script playback configuration
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PlaybackConfig {
    /// What to do when a write or read fails during playback
    pub on_transport_error: ErrorPolicy,
}

/// Reaction to a transport failure while playing a script.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum ErrorPolicy {
    /// Stop playback and return the error.
    Abort,
    /// Log the error, count it and go on with the next directive.
    #[default]
    Continue,
}

impl PlayerConfig {
    /// Load from the default file and the environment.
    ///
    /// Environment variables override the file, e.g.
    /// `SCPI_PLAYER_TRANSPORT__TIMEOUT_MS=5000`.
    pub fn load() -> PlayerResult<Self> {
        Self::load_from(None)
    }

    /// Load from `path` (or the default file when `None`) and the environment.
    ///
    /// A missing default file is skipped; a missing explicit file is an error.
    pub fn load_from(path: Option<&Path>) -> PlayerResult<Self> {
        let file = match path {
            Some(path) if !path.exists() => {
                return Err(PlayerError::Configuration(format!(
                    "config file not found: {}",
                    path.display()
                )))
            }
            Some(path) => Toml::file(path),
            None => Toml::file(DEFAULT_CONFIG_PATH),
        };

        let config: Self = Self::figment()
            .merge(file)
            .merge(Env::prefixed(ENV_PREFIX).split("__"))
            .extract()?;
        config.validate()?;
        Ok(config)
    }

    /// Built-in defaults as a figment provider chain.
    pub fn figment() -> Figment {
        Figment::from(Serialized::defaults(PlayerConfig::default()))
    }

    /// Validate configuration after loading or overriding
    pub fn validate(&self) -> PlayerResult<()> {
        let level = self.application.log_level.to_lowercase();
        if !VALID_LOG_LEVELS.contains(&level.as_str()) {
            return Err(PlayerError::Configuration(format!(
                "Invalid log_level '{}'. Must be one of: {}",
                self.application.log_level,
                VALID_LOG_LEVELS.join(", ")
            )));
        }

        if self.transport.resource.as_str().trim().is_empty() {
            return Err(PlayerError::Configuration(
                "transport.resource must not be empty".to_string(),
            ));
        }

        if self.transport.timeout_ms == 0 {
            return Err(PlayerError::Configuration(
                "transport.timeout_ms must be greater than 0".to_string(),
            ));
        }

        if self.transport.buffer_capacity == 0 {
            return Err(PlayerError::Configuration(
                "transport.buffer_capacity must be greater than 0".to_string(),
            ));
        }

        Ok(())
    }
}
