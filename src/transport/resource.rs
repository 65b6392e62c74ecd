//! VISA-style resource identifiers.
//!
//! The identifier is carried around as an opaque string; only transport backends
//! call [`ResourceId::kind`] to decide how to reach the endpoint.
//!
//! Recognised forms (case-insensitive):
//! - `TCPIP[board]::<host>::<port>::SOCKET`
//! - `TCPIP[board]::<host>[::<device>]::INSTR`
//! - `ASRL[board]::INSTR`, `ASRL<device path>::INSTR`
//! - `GPIB[board]::<primary>[::<secondary>]::INSTR`
//! - `USB[board]::<vendor>::<product>::<serial>[::<interface>]::INSTR`

use crate::error::{TransportError, TransportResult};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Opaque name of a transport endpoint.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ResourceId(String);

/// Endpoint addressing scheme decoded from a [`ResourceId`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ResourceKind {
    /// Raw TCP socket.
    Socket {
        /// Host name or address.
        host: String,
        /// TCP port.
        port: u16,
    },
    /// VXI-11 / LAN instrument.
    LanInstrument {
        /// Host name or address.
        host: String,
    },
    /// Serial port.
    Serial {
        /// Operating-system device name.
        port: String,
    },
    /// GPIB bus address.
    Gpib {
        /// Interface board number.
        board: u16,
        /// Primary address.
        primary: u16,
    },
    /// USB-TMC device.
    Usb,
}

impl ResourceId {
    /// Wrap a resource string.
    pub fn new(raw: impl Into<String>) -> Self {
        Self(raw.into())
    }

    /// The identifier as given.
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Decode the addressing scheme.
    pub fn kind(&self) -> TransportResult<ResourceKind> {
        let parts: Vec<&str> = self.0.trim().split("::").collect();
        let invalid = || TransportError::InvalidResource(self.0.clone());
        let (head, rest) = parts.split_first().ok_or_else(invalid)?;
        let class = rest.last().map(|c| c.to_ascii_uppercase()).unwrap_or_default();
        let upper = head.to_ascii_uppercase();

        if let Some(board) = upper.strip_prefix("TCPIP") {
            parse_board(board).ok_or_else(invalid)?;
            return match (class.as_str(), rest) {
                ("SOCKET", [host, port, _]) => Ok(ResourceKind::Socket {
                    host: (*host).to_string(),
                    port: port.parse().map_err(|_| invalid())?,
                }),
                ("INSTR", [host, ..]) => Ok(ResourceKind::LanInstrument {
                    host: (*host).to_string(),
                }),
                _ => Err(invalid()),
            };
        }

        if upper.starts_with("ASRL") && class == "INSTR" && rest.len() == 1 {
            let suffix = &head[4..];
            return match parse_board(suffix) {
                Some(board) => Ok(ResourceKind::Serial {
                    port: serial_device_for_board(board.max(1)),
                }),
                None if !suffix.is_empty() => Ok(ResourceKind::Serial {
                    port: suffix.to_string(),
                }),
                None => Err(invalid()),
            };
        }

        if let Some(board) = upper.strip_prefix("GPIB") {
            let board = parse_board(board).ok_or_else(invalid)?;
            return match (class.as_str(), rest) {
                ("INSTR", [primary, ..]) => Ok(ResourceKind::Gpib {
                    board,
                    primary: primary.parse().map_err(|_| invalid())?,
                }),
                _ => Err(invalid()),
            };
        }

        if let Some(board) = upper.strip_prefix("USB") {
            parse_board(board).ok_or_else(invalid)?;
            if class == "INSTR" && rest.len() >= 4 {
                return Ok(ResourceKind::Usb);
            }
        }

        Err(invalid())
    }
}

/// Empty board suffix means board 0.
fn parse_board(suffix: &str) -> Option<u16> {
    if suffix.is_empty() {
        Some(0)
    } else {
        suffix.parse().ok()
    }
}

#[cfg(windows)]
fn serial_device_for_board(board: u16) -> String {
    format!("COM{}", board)
}

#[cfg(not(windows))]
fn serial_device_for_board(board: u16) -> String {
    format!("/dev/ttyS{}", board - 1)
}

impl fmt::Display for ResourceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for ResourceId {
    fn from(raw: &str) -> Self {
        Self::new(raw)
    }
}

impl From<String> for ResourceId {
    fn from(raw: String) -> Self {
        Self(raw)
    }
}
