//! Interrupt endpoint events
//!
//! Each event is exactly two bytes: a code byte whose high nibble carries the
//! port ordinal biased by three and whose low nibble carries the event kind,
//! followed by a payload byte.

use crate::error::{ProtocolError, Result};

/// Size of every interrupt event
pub const INTERRUPT_EVENT_SIZE: usize = 2;

/// Code byte reporting a hardware fault instead of a port event
pub const HARDWARE_ERROR_CODE: u8 = 0xFF;

const PORT_BIAS: i16 = 3;

const KIND_DATA_ERROR: u8 = 0x03;
const KIND_MODEM_STATUS: u8 = 0x04;

/// Event kind carried in the low nibble of the code byte
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventKind {
    /// Receive data error, payload is the error code
    DataError,
    /// Modem status change, payload is the MSR
    ModemStatus,
    Unknown(u8),
}

/// A decoded interrupt event
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct InterruptEvent {
    pub code: u8,
    pub payload: u8,
}

impl InterruptEvent {
    /// Decode an event, rejecting anything but exactly two bytes
    pub fn decode(bytes: &[u8]) -> Result<Self> {
        match bytes {
            [code, payload] => Ok(Self {
                code: *code,
                payload: *payload,
            }),
            _ => Err(ProtocolError::MalformedResponse {
                record: "interrupt event",
                expected: INTERRUPT_EVENT_SIZE,
                actual: bytes.len(),
            }),
        }
    }

    /// Whether the code byte is the hardware-error sentinel
    pub fn is_hardware_error(&self) -> bool {
        self.code == HARDWARE_ERROR_CODE
    }

    /// Port ordinal addressed by the event
    ///
    /// Negative ordinals are possible on the wire and are returned as such so
    /// callers can reject them together with out-of-range ones.
    pub fn port(&self) -> i16 {
        i16::from(self.code >> 4) - PORT_BIAS
    }

    /// Event kind
    pub fn kind(&self) -> EventKind {
        match self.code & 0x0F {
            KIND_DATA_ERROR => EventKind::DataError,
            KIND_MODEM_STATUS => EventKind::ModemStatus,
            other => EventKind::Unknown(other),
        }
    }

    /// Build the code byte for a port ordinal and kind nibble
    ///
    /// `None` when the biased ordinal does not fit the high nibble.
    pub fn code_for(port: u8, kind: u8) -> Option<u8> {
        let biased = port.checked_add(PORT_BIAS as u8).filter(|n| *n <= 0x0F)?;
        Some((biased << 4) | (kind & 0x0F))
    }
}
