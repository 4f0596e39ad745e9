//! Port status record returned by `GET_PORT_STATUS`

use crate::error::{ProtocolError, Result};
use crate::registers::{LineStatus, ModemStatus};

/// Port status record
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PortStatus {
    /// Echo of the command that produced this record
    pub command: u8,
    /// Module the status belongs to
    pub module: u8,
    /// Firmware error code, zero on success
    pub error_code: u8,
    pub msr: ModemStatus,
    pub lsr: LineStatus,
}

impl PortStatus {
    /// Encoded size in bytes
    pub const SIZE: usize = 5;

    /// Decode a status record, rejecting anything but exactly [`Self::SIZE`] bytes
    pub fn decode(bytes: &[u8]) -> Result<Self> {
        if bytes.len() != Self::SIZE {
            return Err(ProtocolError::MalformedResponse {
                record: "port status",
                expected: Self::SIZE,
                actual: bytes.len(),
            });
        }

        Ok(Self {
            command: bytes[0],
            module: bytes[1],
            error_code: bytes[2],
            msr: ModemStatus::from_bits_retain(bytes[3]),
            lsr: LineStatus::from_bits_retain(bytes[4]),
        })
    }

    /// Encode into the wire layout
    pub fn encode(&self) -> [u8; Self::SIZE] {
        [
            self.command,
            self.module,
            self.error_code,
            self.msr.bits(),
            self.lsr.bits(),
        ]
    }
}
