//! Protocol error types

use thiserror::Error;

/// Protocol-level errors
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ProtocolError {
    /// A received record does not have the fixed size of its layout
    #[error("Malformed {record} response: expected {expected} bytes, got {actual}")]
    MalformedResponse {
        record: &'static str,
        expected: usize,
        actual: usize,
    },

    /// A record field holds a value outside its enumeration
    #[error("Invalid {field} value: {value:#04x}")]
    InvalidField { field: &'static str, value: u8 },

    /// Firmware image does not fit the device download buffer
    #[error("Firmware too large: {size} bytes (max: {max})")]
    FirmwareTooLarge { size: usize, max: usize },
}

/// Type alias for protocol results
pub type Result<T> = std::result::Result<T, ProtocolError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_malformed_display() {
        let err = ProtocolError::MalformedResponse {
            record: "port status",
            expected: 5,
            actual: 3,
        };
        let msg = format!("{}", err);
        assert!(msg.contains("port status"));
        assert!(msg.contains("expected 5"));
        assert!(msg.contains("got 3"));
    }

    #[test]
    fn test_firmware_too_large_display() {
        let err = ProtocolError::FirmwareTooLarge {
            size: 20_000,
            max: 16_284,
        };
        assert!(format!("{}", err).contains("Firmware too large"));
    }
}
