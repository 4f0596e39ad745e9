//! Common error types

use crate::transport::TransportError;
use protocol::ProtocolError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    #[error("USB transfer failed: {0}")]
    Transport(#[from] TransportError),

    #[error("Short transfer: expected {expected} bytes, got {actual}")]
    ShortTransfer { expected: usize, actual: usize },

    #[error("Malformed response: {0}")]
    MalformedResponse(ProtocolError),

    #[error("Firmware not found (tried: {})", .candidates.join(", "))]
    FirmwareNotFound { candidates: Vec<String> },

    #[error("Firmware too large: {size} bytes (max: {max})")]
    FirmwareTooLarge { size: usize, max: usize },

    #[error("Interrupted while waiting for the device")]
    Interrupted,

    #[error("Device is gone")]
    DeviceGone,

    #[error("Device has no interrupt endpoint")]
    NoInterruptEndpoint,

    #[error("Port {0} is busy")]
    PortBusy(u8),

    #[error("Port {0} is not open")]
    PortNotOpen(u8),

    #[error("Unsupported device {vendor_id:04x}:{product_id:04x}")]
    UnsupportedDevice { vendor_id: u16, product_id: u16 },

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl Error {
    /// Whether callers must treat this as a device I/O failure
    pub fn is_io(&self) -> bool {
        matches!(
            self,
            Self::Transport(_)
                | Self::ShortTransfer { .. }
                | Self::MalformedResponse(_)
                | Self::NoInterruptEndpoint
        )
    }

    /// Whether the operation may simply be attempted again
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Interrupted)
    }
}

impl From<ProtocolError> for Error {
    fn from(err: ProtocolError) -> Self {
        match err {
            ProtocolError::FirmwareTooLarge { size, max } => Self::FirmwareTooLarge { size, max },
            other => Self::MalformedResponse(other),
        }
    }
}

pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_io_classification() {
        assert!(Error::Transport(TransportError::Pipe).is_io());
        assert!(
            Error::ShortTransfer {
                expected: 5,
                actual: 2
            }
            .is_io()
        );
        assert!(Error::NoInterruptEndpoint.is_io());
        assert!(!Error::Interrupted.is_io());
        assert!(!Error::DeviceGone.is_io());
    }

    #[test]
    fn test_only_interrupted_is_retryable() {
        assert!(Error::Interrupted.is_retryable());
        assert!(!Error::Transport(TransportError::Timeout).is_retryable());
        assert!(!Error::PortBusy(0).is_retryable());
    }

    #[test]
    fn test_protocol_error_mapping() {
        let err: Error = ProtocolError::FirmwareTooLarge {
            size: 20_000,
            max: 16_284,
        }
        .into();
        assert!(matches!(err, Error::FirmwareTooLarge { size: 20_000, .. }));

        let err: Error = ProtocolError::MalformedResponse {
            record: "port status",
            expected: 5,
            actual: 1,
        }
        .into();
        assert!(err.is_io());
    }

    #[test]
    fn test_firmware_not_found_lists_candidates() {
        let err = Error::FirmwareNotFound {
            candidates: vec!["a.fw".to_string(), "b.fw".to_string()],
        };
        assert_eq!(format!("{}", err), "Firmware not found (tried: a.fw, b.fw)");
    }
}
