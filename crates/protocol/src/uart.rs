//! UART configuration record
//!
//! Sent with [`Command::SetConfig`](crate::Command::SetConfig) and returned by
//! [`Command::GetConfig`](crate::Command::GetConfig).
//!
//! # Layout
//!
//! ```text
//! offset  size  field
//! 0       2     baud divisor (big-endian)
//! 2       2     flags (big-endian)
//! 4       1     data bits code
//! 5       1     parity code
//! 6       1     stop bits code
//! 7       1     XON character
//! 8       1     XOFF character
//! 9       1     UART mode
//! ```

use crate::error::{ProtocolError, Result};
use bitflags::bitflags;
use byteorder::{BigEndian, ByteOrder};
use serde::{Deserialize, Serialize};

bitflags! {
    /// Feature flags of the UART configuration record
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct UartFlags: u16 {
        const ENABLE_RTS_IN = 0x0001;
        const DISABLE_RTS = 0x0002;
        const ENABLE_PARITY_CHECKING = 0x0008;
        const ENABLE_DSR_OUT = 0x0010;
        const ENABLE_CTS_OUT = 0x0020;
        const ENABLE_X_OUT = 0x0040;
        const ENABLE_XA_OUT = 0x0080;
        const ENABLE_X_IN = 0x0100;
        const ENABLE_DTR_IN = 0x0800;
        const DISABLE_DTR = 0x1000;
        const ENABLE_MS_INTS = 0x2000;
        const ENABLE_AUTO_START_DMA = 0x4000;
    }
}

/// Character size
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[repr(u8)]
pub enum DataBits {
    Five = 0x00,
    Six = 0x01,
    Seven = 0x02,
    Eight = 0x03,
}

impl DataBits {
    /// Map a bit count to its code, anything unrecognized becomes 8 bits
    pub fn from_count(bits: u8) -> Self {
        match bits {
            5 => Self::Five,
            6 => Self::Six,
            7 => Self::Seven,
            _ => Self::Eight,
        }
    }

    /// Number of bits per character
    pub fn count(self) -> u8 {
        match self {
            Self::Five => 5,
            Self::Six => 6,
            Self::Seven => 7,
            Self::Eight => 8,
        }
    }

    fn from_code(code: u8) -> Result<Self> {
        Ok(match code {
            0x00 => Self::Five,
            0x01 => Self::Six,
            0x02 => Self::Seven,
            0x03 => Self::Eight,
            value => {
                return Err(ProtocolError::InvalidField {
                    field: "data bits",
                    value,
                });
            }
        })
    }
}

/// Parity mode
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[repr(u8)]
pub enum Parity {
    None = 0x00,
    Odd = 0x01,
    Even = 0x02,
    Mark = 0x03,
    Space = 0x04,
}

impl Parity {
    fn from_code(code: u8) -> Result<Self> {
        Ok(match code {
            0x00 => Self::None,
            0x01 => Self::Odd,
            0x02 => Self::Even,
            0x03 => Self::Mark,
            0x04 => Self::Space,
            value => {
                return Err(ProtocolError::InvalidField {
                    field: "parity",
                    value,
                });
            }
        })
    }
}

/// Stop bit count
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[repr(u8)]
pub enum StopBits {
    One = 0x00,
    OnePointFive = 0x01,
    Two = 0x02,
}

impl StopBits {
    fn from_code(code: u8) -> Result<Self> {
        Ok(match code {
            0x00 => Self::One,
            0x01 => Self::OnePointFive,
            0x02 => Self::Two,
            value => {
                return Err(ProtocolError::InvalidField {
                    field: "stop bits",
                    value,
                });
            }
        })
    }
}

/// Electrical line mode
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[repr(u8)]
pub enum UartMode {
    #[default]
    Rs232 = 0x00,
    Rs485ReceiverDisabled = 0x01,
    Rs485ReceiverEnabled = 0x02,
}

impl UartMode {
    fn from_code(code: u8) -> Result<Self> {
        Ok(match code {
            0x00 => Self::Rs232,
            0x01 => Self::Rs485ReceiverDisabled,
            0x02 => Self::Rs485ReceiverEnabled,
            value => {
                return Err(ProtocolError::InvalidField {
                    field: "uart mode",
                    value,
                });
            }
        })
    }
}

/// UART configuration record
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct UartConfig {
    /// Baud rate divisor of the family base clock
    pub baud_divisor: u16,
    pub flags: UartFlags,
    pub data_bits: DataBits,
    pub parity: Parity,
    pub stop_bits: StopBits,
    /// Software flow control start character
    pub xon: u8,
    /// Software flow control stop character
    pub xoff: u8,
    pub uart_mode: UartMode,
}

impl UartConfig {
    /// Encoded size in bytes
    pub const SIZE: usize = 10;

    /// Encode into the wire layout
    pub fn encode(&self) -> [u8; Self::SIZE] {
        let mut buf = [0u8; Self::SIZE];
        BigEndian::write_u16(&mut buf[0..2], self.baud_divisor);
        BigEndian::write_u16(&mut buf[2..4], self.flags.bits());
        buf[4] = self.data_bits as u8;
        buf[5] = self.parity as u8;
        buf[6] = self.stop_bits as u8;
        buf[7] = self.xon;
        buf[8] = self.xoff;
        buf[9] = self.uart_mode as u8;
        buf
    }

    /// Decode from the wire layout
    ///
    /// Unknown flag bits are retained.
    pub fn decode(bytes: &[u8]) -> Result<Self> {
        if bytes.len() != Self::SIZE {
            return Err(ProtocolError::MalformedResponse {
                record: "uart config",
                expected: Self::SIZE,
                actual: bytes.len(),
            });
        }

        Ok(Self {
            baud_divisor: BigEndian::read_u16(&bytes[0..2]),
            flags: UartFlags::from_bits_retain(BigEndian::read_u16(&bytes[2..4])),
            data_bits: DataBits::from_code(bytes[4])?,
            parity: Parity::from_code(bytes[5])?,
            stop_bits: StopBits::from_code(bytes[6])?,
            xon: bytes[7],
            xoff: bytes[8],
            uart_mode: UartMode::from_code(bytes[9])?,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> UartConfig {
        UartConfig {
            baud_divisor: 0x1234,
            flags: UartFlags::ENABLE_MS_INTS
                | UartFlags::ENABLE_AUTO_START_DMA
                | UartFlags::ENABLE_CTS_OUT,
            data_bits: DataBits::Seven,
            parity: Parity::Even,
            stop_bits: StopBits::Two,
            xon: 0x11,
            xoff: 0x13,
            uart_mode: UartMode::Rs485ReceiverDisabled,
        }
    }

    #[test]
    fn test_encode_layout() {
        let bytes = sample().encode();
        assert_eq!(
            bytes,
            [0x12, 0x34, 0x60, 0x20, 0x02, 0x02, 0x02, 0x11, 0x13, 0x01]
        );
    }

    #[test]
    fn test_decode_rejects_wrong_size() {
        let err = UartConfig::decode(&[0u8; 9]).unwrap_err();
        assert!(matches!(
            err,
            ProtocolError::MalformedResponse {
                expected: 10,
                actual: 9,
                ..
            }
        ));
    }

    #[test]
    fn test_decode_encoded() {
        let config = sample();
        assert_eq!(UartConfig::decode(&config.encode()).unwrap(), config);
    }

    #[test]
    fn test_decode_invalid_parity() {
        let mut bytes = sample().encode();
        bytes[5] = 0x09;
        assert_eq!(
            UartConfig::decode(&bytes).unwrap_err(),
            ProtocolError::InvalidField {
                field: "parity",
                value: 0x09
            }
        );
    }

    #[test]
    fn test_data_bits_mapping() {
        assert_eq!(DataBits::from_count(5), DataBits::Five);
        assert_eq!(DataBits::from_count(6), DataBits::Six);
        assert_eq!(DataBits::from_count(7), DataBits::Seven);
        assert_eq!(DataBits::from_count(8), DataBits::Eight);
        assert_eq!(DataBits::from_count(9), DataBits::Eight);
        assert_eq!(DataBits::from_count(0), DataBits::Eight);
    }
}
