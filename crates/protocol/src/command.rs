//! Vendor control requests and their addressing
//!
//! Every command is a single-byte vendor request multiplexed with a 16-bit
//! value and a 16-bit index. The index selects the firmware module the
//! command is addressed to: a UART for per-port commands, the RAM module for
//! memory access.

use serde::{Deserialize, Serialize};

/// bmRequestType for host-to-device vendor requests addressed to the device
pub const REQUEST_TYPE_VENDOR_OUT: u8 = 0x40;

/// bmRequestType for device-to-host vendor requests addressed to the device
pub const REQUEST_TYPE_VENDOR_IN: u8 = 0xC0;

/// Continuous pipe transfer mode
const PIPE_MODE_CONTINUOUS: u16 = 0x01;

/// Enable the pipe timeout encoded in bits 2..=6
const PIPE_TIMEOUT_ENABLE: u16 = 0x80;

/// Pipe timeout in firmware ticks
const PIPE_TRANSFER_TIMEOUT: u16 = 2;

/// Value sent with [`Command::OpenPort`]: continuous mode with timeout
pub const OPEN_PORT_SETTINGS: u16 =
    PIPE_MODE_CONTINUOUS | PIPE_TIMEOUT_ENABLE | (PIPE_TRANSFER_TIMEOUT << 2);

/// Vendor request codes understood by the adapter firmware
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[repr(u8)]
pub enum Command {
    GetVersion = 0x01,
    GetPortStatus = 0x02,
    GetPortDevInfo = 0x03,
    GetConfig = 0x04,
    SetConfig = 0x05,
    OpenPort = 0x06,
    ClosePort = 0x07,
    StartPort = 0x08,
    StopPort = 0x09,
    TestPort = 0x0A,
    PurgePort = 0x0B,
    ResetExtDevice = 0x0C,
    WriteData = 0x80,
    ReadData = 0x81,
}

impl Command {
    /// Request byte on the wire
    pub fn code(self) -> u8 {
        self as u8
    }

    /// Look up a command from its request byte
    pub fn from_code(code: u8) -> Option<Self> {
        Some(match code {
            0x01 => Self::GetVersion,
            0x02 => Self::GetPortStatus,
            0x03 => Self::GetPortDevInfo,
            0x04 => Self::GetConfig,
            0x05 => Self::SetConfig,
            0x06 => Self::OpenPort,
            0x07 => Self::ClosePort,
            0x08 => Self::StartPort,
            0x09 => Self::StopPort,
            0x0A => Self::TestPort,
            0x0B => Self::PurgePort,
            0x0C => Self::ResetExtDevice,
            0x80 => Self::WriteData,
            0x81 => Self::ReadData,
            _ => return None,
        })
    }
}

/// Firmware modules addressed through the request index
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[repr(u8)]
pub enum ModuleId {
    I2c = 0x01,
    Ieee1284 = 0x02,
    Uart1 = 0x03,
    Uart2 = 0x04,
    Ram = 0x05,
}

impl ModuleId {
    /// Request index selecting this module
    pub fn index(self) -> u16 {
        u16::from(self as u8)
    }
}

/// Request index of the UART module serving a port ordinal
///
/// Port 0 is served by UART1, port 1 by UART2.
pub fn port_module(port: u8) -> u16 {
    ModuleId::Uart1.index() + u16::from(port)
}

/// Which direction of the UART buffers a purge applies to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PurgeMode {
    Output,
    Input,
}

impl PurgeMode {
    /// Request value for [`Command::PurgePort`]
    pub fn value(self) -> u16 {
        match self {
            Self::Output => 0x00,
            Self::Input => 0x80,
        }
    }
}
