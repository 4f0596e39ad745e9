//! Wire protocol for TI 3410/5052 USB serial adapters
//!
//! This crate defines the fixed-layout binary records exchanged with the
//! adapter firmware over USB control, bulk and interrupt transfers, together
//! with the command, module and register constants they carry.
//!
//! Every record is a packed byte sequence. Field order and endianness are part
//! of the contract: the UART configuration and memory-write records carry
//! big-endian words, the firmware header carries a little-endian length.
//!
//! # Example
//!
//! ```
//! use protocol::{DataBits, Parity, StopBits, UartConfig, UartFlags, UartMode};
//!
//! let config = UartConfig {
//!     baud_divisor: 96,
//!     flags: UartFlags::ENABLE_MS_INTS | UartFlags::ENABLE_AUTO_START_DMA,
//!     data_bits: DataBits::Eight,
//!     parity: Parity::None,
//!     stop_bits: StopBits::One,
//!     xon: 0x11,
//!     xoff: 0x13,
//!     uart_mode: UartMode::Rs232,
//! };
//!
//! let bytes = config.encode();
//! assert_eq!(bytes.len(), UartConfig::SIZE);
//! assert_eq!(&bytes[..2], &[0x00, 0x60]);
//! ```

pub mod command;
pub mod error;
pub mod event;
pub mod firmware;
pub mod memory;
pub mod registers;
pub mod status;
pub mod uart;

pub use command::{
    Command, ModuleId, OPEN_PORT_SETTINGS, PurgeMode, REQUEST_TYPE_VENDOR_IN,
    REQUEST_TYPE_VENDOR_OUT, port_module,
};
pub use error::{ProtocolError, Result};
pub use event::{EventKind, InterruptEvent, HARDWARE_ERROR_CODE, INTERRUPT_EVENT_SIZE};
pub use firmware::{
    DOWNLOAD_BUFFER_SIZE, DOWNLOAD_CHUNK_SIZE, FIRMWARE_FILL_BYTE, FirmwareHeader,
    MAX_FIRMWARE_SIZE, build_download_buffer, download_checksum,
};
pub use memory::{AddressSpace, DataType, MemoryWrite};
pub use registers::{LineControl, LineStatus, ModemControl, ModemStatus};
pub use status::PortStatus;
pub use uart::{DataBits, Parity, StopBits, UartConfig, UartFlags, UartMode};
