//! Host-side controller for TI 3410/5052 USB serial adapters
//!
//! The adapter core is synchronous and written against the
//! [`common::UsbTransport`] capability:
//!
//! - [`DeviceSession::attach`] brings an adapter up: firmware download,
//!   configuration switch, or a ready session
//! - [`PortSession`] opens and closes ports under the device gate and carries
//!   line settings, modem control and status queries
//! - the interrupt dispatcher keeps the cached modem status of every port
//!   current while at least one port is open
//!
//! The `usb` module binds the core to real hardware through `rusb`.

pub mod config;
pub mod device;
pub mod firmware;
pub mod gate;
pub mod identity;
pub mod interrupt;
pub mod port;
pub mod termios;
pub mod usb;

pub use config::AdapterConfig;
pub use device::{AttachOutcome, DeviceSession, FirmwareState, SessionOptions};
pub use firmware::{DirectoryFirmware, FirmwareSource, MemoryFirmware};
pub use identity::{DeviceIdentity, Family, IdentityTable};
pub use port::{ModemCounters, ModemLines, PortPhase, PortSession, SerialInfo};
pub use termios::{LineParity, LineSettings};
