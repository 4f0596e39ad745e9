//! USB transport capability
//!
//! The adapter core never talks to a USB stack directly. It is written
//! against [`UsbTransport`], a synchronous set of control, bulk and interrupt
//! primitives for one opened device, and against [`DataPath`], the bulk
//! streaming layer that moves application bytes once a port is open.

use std::time::Duration;
use thiserror::Error;

/// Transport-level failure of a single USB operation
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TransportError {
    #[error("Transfer timed out")]
    Timeout,

    #[error("Endpoint stalled")]
    Pipe,

    #[error("Device disconnected")]
    NoDevice,

    #[error("Entity not found")]
    NotFound,

    #[error("Resource busy")]
    Busy,

    #[error("Buffer overflow")]
    Overflow,

    #[error("Input/output error")]
    Io,

    #[error("Invalid parameter")]
    InvalidParam,

    #[error("Access denied")]
    Access,

    /// The transfer was torn down deliberately by the host
    #[error("Transfer cancelled")]
    Cancelled,

    #[error("{0}")]
    Other(String),
}

/// Descriptor facts about an opened device
///
/// Endpoint lists are ordered by ascending address; the n-th bulk pair serves
/// port n.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct DeviceLayout {
    pub vendor_id: u16,
    pub product_id: u16,
    /// bNumConfigurations of the device descriptor
    pub num_configurations: u8,
    /// bConfigurationValue of the active configuration
    pub active_configuration: u8,
    /// bNumEndpoints of the active interface setting
    pub num_endpoints: u8,
    pub interrupt_in: Option<u8>,
    pub bulk_in: Vec<u8>,
    pub bulk_out: Vec<u8>,
}

/// Synchronous USB primitives for one opened device
///
/// Control requests are vendor requests addressed to the device. Every call
/// returns the number of bytes actually transferred; deciding whether a short
/// transfer is acceptable is up to the caller.
pub trait UsbTransport: Send + Sync {
    /// Descriptor facts captured when the device was opened
    fn layout(&self) -> &DeviceLayout;

    fn control_out(
        &self,
        request: u8,
        value: u16,
        index: u16,
        data: &[u8],
        timeout: Duration,
    ) -> Result<usize, TransportError>;

    fn control_in(
        &self,
        request: u8,
        value: u16,
        index: u16,
        buf: &mut [u8],
        timeout: Duration,
    ) -> Result<usize, TransportError>;

    fn bulk_out(&self, endpoint: u8, data: &[u8], timeout: Duration)
    -> Result<usize, TransportError>;

    /// Wait for one bulk-IN transfer; `Timeout` when nothing arrived
    fn bulk_in(&self, endpoint: u8, buf: &mut [u8], timeout: Duration)
    -> Result<usize, TransportError>;

    /// Wait for one interrupt-IN completion
    ///
    /// Returns [`TransportError::Timeout`] when nothing arrived in time, which
    /// is not a failure of the endpoint.
    fn interrupt_in(
        &self,
        endpoint: u8,
        buf: &mut [u8],
        timeout: Duration,
    ) -> Result<usize, TransportError>;

    /// Clear a halt condition, resetting the endpoint's data toggle
    fn clear_halt(&self, endpoint: u8) -> Result<(), TransportError>;

    /// Port-reset the device; it re-enumerates afterwards
    fn reset(&self) -> Result<(), TransportError>;

    /// Select a configuration by bConfigurationValue
    fn set_configuration(&self, value: u8) -> Result<(), TransportError>;
}

/// Bulk streaming layer serving open ports
pub trait DataPath: Send + Sync {
    /// Start continuous bulk-IN reception for a port
    fn start_reading(&self, port: u8) -> Result<(), TransportError>;

    /// Stop all in-flight bulk transfers of a port
    fn stop(&self, port: u8);
}
