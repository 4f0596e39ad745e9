//! `rusb` implementation of the transport capability

use common::{DeviceLayout, TransportError, UsbTransport};
use protocol::{REQUEST_TYPE_VENDOR_IN, REQUEST_TYPE_VENDOR_OUT};
use rusb::{Context, Device, DeviceHandle, Direction, TransferType};
use std::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};
use std::time::Duration;
use tracing::{debug, warn};

/// Map rusb errors to transport errors
pub fn map_rusb_error(err: rusb::Error) -> TransportError {
    match err {
        rusb::Error::Timeout => TransportError::Timeout,
        rusb::Error::Pipe => TransportError::Pipe,
        rusb::Error::NoDevice => TransportError::NoDevice,
        rusb::Error::NotFound => TransportError::NotFound,
        rusb::Error::Busy => TransportError::Busy,
        rusb::Error::Overflow => TransportError::Overflow,
        rusb::Error::Io => TransportError::Io,
        rusb::Error::InvalidParam => TransportError::InvalidParam,
        rusb::Error::Access => TransportError::Access,
        rusb::Error::Interrupted => TransportError::Cancelled,
        _ => TransportError::Other(err.to_string()),
    }
}

/// Read the endpoint layout of a device's active configuration
///
/// Only the first interface is considered; the adapters expose a single
/// vendor interface.
pub fn read_layout(device: &Device<Context>) -> Result<DeviceLayout, rusb::Error> {
    let descriptor = device.device_descriptor()?;
    let config = device.active_config_descriptor()?;

    let mut layout = DeviceLayout {
        vendor_id: descriptor.vendor_id(),
        product_id: descriptor.product_id(),
        num_configurations: descriptor.num_configurations(),
        active_configuration: config.number(),
        ..Default::default()
    };

    if let Some(setting) = config
        .interfaces()
        .next()
        .and_then(|interface| interface.descriptors().next())
    {
        layout.num_endpoints = setting.num_endpoints();
        for endpoint in setting.endpoint_descriptors() {
            match (endpoint.transfer_type(), endpoint.direction()) {
                (TransferType::Interrupt, Direction::In) if layout.interrupt_in.is_none() => {
                    layout.interrupt_in = Some(endpoint.address());
                }
                (TransferType::Bulk, Direction::In) => layout.bulk_in.push(endpoint.address()),
                (TransferType::Bulk, Direction::Out) => layout.bulk_out.push(endpoint.address()),
                _ => {}
            }
        }
    }

    layout.bulk_in.sort_unstable();
    layout.bulk_out.sort_unstable();
    Ok(layout)
}

/// An opened adapter
///
/// Transfers share the handle for reading; halt clearing, reset and
/// configuration changes take it exclusively.
pub struct RusbTransport {
    handle: RwLock<DeviceHandle<Context>>,
    layout: DeviceLayout,
    claimed_interfaces: Vec<u8>,
}

impl RusbTransport {
    /// Open a device, detaching kernel drivers and claiming its interfaces
    pub fn open(device: &Device<Context>) -> Result<Self, rusb::Error> {
        let layout = read_layout(device)?;
        let mut handle = device.open()?;
        let config = device.active_config_descriptor()?;
        let mut claimed_interfaces = Vec::new();

        for interface in config.interfaces() {
            let number = interface.number();

            match handle.kernel_driver_active(number) {
                Ok(true) => {
                    debug!("Detaching kernel driver from interface {}", number);
                    if let Err(e) = handle.detach_kernel_driver(number) {
                        warn!("Failed to detach kernel driver from interface {}: {}", number, e);
                    }
                }
                Ok(false) => {}
                Err(e) => debug!("Kernel driver state of interface {} unknown: {}", number, e),
            }

            handle.claim_interface(number).inspect_err(|e| {
                warn!("Failed to claim interface {}: {}", number, e);
            })?;
            claimed_interfaces.push(number);
        }

        debug!(
            "Opened {:04x}:{:04x} with layout {:?}",
            layout.vendor_id, layout.product_id, layout
        );
        Ok(Self {
            handle: RwLock::new(handle),
            layout,
            claimed_interfaces,
        })
    }

    fn handle(&self) -> RwLockReadGuard<'_, DeviceHandle<Context>> {
        self.handle.read().unwrap_or_else(|e| e.into_inner())
    }

    fn handle_mut(&self) -> RwLockWriteGuard<'_, DeviceHandle<Context>> {
        self.handle.write().unwrap_or_else(|e| e.into_inner())
    }
}

impl UsbTransport for RusbTransport {
    fn layout(&self) -> &DeviceLayout {
        &self.layout
    }

    fn control_out(
        &self,
        request: u8,
        value: u16,
        index: u16,
        data: &[u8],
        timeout: Duration,
    ) -> Result<usize, TransportError> {
        self.handle()
            .write_control(REQUEST_TYPE_VENDOR_OUT, request, value, index, data, timeout)
            .map_err(map_rusb_error)
    }

    fn control_in(
        &self,
        request: u8,
        value: u16,
        index: u16,
        buf: &mut [u8],
        timeout: Duration,
    ) -> Result<usize, TransportError> {
        self.handle()
            .read_control(REQUEST_TYPE_VENDOR_IN, request, value, index, buf, timeout)
            .map_err(map_rusb_error)
    }

    fn bulk_out(
        &self,
        endpoint: u8,
        data: &[u8],
        timeout: Duration,
    ) -> Result<usize, TransportError> {
        self.handle()
            .write_bulk(endpoint, data, timeout)
            .map_err(map_rusb_error)
    }

    fn bulk_in(
        &self,
        endpoint: u8,
        buf: &mut [u8],
        timeout: Duration,
    ) -> Result<usize, TransportError> {
        self.handle()
            .read_bulk(endpoint, buf, timeout)
            .map_err(map_rusb_error)
    }

    fn interrupt_in(
        &self,
        endpoint: u8,
        buf: &mut [u8],
        timeout: Duration,
    ) -> Result<usize, TransportError> {
        self.handle()
            .read_interrupt(endpoint, buf, timeout)
            .map_err(map_rusb_error)
    }

    fn clear_halt(&self, endpoint: u8) -> Result<(), TransportError> {
        self.handle_mut()
            .clear_halt(endpoint)
            .map_err(map_rusb_error)
    }

    fn reset(&self) -> Result<(), TransportError> {
        self.handle_mut().reset().map_err(map_rusb_error)
    }

    fn set_configuration(&self, value: u8) -> Result<(), TransportError> {
        let mut handle = self.handle_mut();
        for interface in &self.claimed_interfaces {
            if let Err(e) = handle.release_interface(*interface) {
                debug!("Failed to release interface {}: {}", interface, e);
            }
        }
        handle
            .set_active_configuration(value)
            .map_err(map_rusb_error)
    }
}

impl Drop for RusbTransport {
    fn drop(&mut self) {
        let handle = self.handle.get_mut().unwrap_or_else(|e| e.into_inner());
        for interface in &self.claimed_interfaces {
            if let Err(e) = handle.release_interface(*interface) {
                debug!("Failed to release interface {}: {}", interface, e);
            }
            if let Err(e) = handle.attach_kernel_driver(*interface) {
                debug!(
                    "Could not reattach kernel driver to interface {}: {}",
                    interface, e
                );
            }
        }
    }
}
