//! Adapter discovery
//!
//! Enumerates the USB bus for supported adapters and opens them. Only
//! devices that pass the configured VID:PID filters and are known to the
//! identity table are reported.

use crate::device::FirmwareState;
use crate::identity::{DeviceIdentity, IdentityTable, parse_hex_id};
use crate::usb::transport::{RusbTransport, read_layout};
use rusb::{Context, Device, UsbContext};
use serde::Serialize;
use tracing::{debug, info};

/// A supported adapter found on the bus
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AdapterInfo {
    pub bus: u8,
    pub address: u8,
    pub identity: DeviceIdentity,
    pub firmware_state: FirmwareState,
}

/// Bus scanner for supported adapters
pub struct AdapterScanner {
    context: Context,
    identities: IdentityTable,
    filters: Vec<String>,
}

impl AdapterScanner {
    pub fn new(identities: IdentityTable, filters: Vec<String>) -> Result<Self, rusb::Error> {
        Ok(Self {
            context: Context::new()?,
            identities,
            filters,
        })
    }

    pub fn identities(&self) -> &IdentityTable {
        &self.identities
    }

    /// List every supported adapter currently connected
    pub fn scan(&self) -> Result<Vec<AdapterInfo>, rusb::Error> {
        let mut found = Vec::new();

        for device in self.context.devices()?.iter() {
            let Ok(descriptor) = device.device_descriptor() else {
                continue;
            };
            let (vendor_id, product_id) = (descriptor.vendor_id(), descriptor.product_id());

            if !check_filter(vendor_id, product_id, &self.filters) {
                debug!(
                    "Device ignored by filter: bus={}, addr={}, vid={:#x}, pid={:#x}",
                    device.bus_number(),
                    device.address(),
                    vendor_id,
                    product_id
                );
                continue;
            }

            let Some(identity) = self.identities.lookup(vendor_id, product_id) else {
                continue;
            };

            let firmware_state = match read_layout(&device) {
                Ok(layout) => FirmwareState::from_layout(&layout),
                Err(e) => {
                    debug!("Cannot read layout of {}: {}", identity, e);
                    continue;
                }
            };

            found.push(AdapterInfo {
                bus: device.bus_number(),
                address: device.address(),
                identity,
                firmware_state,
            });
        }

        debug!("Found {} supported adapter(s)", found.len());
        Ok(found)
    }

    /// Open a previously scanned adapter
    pub fn open(&self, info: &AdapterInfo) -> Result<RusbTransport, rusb::Error> {
        let device = self.find(info.bus, info.address)?;
        info!(
            "Opening {} at bus {} address {}",
            info.identity, info.bus, info.address
        );
        RusbTransport::open(&device)
    }

    fn find(&self, bus: u8, address: u8) -> Result<Device<Context>, rusb::Error> {
        self.context
            .devices()?
            .iter()
            .find(|d| d.bus_number() == bus && d.address() == address)
            .ok_or(rusb::Error::NoDevice)
    }
}

/// Check if a VID/PID pair is allowed by the filters
///
/// Filters have the form `0xVID:0xPID`, either side may be `*`. No filters
/// allows everything.
pub fn check_filter(vid: u16, pid: u16, filters: &[String]) -> bool {
    if filters.is_empty() {
        return true;
    }

    filters.iter().any(|filter| {
        let Some((filter_vid, filter_pid)) = filter.split_once(':') else {
            return false;
        };
        matches_id(filter_vid, vid) && matches_id(filter_pid, pid)
    })
}

fn matches_id(pattern: &str, id: u16) -> bool {
    pattern == "*" || parse_hex_id(pattern) == Some(id)
}
