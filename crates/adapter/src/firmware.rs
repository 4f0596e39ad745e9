//! Firmware acquisition and download
//!
//! A boot-loader adapter gets its application firmware streamed over the
//! first bulk-out endpoint. The image is looked up by name through a
//! [`FirmwareSource`], trying an identity-specific name first and then a
//! vendor, model or family fallback.

use crate::identity::{
    DeviceIdentity, MOXA_VENDOR_ID, MTS_CDMA_PRODUCT_ID, MTS_EDGE_PRODUCT_ID, MTS_GSM_PRODUCT_ID,
    MTS_MT9234MU_PRODUCT_ID, MTS_MT9234ZBA_PRODUCT_ID, MTS_MT9234ZBAOLD_PRODUCT_ID, MTS_VENDOR_ID,
};
use common::{Error, Result, TransportError, UsbTransport};
use protocol::{DOWNLOAD_CHUNK_SIZE, build_download_buffer};
use std::collections::HashMap;
use std::fs;
use std::io;
use std::path::PathBuf;
use std::time::Duration;
use tracing::{debug, info, warn};

/// Timeout of each firmware chunk
pub const DOWNLOAD_TIMEOUT: Duration = Duration::from_secs(1);

/// Firmware images keyed by name
pub trait FirmwareSource: Send + Sync {
    /// Fetch an image, `Ok(None)` when the name is unknown
    fn load(&self, name: &str) -> io::Result<Option<Vec<u8>>>;
}

/// Images looked up in a list of directories, first hit wins
#[derive(Debug, Clone)]
pub struct DirectoryFirmware {
    search_paths: Vec<PathBuf>,
}

impl DirectoryFirmware {
    pub fn new(search_paths: Vec<PathBuf>) -> Self {
        Self { search_paths }
    }

    pub fn search_paths(&self) -> &[PathBuf] {
        &self.search_paths
    }
}

impl FirmwareSource for DirectoryFirmware {
    fn load(&self, name: &str) -> io::Result<Option<Vec<u8>>> {
        for dir in &self.search_paths {
            let path = dir.join(name);
            match fs::read(&path) {
                Ok(image) => {
                    debug!("Loaded firmware {} ({} bytes)", path.display(), image.len());
                    return Ok(Some(image));
                }
                Err(e) if e.kind() == io::ErrorKind::NotFound => continue,
                Err(e) => return Err(e),
            }
        }
        Ok(None)
    }
}

/// In-memory images
#[derive(Debug, Clone, Default)]
pub struct MemoryFirmware {
    images: HashMap<String, Vec<u8>>,
}

impl MemoryFirmware {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_image(mut self, name: impl Into<String>, image: Vec<u8>) -> Self {
        self.images.insert(name.into(), image);
        self
    }
}

impl FirmwareSource for MemoryFirmware {
    fn load(&self, name: &str) -> io::Result<Option<Vec<u8>>> {
        Ok(self.images.get(name).cloned())
    }
}

/// Image names to try for an adapter, in order
///
/// The identity-specific name always comes first. The fallback is a
/// Multi-Tech model name, a Moxa model name, or the generic family image.
pub fn candidate_names(identity: &DeviceIdentity) -> Vec<String> {
    let specific = format!(
        "ti_usb-v{:04x}-p{:04x}.fw",
        identity.vendor_id, identity.product_id
    );

    let fallback = match identity.vendor_id {
        MTS_VENDOR_ID => mts_firmware(identity.product_id).map(str::to_string),
        MOXA_VENDOR_ID => Some(format!("moxa/moxa-{:04x}.fw", identity.product_id)),
        _ => None,
    }
    .unwrap_or_else(|| identity.family.generic_firmware().to_string());

    vec![specific, fallback]
}

fn mts_firmware(product_id: u16) -> Option<&'static str> {
    match product_id {
        MTS_CDMA_PRODUCT_ID => Some("mts_cdma.fw"),
        MTS_GSM_PRODUCT_ID => Some("mts_gsm.fw"),
        MTS_EDGE_PRODUCT_ID => Some("mts_edge.fw"),
        MTS_MT9234MU_PRODUCT_ID => Some("mts_mt9234mu.fw"),
        MTS_MT9234ZBA_PRODUCT_ID | MTS_MT9234ZBAOLD_PRODUCT_ID => Some("mts_mt9234zba.fw"),
        _ => None,
    }
}

/// Resolve the firmware image for an adapter
///
/// Returns the name that matched together with the image.
pub fn acquire(identity: &DeviceIdentity, source: &dyn FirmwareSource) -> Result<(String, Vec<u8>)> {
    let candidates = candidate_names(identity);

    for name in &candidates {
        match source.load(name) {
            Ok(Some(image)) => return Ok((name.clone(), image)),
            Ok(None) => debug!("Firmware {} not available", name),
            Err(e) => warn!("Failed to read firmware {}: {}", name, e),
        }
    }

    warn!("Firmware not found for {}", identity);
    Err(Error::FirmwareNotFound { candidates })
}

/// Resolve, frame and stream the firmware to a boot-loader adapter
pub fn download_firmware(
    transport: &dyn UsbTransport,
    identity: &DeviceIdentity,
    source: &dyn FirmwareSource,
) -> Result<()> {
    let (name, image) = acquire(identity, source)?;
    let buffer = build_download_buffer(&image).inspect_err(|e| warn!("Firmware {}: {}", name, e))?;

    let endpoint = transport
        .layout()
        .bulk_out
        .first()
        .copied()
        .ok_or(Error::Transport(TransportError::NotFound))?;

    info!(
        "Downloading firmware {} ({} bytes) to {}",
        name,
        image.len(),
        identity
    );
    stream(transport, endpoint, &buffer)
        .inspect_err(|e| warn!("Error downloading firmware: {}", e))?;

    debug!("Firmware download successful");
    Ok(())
}

/// Send a buffer in chunks, stopping at the first failed chunk
fn stream(transport: &dyn UsbTransport, endpoint: u8, buffer: &[u8]) -> Result<()> {
    for chunk in buffer.chunks(DOWNLOAD_CHUNK_SIZE) {
        let sent = transport.bulk_out(endpoint, chunk, DOWNLOAD_TIMEOUT)?;
        if sent != chunk.len() {
            return Err(Error::ShortTransfer {
                expected: chunk.len(),
                actual: sent,
            });
        }
    }
    Ok(())
}
