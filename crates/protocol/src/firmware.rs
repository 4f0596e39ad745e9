//! Firmware download container
//!
//! The boot loader expects one fixed-size buffer on its bulk-out endpoint:
//!
//! ```text
//! [length: u16 (little-endian)][checksum: u8][image][0xFF padding]
//! ```
//!
//! `length` is the size of the image alone. `checksum` is the 8-bit wrapping
//! sum of every byte after the header, padding included. The padding fills
//! the buffer up to [`MAX_FIRMWARE_SIZE`] bytes of payload with the flash
//! erase value.

use crate::error::{ProtocolError, Result};
use byteorder::{ByteOrder, LittleEndian};

/// Largest image the device download buffer accepts
pub const MAX_FIRMWARE_SIZE: usize = 16284;

/// Total size of the download buffer: header plus maximum payload
pub const DOWNLOAD_BUFFER_SIZE: usize = FirmwareHeader::SIZE + MAX_FIRMWARE_SIZE;

/// Largest bulk packet used while downloading
pub const DOWNLOAD_CHUNK_SIZE: usize = 64;

/// Flash erase value used to pad the image
pub const FIRMWARE_FILL_BYTE: u8 = 0xFF;

/// Header prefixed to the downloaded image
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FirmwareHeader {
    /// Image size in bytes, padding excluded
    pub length: u16,
    pub checksum: u8,
}

impl FirmwareHeader {
    /// Encoded size in bytes
    pub const SIZE: usize = 3;

    /// Encode into the wire layout
    pub fn encode(&self) -> [u8; Self::SIZE] {
        let mut buf = [0u8; Self::SIZE];
        LittleEndian::write_u16(&mut buf[0..2], self.length);
        buf[2] = self.checksum;
        buf
    }

    /// Decode from the start of a download buffer
    pub fn decode(bytes: &[u8]) -> Result<Self> {
        if bytes.len() < Self::SIZE {
            return Err(ProtocolError::MalformedResponse {
                record: "firmware header",
                expected: Self::SIZE,
                actual: bytes.len(),
            });
        }

        Ok(Self {
            length: LittleEndian::read_u16(&bytes[0..2]),
            checksum: bytes[2],
        })
    }
}

/// 8-bit wrapping sum of every byte following the header
pub fn download_checksum(buffer: &[u8]) -> u8 {
    buffer
        .iter()
        .skip(FirmwareHeader::SIZE)
        .fold(0u8, |sum, byte| sum.wrapping_add(*byte))
}

/// Build the complete download buffer for an image
///
/// The result is always [`DOWNLOAD_BUFFER_SIZE`] bytes long.
pub fn build_download_buffer(image: &[u8]) -> Result<Vec<u8>> {
    if image.len() > MAX_FIRMWARE_SIZE {
        return Err(ProtocolError::FirmwareTooLarge {
            size: image.len(),
            max: MAX_FIRMWARE_SIZE,
        });
    }

    let mut buffer = vec![FIRMWARE_FILL_BYTE; DOWNLOAD_BUFFER_SIZE];
    let payload_end = FirmwareHeader::SIZE + image.len();
    buffer[FirmwareHeader::SIZE..payload_end].copy_from_slice(image);

    let header = FirmwareHeader {
        // Bounded by MAX_FIRMWARE_SIZE above
        length: image.len() as u16,
        checksum: download_checksum(&buffer),
    };
    buffer[..FirmwareHeader::SIZE].copy_from_slice(&header.encode());

    Ok(buffer)
}
