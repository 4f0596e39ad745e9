//! Memory write record sent with `WRITE_DATA`
//!
//! ```text
//! offset  size  field
//! 0       1     address space
//! 1       1     data type
//! 2       1     data count
//! 3       2     address bits 31..16 (big-endian)
//! 5       2     address bits 15..0 (big-endian)
//! 7       n     payload
//! ```
//!
//! For masked byte writes the payload is a mask byte followed by a value byte;
//! the firmware only changes the register bits selected by the mask.

use byteorder::{BigEndian, ByteOrder};

/// Address space of a memory access
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum AddressSpace {
    Sfr = 0x10,
    Idata = 0x20,
    Xdata = 0x30,
    Code = 0x40,
    Gpio = 0x50,
    I2c = 0x60,
    Flash = 0x70,
    Dsp = 0x80,
}

/// Width of each data item
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum DataType {
    Unspecified = 0x00,
    Byte = 0x01,
    Word = 0x02,
    DoubleWord = 0x04,
}

/// Memory write record
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MemoryWrite {
    pub address_space: AddressSpace,
    pub data_type: DataType,
    pub count: u8,
    pub address: u32,
    pub payload: Vec<u8>,
}

impl MemoryWrite {
    /// Size of the fixed part preceding the payload
    pub const HEADER_SIZE: usize = 7;

    /// Masked write of a single XDATA byte
    pub fn masked_byte(address: u32, mask: u8, value: u8) -> Self {
        Self {
            address_space: AddressSpace::Xdata,
            data_type: DataType::Byte,
            count: 1,
            address,
            payload: vec![mask, value],
        }
    }

    /// Encode into the wire layout
    pub fn encode(&self) -> Vec<u8> {
        let mut buf = vec![0u8; Self::HEADER_SIZE + self.payload.len()];
        buf[0] = self.address_space as u8;
        buf[1] = self.data_type as u8;
        buf[2] = self.count;
        BigEndian::write_u16(&mut buf[3..5], (self.address >> 16) as u16);
        BigEndian::write_u16(&mut buf[5..7], self.address as u16);
        buf[Self::HEADER_SIZE..].copy_from_slice(&self.payload);
        buf
    }
}
