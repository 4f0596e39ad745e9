//! Adapter identities
//!
//! Maps USB vendor/product ids onto the two hardware families this crate
//! drives. The family decides the port count, the baud-rate clock and the
//! generic firmware image; a few products also select a non-default UART
//! line mode.

use common::{Error, Result};
use protocol::UartMode;
use serde::Serialize;
use std::fmt;

pub const TI_VENDOR_ID: u16 = 0x0451;
pub const IBM_VENDOR_ID: u16 = 0x04b3;
pub const MTS_VENDOR_ID: u16 = 0x06e0;
pub const HONEYWELL_VENDOR_ID: u16 = 0x10ac;
pub const MOXA_VENDOR_ID: u16 = 0x110a;
pub const ABBOTT_VENDOR_ID: u16 = 0x1a61;

pub const TI_3410_PRODUCT_ID: u16 = 0x3410;
pub const TI_3410_EZ430_ID: u16 = 0xf430;
pub const FRI2_PRODUCT_ID: u16 = 0x5053;
pub const TI_5052_BOOT_PRODUCT_ID: u16 = 0x5052;
pub const TI_5152_BOOT_PRODUCT_ID: u16 = 0x5152;
pub const TI_5052_EEPROM_PRODUCT_ID: u16 = 0x505a;
pub const TI_5052_FIRMWARE_PRODUCT_ID: u16 = 0x505f;

pub const MTS_GSM_NO_FW_PRODUCT_ID: u16 = 0xf108;
pub const MTS_CDMA_NO_FW_PRODUCT_ID: u16 = 0xf109;
pub const MTS_CDMA_PRODUCT_ID: u16 = 0xf110;
pub const MTS_GSM_PRODUCT_ID: u16 = 0xf111;
pub const MTS_EDGE_PRODUCT_ID: u16 = 0xf112;
pub const MTS_MT9234MU_PRODUCT_ID: u16 = 0xf114;
pub const MTS_MT9234ZBA_PRODUCT_ID: u16 = 0xf115;
pub const MTS_MT9234ZBAOLD_PRODUCT_ID: u16 = 0x0319;

pub const IBM_4543_PRODUCT_ID: u16 = 0x4543;
pub const IBM_454B_PRODUCT_ID: u16 = 0x454b;
pub const IBM_454C_PRODUCT_ID: u16 = 0x454c;

pub const ABBOTT_PRODUCT_ID: u16 = 0x3410;
pub const ABBOTT_STRIP_PORT_ID: u16 = 0x3420;

pub const HONEYWELL_HGI80_PRODUCT_ID: u16 = 0x0102;

pub const MXU1_1110_PRODUCT_ID: u16 = 0x1110;
pub const MXU1_1130_PRODUCT_ID: u16 = 0x1130;
pub const MXU1_1131_PRODUCT_ID: u16 = 0x1131;
pub const MXU1_1150_PRODUCT_ID: u16 = 0x1150;
pub const MXU1_1151_PRODUCT_ID: u16 = 0x1151;

/// Additional identities accepted per family from configuration
pub const MAX_EXTRA_IDS: usize = 5;

const TI_3410_IDS: &[(u16, u16)] = &[
    (TI_VENDOR_ID, TI_3410_PRODUCT_ID),
    (TI_VENDOR_ID, TI_3410_EZ430_ID),
    (MTS_VENDOR_ID, MTS_GSM_NO_FW_PRODUCT_ID),
    (MTS_VENDOR_ID, MTS_CDMA_NO_FW_PRODUCT_ID),
    (MTS_VENDOR_ID, MTS_CDMA_PRODUCT_ID),
    (MTS_VENDOR_ID, MTS_GSM_PRODUCT_ID),
    (MTS_VENDOR_ID, MTS_EDGE_PRODUCT_ID),
    (MTS_VENDOR_ID, MTS_MT9234MU_PRODUCT_ID),
    (MTS_VENDOR_ID, MTS_MT9234ZBA_PRODUCT_ID),
    (MTS_VENDOR_ID, MTS_MT9234ZBAOLD_PRODUCT_ID),
    (IBM_VENDOR_ID, IBM_4543_PRODUCT_ID),
    (IBM_VENDOR_ID, IBM_454B_PRODUCT_ID),
    (IBM_VENDOR_ID, IBM_454C_PRODUCT_ID),
    (ABBOTT_VENDOR_ID, ABBOTT_PRODUCT_ID),
    (ABBOTT_VENDOR_ID, ABBOTT_STRIP_PORT_ID),
    (TI_VENDOR_ID, FRI2_PRODUCT_ID),
    (HONEYWELL_VENDOR_ID, HONEYWELL_HGI80_PRODUCT_ID),
    (MOXA_VENDOR_ID, MXU1_1110_PRODUCT_ID),
    (MOXA_VENDOR_ID, MXU1_1130_PRODUCT_ID),
    (MOXA_VENDOR_ID, MXU1_1150_PRODUCT_ID),
    (MOXA_VENDOR_ID, MXU1_1151_PRODUCT_ID),
    (MOXA_VENDOR_ID, MXU1_1131_PRODUCT_ID),
];

const TI_5052_IDS: &[(u16, u16)] = &[
    (TI_VENDOR_ID, TI_5052_BOOT_PRODUCT_ID),
    (TI_VENDOR_ID, TI_5152_BOOT_PRODUCT_ID),
    (TI_VENDOR_ID, TI_5052_EEPROM_PRODUCT_ID),
    (TI_VENDOR_ID, TI_5052_FIRMWARE_PRODUCT_ID),
];

/// Hardware family
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum Family {
    /// Single-port TUSB3410 and its rebadged variants
    Ti3410,
    /// Dual-port TUSB5052
    Ti5052,
}

impl Family {
    /// UART clock divided by 16, the numerator of the baud divisor
    pub fn baud_base(self) -> u32 {
        match self {
            Self::Ti3410 => 923_077,
            Self::Ti5052 => 461_538,
        }
    }

    pub fn port_count(self) -> u8 {
        match self {
            Self::Ti3410 => 1,
            Self::Ti5052 => 2,
        }
    }

    /// Whether the device needs a port reset after a firmware download
    pub fn needs_reset_after_download(self) -> bool {
        matches!(self, Self::Ti3410)
    }

    /// Generic firmware image for the family
    pub fn generic_firmware(self) -> &'static str {
        match self {
            Self::Ti3410 => "ti_3410.fw",
            Self::Ti5052 => "ti_5052.fw",
        }
    }
}

impl fmt::Display for Family {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Ti3410 => write!(f, "3410"),
            Self::Ti5052 => write!(f, "5052"),
        }
    }
}

/// A recognised adapter
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct DeviceIdentity {
    pub vendor_id: u16,
    pub product_id: u16,
    pub family: Family,
}

impl DeviceIdentity {
    pub fn new(vendor_id: u16, product_id: u16, family: Family) -> Self {
        Self {
            vendor_id,
            product_id,
            family,
        }
    }

    /// Model code, the product id as reported at attach time
    pub fn model(&self) -> u16 {
        self.product_id
    }

    pub fn num_ports(&self) -> u8 {
        self.family.port_count()
    }

    /// Electrical mode every port of this model starts in
    pub fn uart_mode(&self) -> UartMode {
        match (self.vendor_id, self.product_id) {
            (MOXA_VENDOR_ID, MXU1_1130_PRODUCT_ID | MXU1_1131_PRODUCT_ID) => {
                UartMode::Rs485ReceiverDisabled
            }
            _ => UartMode::Rs232,
        }
    }
}

impl fmt::Display for DeviceIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{:04x}:{:04x} ({})",
            self.vendor_id, self.product_id, self.family
        )
    }
}

/// Identity lookup over the built-in tables plus configured extras
#[derive(Debug, Clone, Default)]
pub struct IdentityTable {
    extra_3410: Vec<(u16, u16)>,
    extra_5052: Vec<(u16, u16)>,
}

impl IdentityTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Accept additional identities for each family
    pub fn with_extra_ids(extra_3410: &[(u16, u16)], extra_5052: &[(u16, u16)]) -> Result<Self> {
        for (family, ids) in [(Family::Ti3410, extra_3410), (Family::Ti5052, extra_5052)] {
            if ids.len() > MAX_EXTRA_IDS {
                return Err(Error::Config(format!(
                    "Too many extra {} identities: {} (max: {})",
                    family,
                    ids.len(),
                    MAX_EXTRA_IDS
                )));
            }
        }

        Ok(Self {
            extra_3410: extra_3410.to_vec(),
            extra_5052: extra_5052.to_vec(),
        })
    }

    pub fn lookup(&self, vendor_id: u16, product_id: u16) -> Option<DeviceIdentity> {
        let key = (vendor_id, product_id);
        let family = if TI_3410_IDS.contains(&key) || self.extra_3410.contains(&key) {
            Family::Ti3410
        } else if TI_5052_IDS.contains(&key) || self.extra_5052.contains(&key) {
            Family::Ti5052
        } else {
            return None;
        };

        Some(DeviceIdentity::new(vendor_id, product_id, family))
    }

    /// Like [`lookup`](Self::lookup), failing with `UnsupportedDevice`
    pub fn require(&self, vendor_id: u16, product_id: u16) -> Result<DeviceIdentity> {
        self.lookup(vendor_id, product_id)
            .ok_or(Error::UnsupportedDevice {
                vendor_id,
                product_id,
            })
    }
}

/// Parse a `0xVVVV:0xPPPP` identity
pub fn parse_id_pair(text: &str) -> Option<(u16, u16)> {
    let (vid, pid) = text.split_once(':')?;
    Some((parse_hex_id(vid)?, parse_hex_id(pid)?))
}

/// Parse a single `0xNNNN` id of one to four hex digits
pub fn parse_hex_id(text: &str) -> Option<u16> {
    let hex = text
        .trim()
        .strip_prefix("0x")
        .or_else(|| text.trim().strip_prefix("0X"))?;
    if hex.is_empty() || hex.len() > 4 {
        return None;
    }
    u16::from_str_radix(hex, 16).ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_builtin_families() {
        let table = IdentityTable::new();

        let ti = table.lookup(TI_VENDOR_ID, TI_3410_PRODUCT_ID).unwrap();
        assert_eq!(ti.family, Family::Ti3410);
        assert_eq!(ti.num_ports(), 1);

        let dual = table.lookup(TI_VENDOR_ID, TI_5052_FIRMWARE_PRODUCT_ID).unwrap();
        assert_eq!(dual.family, Family::Ti5052);
        assert_eq!(dual.num_ports(), 2);

        let mts = table.lookup(MTS_VENDOR_ID, MTS_MT9234ZBAOLD_PRODUCT_ID).unwrap();
        assert_eq!(mts.family, Family::Ti3410);

        assert!(table.lookup(0x1234, 0x5678).is_none());
    }

    #[test]
    fn test_same_product_different_vendor() {
        let table = IdentityTable::new();
        assert!(table.lookup(ABBOTT_VENDOR_ID, 0x3410).is_some());
        assert!(table.lookup(IBM_VENDOR_ID, 0x3410).is_none());
    }

    #[test]
    fn test_moxa_rs485_models() {
        let table = IdentityTable::new();
        for pid in [MXU1_1130_PRODUCT_ID, MXU1_1131_PRODUCT_ID] {
            let identity = table.lookup(MOXA_VENDOR_ID, pid).unwrap();
            assert_eq!(identity.uart_mode(), UartMode::Rs485ReceiverDisabled);
        }
        for pid in [MXU1_1110_PRODUCT_ID, MXU1_1150_PRODUCT_ID, MXU1_1151_PRODUCT_ID] {
            let identity = table.lookup(MOXA_VENDOR_ID, pid).unwrap();
            assert_eq!(identity.uart_mode(), UartMode::Rs232);
        }
    }

    #[test]
    fn test_extra_ids() {
        let table = IdentityTable::with_extra_ids(&[(0x1234, 0x0001)], &[(0x1234, 0x0002)]).unwrap();
        assert_eq!(table.lookup(0x1234, 0x0001).unwrap().family, Family::Ti3410);
        assert_eq!(table.lookup(0x1234, 0x0002).unwrap().family, Family::Ti5052);

        let too_many = vec![(0x1234, 0x0001); MAX_EXTRA_IDS + 1];
        assert!(IdentityTable::with_extra_ids(&too_many, &[]).is_err());
    }

    #[test]
    fn test_require_unsupported() {
        let err = IdentityTable::new().require(0xdead, 0xbeef).unwrap_err();
        assert!(matches!(
            err,
            Error::UnsupportedDevice {
                vendor_id: 0xdead,
                product_id: 0xbeef
            }
        ));
    }

    #[test]
    fn test_parse_id_pair() {
        assert_eq!(parse_id_pair("0x0451:0x3410"), Some((0x0451, 0x3410)));
        assert_eq!(parse_id_pair("0X110A:0x1131"), Some((0x110a, 0x1131)));
        assert_eq!(parse_id_pair("0451:3410"), None);
        assert_eq!(parse_id_pair("0x0451"), None);
        assert_eq!(parse_id_pair("0x12345:0x0001"), None);
    }

    #[test]
    fn test_parse_hex_id() {
        assert_eq!(parse_hex_id("0x0451"), Some(0x0451));
        assert_eq!(parse_hex_id("0Xf"), Some(0x000f));
        assert_eq!(parse_hex_id("0x"), None);
        assert_eq!(parse_hex_id("0xGHIJ"), None);
        assert_eq!(parse_hex_id("3410"), None);
    }

    #[test]
    fn test_family_constants() {
        assert_eq!(Family::Ti3410.baud_base(), 923_077);
        assert_eq!(Family::Ti5052.baud_base(), 461_538);
        assert!(Family::Ti3410.needs_reset_after_download());
        assert!(!Family::Ti5052.needs_reset_after_download());
    }
}
