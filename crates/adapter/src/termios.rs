//! Line settings translation
//!
//! Turns line-discipline settings into the UART configuration record sent
//! with SET_CONFIG. The translation is pure: the modem-control side effects
//! of a hang-up rate are applied by the port session after sending.

use crate::identity::Family;
use protocol::{DataBits, Parity, StopBits, UartConfig, UartFlags, UartMode};
use serde::{Deserialize, Serialize};

/// The "hang up" rate
pub const B0: u32 = 0;

/// Rate used to compute the divisor when the hang-up rate is requested
pub const DEFAULT_BAUD: u32 = 9600;

pub const DEFAULT_XON: u8 = 0x11;
pub const DEFAULT_XOFF: u8 = 0x13;

/// Parity as requested by the line discipline
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LineParity {
    #[default]
    None,
    Odd,
    Even,
}

/// Line discipline settings for one port
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LineSettings {
    pub baud: u32,
    pub data_bits: u8,
    pub parity: LineParity,
    /// Mark/space parity request, never honoured
    pub mark_space: bool,
    pub two_stop_bits: bool,
    /// RTS/CTS hardware flow control
    pub crtscts: bool,
    /// XON/XOFF on output
    pub ixon: bool,
    /// XON/XOFF on input
    pub ixoff: bool,
    pub xon: u8,
    pub xoff: u8,
}

impl Default for LineSettings {
    fn default() -> Self {
        Self {
            baud: DEFAULT_BAUD,
            data_bits: 8,
            parity: LineParity::None,
            mark_space: false,
            two_stop_bits: false,
            crtscts: false,
            ixon: false,
            ixoff: false,
            xon: DEFAULT_XON,
            xoff: DEFAULT_XOFF,
        }
    }
}

impl LineSettings {
    pub fn is_hang_up(&self) -> bool {
        self.baud == B0
    }

    /// The settings with unsupported requests cleared
    pub fn sanitized(&self) -> Self {
        Self {
            mark_space: false,
            ..self.clone()
        }
    }
}

/// Baud divisor for the family's UART clock
///
/// Rounds to nearest. A zero rate uses [`DEFAULT_BAUD`]; rates too low for a
/// 16-bit divisor saturate.
pub fn baud_divisor(family: Family, baud: u32) -> u16 {
    let baud = if baud == B0 { DEFAULT_BAUD } else { baud };
    let divisor = (family.baud_base() + baud / 2) / baud;
    u16::try_from(divisor).unwrap_or(u16::MAX)
}

/// Build the UART configuration record for a port
pub fn translate(settings: &LineSettings, family: Family, uart_mode: UartMode) -> UartConfig {
    let settings = settings.sanitized();
    let mut flags = UartFlags::ENABLE_MS_INTS | UartFlags::ENABLE_AUTO_START_DMA;

    let parity = match settings.parity {
        LineParity::Odd => {
            flags |= UartFlags::ENABLE_PARITY_CHECKING;
            Parity::Odd
        }
        LineParity::Even => {
            flags |= UartFlags::ENABLE_PARITY_CHECKING;
            Parity::Even
        }
        LineParity::None => Parity::None,
    };

    let stop_bits = if settings.two_stop_bits {
        StopBits::Two
    } else {
        StopBits::One
    };

    if settings.crtscts {
        // RTS must stay under host control to drop it for B0
        if !settings.is_hang_up() {
            flags |= UartFlags::ENABLE_RTS_IN;
        }
        flags |= UartFlags::ENABLE_CTS_OUT;
    }

    let (mut xon, mut xoff) = (0, 0);
    if settings.ixon || settings.ixoff {
        xon = settings.xon;
        xoff = settings.xoff;
        if settings.ixoff {
            flags |= UartFlags::ENABLE_X_IN;
        }
        if settings.ixon {
            flags |= UartFlags::ENABLE_X_OUT;
        }
    }

    UartConfig {
        baud_divisor: baud_divisor(family, settings.baud),
        flags,
        data_bits: DataBits::from_count(settings.data_bits),
        parity,
        stop_bits,
        xon,
        xoff,
        uart_mode,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_baud_9600_on_3410() {
        assert_eq!(baud_divisor(Family::Ti3410, 9600), 96);
    }

    #[test]
    fn test_baud_rounding() {
        assert_eq!(baud_divisor(Family::Ti5052, 9600), 48);
        assert_eq!(baud_divisor(Family::Ti3410, 115_200), 8);
        assert_eq!(baud_divisor(Family::Ti5052, 115_200), 4);
        assert_eq!(baud_divisor(Family::Ti3410, 921_600), 1);
    }

    #[test]
    fn test_zero_baud_uses_default() {
        assert_eq!(
            baud_divisor(Family::Ti3410, B0),
            baud_divisor(Family::Ti3410, DEFAULT_BAUD)
        );
    }

    #[test]
    fn test_low_baud_saturates() {
        assert_eq!(baud_divisor(Family::Ti3410, 1), u16::MAX);
    }

    #[test]
    fn test_mandatory_flags_and_mode() {
        let config = translate(
            &LineSettings::default(),
            Family::Ti3410,
            UartMode::Rs485ReceiverDisabled,
        );
        assert!(config.flags.contains(UartFlags::ENABLE_MS_INTS));
        assert!(config.flags.contains(UartFlags::ENABLE_AUTO_START_DMA));
        assert_eq!(config.uart_mode, UartMode::Rs485ReceiverDisabled);
        assert_eq!(config.parity, Parity::None);
        assert_eq!(config.stop_bits, StopBits::One);
        assert_eq!(config.data_bits, DataBits::Eight);
    }

    #[test]
    fn test_data_bits() {
        for (bits, code) in [
            (5, DataBits::Five),
            (6, DataBits::Six),
            (7, DataBits::Seven),
            (8, DataBits::Eight),
            (9, DataBits::Eight),
            (0, DataBits::Eight),
        ] {
            let settings = LineSettings {
                data_bits: bits,
                ..Default::default()
            };
            assert_eq!(
                translate(&settings, Family::Ti3410, UartMode::Rs232).data_bits,
                code
            );
        }
    }

    #[test]
    fn test_parity() {
        let mut settings = LineSettings {
            parity: LineParity::Odd,
            ..Default::default()
        };
        let config = translate(&settings, Family::Ti3410, UartMode::Rs232);
        assert_eq!(config.parity, Parity::Odd);
        assert!(config.flags.contains(UartFlags::ENABLE_PARITY_CHECKING));

        settings.parity = LineParity::Even;
        let config = translate(&settings, Family::Ti3410, UartMode::Rs232);
        assert_eq!(config.parity, Parity::Even);
        assert!(config.flags.contains(UartFlags::ENABLE_PARITY_CHECKING));

        settings.parity = LineParity::None;
        let config = translate(&settings, Family::Ti3410, UartMode::Rs232);
        assert_eq!(config.parity, Parity::None);
        assert!(!config.flags.contains(UartFlags::ENABLE_PARITY_CHECKING));
    }

    #[test]
    fn test_mark_space_ignored() {
        let settings = LineSettings {
            parity: LineParity::Odd,
            mark_space: true,
            ..Default::default()
        };
        let config = translate(&settings, Family::Ti3410, UartMode::Rs232);
        assert_eq!(config.parity, Parity::Odd);
        assert!(!settings.sanitized().mark_space);
    }

    #[test]
    fn test_stop_bits_never_one_and_a_half() {
        for two in [false, true] {
            let settings = LineSettings {
                two_stop_bits: two,
                ..Default::default()
            };
            let stop = translate(&settings, Family::Ti5052, UartMode::Rs232).stop_bits;
            assert_ne!(stop, StopBits::OnePointFive);
            assert_eq!(stop, if two { StopBits::Two } else { StopBits::One });
        }
    }

    #[test]
    fn test_hardware_flow_control() {
        let settings = LineSettings {
            crtscts: true,
            ..Default::default()
        };
        let config = translate(&settings, Family::Ti3410, UartMode::Rs232);
        assert!(config.flags.contains(UartFlags::ENABLE_RTS_IN));
        assert!(config.flags.contains(UartFlags::ENABLE_CTS_OUT));
    }

    #[test]
    fn test_hang_up_omits_rts_in() {
        let settings = LineSettings {
            crtscts: true,
            baud: B0,
            ..Default::default()
        };
        let config = translate(&settings, Family::Ti3410, UartMode::Rs232);
        assert!(!config.flags.contains(UartFlags::ENABLE_RTS_IN));
        assert!(config.flags.contains(UartFlags::ENABLE_CTS_OUT));
        assert_eq!(config.baud_divisor, 96);
    }

    #[test]
    fn test_software_flow_control() {
        let settings = LineSettings {
            ixoff: true,
            xon: 0x01,
            xoff: 0x02,
            ..Default::default()
        };
        let config = translate(&settings, Family::Ti3410, UartMode::Rs232);
        assert!(config.flags.contains(UartFlags::ENABLE_X_IN));
        assert!(!config.flags.contains(UartFlags::ENABLE_X_OUT));
        assert_eq!((config.xon, config.xoff), (0x01, 0x02));

        let settings = LineSettings {
            ixon: true,
            ..Default::default()
        };
        let config = translate(&settings, Family::Ti3410, UartMode::Rs232);
        assert!(!config.flags.contains(UartFlags::ENABLE_X_IN));
        assert!(config.flags.contains(UartFlags::ENABLE_X_OUT));
        assert_eq!((config.xon, config.xoff), (DEFAULT_XON, DEFAULT_XOFF));
    }

    #[test]
    fn test_no_software_flow_control_zeroes_chars() {
        let config = translate(&LineSettings::default(), Family::Ti3410, UartMode::Rs232);
        assert_eq!((config.xon, config.xoff), (0, 0));
        assert!(!config.flags.intersects(UartFlags::ENABLE_X_IN | UartFlags::ENABLE_X_OUT));
    }
}
