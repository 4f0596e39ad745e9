//! UART register bits and addresses
//!
//! The modem-status and line-status bytes arrive in status records and
//! interrupt events. The modem-control and line-control registers are
//! write-only from the host and are modified through masked memory writes.

use bitflags::bitflags;

/// XDATA base address of the UART1 register window
pub const UART1_BASE_ADDR: u32 = 0xFFA0;

/// XDATA base address of the UART2 register window
pub const UART2_BASE_ADDR: u32 = 0xFFB0;

/// Offset of the line control register within a UART window
pub const UART_OFFSET_LCR: u32 = 0x0002;

/// Offset of the modem control register within a UART window
pub const UART_OFFSET_MCR: u32 = 0x0004;

/// Register window for a port ordinal
///
/// The first port uses the UART1 window; every other port uses UART2.
pub fn uart_base_addr(port: u8) -> u32 {
    if port == 0 {
        UART1_BASE_ADDR
    } else {
        UART2_BASE_ADDR
    }
}

bitflags! {
    /// Modem status register (MSR)
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct ModemStatus: u8 {
        const DELTA_CTS = 0x01;
        const DELTA_DSR = 0x02;
        const DELTA_RI = 0x04;
        const DELTA_CD = 0x08;
        const CTS = 0x10;
        const DSR = 0x20;
        const RI = 0x40;
        const CD = 0x80;
    }
}

impl ModemStatus {
    /// Change-indicator bits
    pub const DELTA_MASK: Self = Self::DELTA_CTS
        .union(Self::DELTA_DSR)
        .union(Self::DELTA_RI)
        .union(Self::DELTA_CD);

    /// Steady-state line bits kept in the cached status
    pub const STEADY_MASK: Self = Self::CTS.union(Self::DSR).union(Self::RI).union(Self::CD);

    /// Only the steady-state line bits
    pub fn steady(self) -> Self {
        self & Self::STEADY_MASK
    }

    /// Only the change-indicator bits
    pub fn deltas(self) -> Self {
        self & Self::DELTA_MASK
    }
}

bitflags! {
    /// Line status register (LSR)
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct LineStatus: u8 {
        const OVERRUN_ERROR = 0x01;
        const PARITY_ERROR = 0x02;
        const FRAMING_ERROR = 0x04;
        const BREAK = 0x08;
        const RX_FULL = 0x10;
        const TX_EMPTY = 0x20;
    }
}

impl LineStatus {
    /// Receive error bits
    pub const ERROR_MASK: Self = Self::OVERRUN_ERROR
        .union(Self::PARITY_ERROR)
        .union(Self::FRAMING_ERROR)
        .union(Self::BREAK);
}

bitflags! {
    /// Modem control register (MCR)
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct ModemControl: u8 {
        const LOOP = 0x04;
        const DTR = 0x10;
        const RTS = 0x20;
    }
}

bitflags! {
    /// Line control register (LCR), only the bits this host touches
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct LineControl: u8 {
        const BREAK = 0x40;
    }
}
