//! Port sessions
//!
//! A [`PortSession`] drives one UART of an adapter through its
//! `Closed -> Opening -> Open -> Closing -> Closed` lifecycle and carries the
//! per-port operations the line discipline needs: line settings, modem
//! control, break, status queries and modem-status waits.
//!
//! The cached modem status, the modem-control shadow, the change counters,
//! the pending transmit bytes and the lifecycle phase live together in
//! [`PortState`] behind one short-held lock shared with the interrupt
//! dispatcher.

use crate::device::DeviceSession;
use crate::identity::Family;
use crate::termios::{LineSettings, translate};
use common::{CancelToken, Error, Result};
use protocol::registers::{UART_OFFSET_LCR, UART_OFFSET_MCR, uart_base_addr};
use protocol::{
    Command, LineControl, LineStatus, ModemControl, ModemStatus, OPEN_PORT_SETTINGS, PortStatus,
    PurgeMode, UartMode, port_module,
};
use serde::Serialize;
use std::collections::VecDeque;
use std::sync::{Arc, Condvar, Mutex, MutexGuard, Weak};
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

/// Closing wait applied when none is configured
pub const DEFAULT_CLOSING_WAIT: Duration = Duration::from_secs(40);

/// Host-side transmit buffer per port
pub const TX_BUFFER_SIZE: usize = 1024;

/// Largest bulk-out transfer
pub const BULK_PACKET_SIZE: usize = 64;

const BULK_TIMEOUT: Duration = Duration::from_secs(5);

/// Longest single sleep of a modem-status waiter between cancellation checks
const WAIT_SLICE: Duration = Duration::from_millis(20);

const MCR_WRITE_MASK: ModemControl = ModemControl::RTS
    .union(ModemControl::DTR)
    .union(ModemControl::LOOP);

/// Lifecycle phase of a port
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum PortPhase {
    Closed,
    Opening,
    Open,
    Closing,
}

/// Modem line change counters
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct ModemCounters {
    pub cts: u32,
    pub dsr: u32,
    pub ri: u32,
    pub cd: u32,
    /// Bytes handed to the bulk-out endpoint
    pub tx: u64,
}

impl ModemCounters {
    /// Whether any line selected by `mask` changed between two snapshots
    pub fn changed_since(&self, earlier: &Self, mask: ModemStatus) -> bool {
        (mask.contains(ModemStatus::CTS) && self.cts != earlier.cts)
            || (mask.contains(ModemStatus::DSR) && self.dsr != earlier.dsr)
            || (mask.contains(ModemStatus::RI) && self.ri != earlier.ri)
            || (mask.contains(ModemStatus::CD) && self.cd != earlier.cd)
    }
}

/// Modem lines as seen by the line discipline
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct ModemLines {
    pub dtr: bool,
    pub rts: bool,
    pub loopback: bool,
    pub cts: bool,
    pub dsr: bool,
    pub ri: bool,
    pub cd: bool,
}

impl ModemLines {
    fn from_registers(mcr: ModemControl, msr: ModemStatus) -> Self {
        Self {
            dtr: mcr.contains(ModemControl::DTR),
            rts: mcr.contains(ModemControl::RTS),
            loopback: mcr.contains(ModemControl::LOOP),
            cts: msr.contains(ModemStatus::CTS),
            dsr: msr.contains(ModemStatus::DSR),
            ri: msr.contains(ModemStatus::RI),
            cd: msr.contains(ModemStatus::CD),
        }
    }
}

/// Serial port description
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SerialInfo {
    pub port: u8,
    pub uart_type: &'static str,
    pub baud_base: u32,
    pub xmit_fifo_size: usize,
    /// `None` disables waiting for pending output on close
    pub closing_wait_ms: Option<u64>,
}

#[derive(Debug)]
struct PortLines {
    phase: PortPhase,
    msr: ModemStatus,
    shadow_mcr: ModemControl,
    counters: ModemCounters,
    tx_pending: VecDeque<u8>,
}

/// State shared between a port session and the interrupt dispatcher
#[derive(Debug)]
pub(crate) struct PortState {
    port: u8,
    lines: Mutex<PortLines>,
    modem_changed: Condvar,
}

impl PortState {
    pub(crate) fn new(port: u8) -> Self {
        Self {
            port,
            lines: Mutex::new(PortLines {
                phase: PortPhase::Closed,
                msr: ModemStatus::empty(),
                shadow_mcr: ModemControl::empty(),
                counters: ModemCounters::default(),
                tx_pending: VecDeque::new(),
            }),
            modem_changed: Condvar::new(),
        }
    }

    pub(crate) fn port(&self) -> u8 {
        self.port
    }

    fn lines(&self) -> MutexGuard<'_, PortLines> {
        self.lines.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Record a modem status byte delivered by the device
    pub(crate) fn apply_msr(&self, raw: u8) {
        let msr = ModemStatus::from_bits_retain(raw);
        let mut lines = self.lines();

        let deltas = msr.deltas();
        if !deltas.is_empty() {
            let counters = &mut lines.counters;
            if deltas.contains(ModemStatus::DELTA_CTS) {
                counters.cts = counters.cts.wrapping_add(1);
            }
            if deltas.contains(ModemStatus::DELTA_DSR) {
                counters.dsr = counters.dsr.wrapping_add(1);
            }
            if deltas.contains(ModemStatus::DELTA_CD) {
                counters.cd = counters.cd.wrapping_add(1);
            }
            if deltas.contains(ModemStatus::DELTA_RI) {
                counters.ri = counters.ri.wrapping_add(1);
            }
            self.modem_changed.notify_all();
        }

        lines.msr = msr.steady();
        debug!("Port {} modem status 0x{:02x}", self.port, lines.msr.bits());
    }

    pub(crate) fn msr(&self) -> ModemStatus {
        self.lines().msr
    }

    pub(crate) fn counters(&self) -> ModemCounters {
        self.lines().counters
    }

    fn phase(&self) -> PortPhase {
        self.lines().phase
    }

    fn set_phase(&self, phase: PortPhase) {
        self.lines().phase = phase;
        self.modem_changed.notify_all();
    }

    /// Move from `from` to `to`, returning the phase found otherwise
    fn transition(&self, from: PortPhase, to: PortPhase) -> std::result::Result<(), PortPhase> {
        let mut lines = self.lines();
        if lines.phase != from {
            return Err(lines.phase);
        }
        lines.phase = to;
        Ok(())
    }
}

/// One logical serial port of an adapter
pub struct PortSession {
    device: Weak<DeviceSession>,
    state: Arc<PortState>,
    family: Family,
    uart_mode: UartMode,
    base_addr: u32,
    settings: Mutex<Option<LineSettings>>,
    closing_wait: Mutex<Option<Duration>>,
    tx_lock: Mutex<()>,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|e| e.into_inner())
}

impl PortSession {
    pub(crate) fn new(
        device: Weak<DeviceSession>,
        port: u8,
        family: Family,
        uart_mode: UartMode,
        closing_wait: Option<Duration>,
    ) -> Self {
        Self {
            device,
            state: Arc::new(PortState::new(port)),
            family,
            uart_mode,
            base_addr: uart_base_addr(port),
            settings: Mutex::new(None),
            closing_wait: Mutex::new(closing_wait),
            tx_lock: Mutex::new(()),
        }
    }

    pub(crate) fn state(&self) -> Arc<PortState> {
        self.state.clone()
    }

    /// Port ordinal within the device
    pub fn port(&self) -> u8 {
        self.state.port
    }

    pub fn uart_mode(&self) -> UartMode {
        self.uart_mode
    }

    /// XDATA base address of this port's UART registers
    pub fn base_addr(&self) -> u32 {
        self.base_addr
    }

    pub fn phase(&self) -> PortPhase {
        self.state.phase()
    }

    pub fn is_open(&self) -> bool {
        self.phase() == PortPhase::Open
    }

    /// Settings applied by the last open or reconfiguration
    pub fn line_settings(&self) -> Option<LineSettings> {
        lock(&self.settings).clone()
    }

    fn module(&self) -> u16 {
        port_module(self.port())
    }

    fn device(&self) -> Result<Arc<DeviceSession>> {
        self.device.upgrade().ok_or(Error::DeviceGone)
    }

    fn require_open(&self) -> Result<()> {
        if self.is_open() {
            Ok(())
        } else {
            Err(Error::PortNotOpen(self.port()))
        }
    }

    /// Open the port
    ///
    /// `settings` replaces the remembered line settings; without them the
    /// settings of a previous open are reapplied if there are any. Fails with
    /// [`Error::Interrupted`] when `cancel` fires while waiting for the
    /// device's open/close gate, which callers should retry.
    pub fn open(&self, settings: Option<&LineSettings>, cancel: &CancelToken) -> Result<()> {
        let device = self.device()?;

        self.state
            .transition(PortPhase::Closed, PortPhase::Opening)
            .map_err(|_| Error::PortBusy(self.port()))?;

        if let Some(settings) = settings {
            *lock(&self.settings) = Some(settings.sanitized());
        }

        let result = self.open_gated(&device, cancel);
        match &result {
            Ok(()) => {
                self.state.set_phase(PortPhase::Open);
                info!("Port {} of {} opened", self.port(), device.identity());
            }
            Err(e) => {
                self.state.set_phase(PortPhase::Closed);
                warn!("Failed to open port {}: {}", self.port(), e);
            }
        }
        result
    }

    fn open_gated(&self, device: &DeviceSession, cancel: &CancelToken) -> Result<()> {
        let _gate = device.gate().lock_interruptible(cancel)?;

        {
            let mut lines = self.state.lines();
            lines.msr = ModemStatus::empty();
            lines.shadow_mcr |= ModemControl::RTS | ModemControl::DTR;
        }

        {
            let mut shared = device.shared();
            if shared.open_ports == 0 {
                debug!("Starting interrupt channel for first open port");
                device.start_interrupt_channel(&mut shared)?;
            }
        }

        let result = self.open_sequence(device);

        let mut shared = device.shared();
        match result {
            Ok(()) => shared.open_ports += 1,
            Err(_) if shared.open_ports == 0 => device.stop_interrupt_channel(&mut shared),
            Err(_) => {}
        }
        result
    }

    fn open_sequence(&self, device: &DeviceSession) -> Result<()> {
        let port = self.port();
        let module = self.module();
        let settings = self.line_settings();

        if let Some(settings) = &settings {
            if let Err(e) = self.apply_line_settings(device, settings) {
                warn!("Port {} opening with unapplied line settings: {}", port, e);
            }
        }

        device
            .command(Command::OpenPort, OPEN_PORT_SETTINGS, module)
            .inspect_err(|e| warn!("Cannot send open command on port {}: {}", port, e))?;
        device
            .command(Command::StartPort, 0, module)
            .inspect_err(|e| warn!("Cannot send start command on port {}: {}", port, e))?;
        device
            .command(Command::PurgePort, PurgeMode::Input.value(), module)
            .inspect_err(|e| warn!("Cannot clear input buffers on port {}: {}", port, e))?;
        device
            .command(Command::PurgePort, PurgeMode::Output.value(), module)
            .inspect_err(|e| warn!("Cannot clear output buffers on port {}: {}", port, e))?;

        // Resynchronize bulk data toggles with the host controller
        device.clear_bulk_halts(port);

        // SET_CONFIG re-asserts RTS and DTR, so configure again and restart
        if let Some(settings) = &settings {
            if let Err(e) = self.apply_line_settings(device, settings) {
                warn!("Port {} reconfigure after open failed: {}", port, e);
            }
        }

        device
            .command(Command::OpenPort, OPEN_PORT_SETTINGS, module)
            .inspect_err(|e| warn!("Cannot send open command (2) on port {}: {}", port, e))?;
        device
            .command(Command::StartPort, 0, module)
            .inspect_err(|e| warn!("Cannot send start command (2) on port {}: {}", port, e))?;

        device
            .data_path()
            .start_reading(port)
            .inspect_err(|e| warn!("Cannot start reading on port {}: {}", port, e))?;

        Ok(())
    }

    /// Close the port
    ///
    /// Always reaches `Closed`. Failures are logged; a cancelled gate wait
    /// only means the open-port count is updated without the gate.
    pub fn close(&self, cancel: &CancelToken) {
        if self
            .state
            .transition(PortPhase::Open, PortPhase::Closing)
            .is_err()
        {
            debug!("Port {} is not open, nothing to close", self.port());
            return;
        }

        let Ok(device) = self.device() else {
            self.state.lines().tx_pending.clear();
            self.state.set_phase(PortPhase::Closed);
            return;
        };

        self.drain_for_close(&device);

        device.data_path().stop(self.port());
        self.state.lines().tx_pending.clear();

        if let Err(e) = device.command(Command::ClosePort, 0, self.module()) {
            warn!("Cannot send close command on port {}: {}", self.port(), e);
        }

        {
            let _gate = device.gate().lock_or_proceed(cancel);
            let mut shared = device.shared();
            shared.open_ports -= 1;
            if shared.open_ports <= 0 {
                debug!("Last port closed, stopping interrupt channel");
                device.stop_interrupt_channel(&mut shared);
                shared.open_ports = 0;
            }
        }

        self.state.set_phase(PortPhase::Closed);
        info!("Port {} of {} closed", self.port(), device.identity());
    }

    fn drain_for_close(&self, device: &DeviceSession) {
        let Some(wait) = *lock(&self.closing_wait) else {
            return;
        };
        if self.chars_in_buffer() == 0 {
            return;
        }

        debug!(
            "Draining {} pending bytes on port {}",
            self.chars_in_buffer(),
            self.port()
        );
        if let Err(e) = self.flush(device, Some(Instant::now() + wait)) {
            debug!("Drain on close failed for port {}: {}", self.port(), e);
        }
    }

    /// Reconfigure an open port
    pub fn set_line_settings(&self, settings: &LineSettings) -> Result<()> {
        self.require_open()?;
        let device = self.device()?;
        *lock(&self.settings) = Some(settings.sanitized());
        self.apply_line_settings(&device, settings)
    }

    fn apply_line_settings(&self, device: &DeviceSession, settings: &LineSettings) -> Result<()> {
        let config = translate(settings, self.family, self.uart_mode);
        debug!(
            "Port {} config: baud {} divisor {} flags 0x{:04x} data {:?} parity {:?} stop {:?} xon {} xoff {} mode {:?}",
            self.port(),
            settings.baud,
            config.baud_divisor,
            config.flags.bits(),
            config.data_bits,
            config.parity,
            config.stop_bits,
            config.xon,
            config.xoff,
            config.uart_mode
        );

        let config_result = device
            .command_data(Command::SetConfig, 0, self.module(), &config.encode())
            .inspect_err(|e| warn!("Cannot set config on port {}: {}", self.port(), e));

        let mut mcr = self.state.lines().shadow_mcr;
        if settings.is_hang_up() {
            mcr.remove(ModemControl::RTS | ModemControl::DTR);
        }
        let mcr_result = self
            .write_mcr(device, mcr)
            .inspect_err(|e| warn!("Cannot set modem control on port {}: {}", self.port(), e));

        config_result.and(mcr_result)
    }

    fn write_mcr(&self, device: &DeviceSession, mcr: ModemControl) -> Result<()> {
        device.write_memory(
            self.base_addr + UART_OFFSET_MCR,
            MCR_WRITE_MASK.bits(),
            mcr.bits(),
        )?;
        self.state.lines().shadow_mcr = mcr;
        Ok(())
    }

    /// Raise `set` and then drop `clear` on the modem-control lines
    ///
    /// The shadow is only updated once the device accepted the write.
    pub fn set_modem_control(&self, set: ModemControl, clear: ModemControl) -> Result<()> {
        let device = self.device()?;
        let mcr = {
            let lines = self.state.lines();
            lines.shadow_mcr.union(set).difference(clear)
        };
        self.write_mcr(&device, mcr)
    }

    /// Consistent snapshot of modem-control and modem-status lines
    pub fn modem_lines(&self) -> ModemLines {
        let lines = self.state.lines();
        ModemLines::from_registers(lines.shadow_mcr, lines.msr)
    }

    /// Cached modem status, steady-state bits only
    pub fn modem_status(&self) -> ModemStatus {
        self.state.msr()
    }

    /// Last modem-control value accepted by the device
    pub fn shadow_mcr(&self) -> ModemControl {
        self.state.lines().shadow_mcr
    }

    pub fn counters(&self) -> ModemCounters {
        self.state.counters()
    }

    pub fn set_break(&self, on: bool) -> Result<()> {
        let device = self.device()?;
        let value = if on { LineControl::BREAK } else { LineControl::empty() };
        device
            .write_memory(
                self.base_addr + UART_OFFSET_LCR,
                LineControl::BREAK.bits(),
                value.bits(),
            )
            .inspect_err(|e| debug!("Error setting break on port {}: {}", self.port(), e))
    }

    /// Query the port status record from the device
    pub fn line_status(&self) -> Result<PortStatus> {
        let device = self.device()?;
        let mut buf = [0u8; PortStatus::SIZE];
        device
            .command_in(Command::GetPortStatus, 0, self.module(), &mut buf)
            .inspect_err(|e| warn!("Get port status failed on port {}: {}", self.port(), e))?;
        let status = PortStatus::decode(&buf)?;
        debug!("Port {} lsr 0x{:02x}", self.port(), status.lsr.bits());
        Ok(status)
    }

    /// Whether the UART transmitter is empty
    ///
    /// A failed query reports empty so callers waiting on it do not hang.
    pub fn tx_empty(&self) -> bool {
        match self.line_status() {
            Ok(status) => status.lsr.contains(LineStatus::TX_EMPTY),
            Err(_) => true,
        }
    }

    pub fn serial_info(&self) -> SerialInfo {
        SerialInfo {
            port: self.port(),
            uart_type: "16550A",
            baud_base: self.family.baud_base(),
            xmit_fifo_size: BULK_PACKET_SIZE,
            closing_wait_ms: lock(&self.closing_wait).map(|d| d.as_millis() as u64),
        }
    }

    /// Change how long close waits for pending output; `None` disables it
    pub fn set_closing_wait(&self, wait: Option<Duration>) {
        *lock(&self.closing_wait) = wait;
    }

    /// Block until a modem line selected by `mask` changes
    ///
    /// `mask` takes the steady-state bits CTS, DSR, RI and CD. Returns
    /// `Ok(false)` when `timeout` elapses first, [`Error::Interrupted`] when
    /// `cancel` fires and [`Error::PortNotOpen`] once the port closes.
    pub fn wait_modem_change(
        &self,
        mask: ModemStatus,
        cancel: &CancelToken,
        timeout: Option<Duration>,
    ) -> Result<bool> {
        let deadline = timeout.map(|t| Instant::now() + t);
        let mut lines = self.state.lines();
        let start = lines.counters;

        loop {
            if cancel.is_cancelled() {
                return Err(Error::Interrupted);
            }
            if lines.phase != PortPhase::Open {
                return Err(Error::PortNotOpen(self.port()));
            }
            if lines.counters.changed_since(&start, mask) {
                return Ok(true);
            }

            let mut slice = WAIT_SLICE;
            if let Some(deadline) = deadline {
                let now = Instant::now();
                if now >= deadline {
                    return Ok(false);
                }
                slice = slice.min(deadline - now);
            }

            lines = self
                .state
                .modem_changed
                .wait_timeout(lines, slice)
                .map(|(guard, _)| guard)
                .unwrap_or_else(|e| e.into_inner().0);
        }
    }

    /// Queue bytes for transmission and push them to the device
    ///
    /// Returns how many bytes were accepted into the transmit buffer.
    pub fn write(&self, data: &[u8]) -> Result<usize> {
        self.require_open()?;
        let device = self.device()?;

        let accepted = {
            let mut lines = self.state.lines();
            let room = TX_BUFFER_SIZE.saturating_sub(lines.tx_pending.len());
            let accepted = room.min(data.len());
            lines.tx_pending.extend(&data[..accepted]);
            accepted
        };

        self.flush(&device, None)?;
        Ok(accepted)
    }

    /// Bytes waiting in the host transmit buffer
    pub fn chars_in_buffer(&self) -> usize {
        self.state.lines().tx_pending.len()
    }

    pub fn write_room(&self) -> usize {
        TX_BUFFER_SIZE.saturating_sub(self.chars_in_buffer())
    }

    fn flush(&self, device: &DeviceSession, deadline: Option<Instant>) -> Result<()> {
        let endpoint = device.bulk_out_endpoint(self.port())?;
        let _tx = lock(&self.tx_lock);

        loop {
            if deadline.is_some_and(|d| Instant::now() >= d) {
                return Ok(());
            }

            let chunk: Vec<u8> = {
                let lines = self.state.lines();
                let len = lines.tx_pending.len().min(BULK_PACKET_SIZE);
                lines.tx_pending.iter().take(len).copied().collect()
            };
            if chunk.is_empty() {
                return Ok(());
            }

            let sent = device
                .transport()
                .bulk_out(endpoint, &chunk, BULK_TIMEOUT)?;

            let mut lines = self.state.lines();
            let done = sent.min(lines.tx_pending.len());
            lines.tx_pending.drain(..done);
            lines.counters.tx += sent as u64;

            if sent != chunk.len() {
                return Err(Error::ShortTransfer {
                    expected: chunk.len(),
                    actual: sent,
                });
            }
        }
    }
}

impl std::fmt::Debug for PortSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PortSession")
            .field("port", &self.port())
            .field("phase", &self.phase())
            .field("uart_mode", &self.uart_mode)
            .finish()
    }
}
