//! Device sessions
//!
//! [`DeviceSession::attach`] decides what an attached adapter needs: a
//! firmware download, a switch to its active configuration, or nothing, in
//! which case the adapter is ready and a session is built for it.
//!
//! A ready session owns the adapter's ports, the open/close gate and the
//! open-port count that decides whether the shared interrupt channel runs.
//! The count and the dispatcher handle sit behind their own small lock so
//! that a close which could not take the gate can still update them.

use crate::firmware::{FirmwareSource, download_firmware};
use crate::gate::Gate;
use crate::identity::{DeviceIdentity, IdentityTable};
use crate::interrupt::InterruptDispatcher;
use crate::port::{DEFAULT_CLOSING_WAIT, PortSession};
use common::{DataPath, DeviceLayout, Error, Result, TransportError, UsbTransport};
use protocol::{Command, MemoryWrite, ModuleId};
use serde::Serialize;
use std::sync::{Arc, Mutex, MutexGuard};
use std::thread;
use std::time::Duration;
use tracing::{debug, info, warn};

/// bConfigurationValue of the firmware-download configuration
pub const BOOT_CONFIGURATION: u8 = 1;

/// bConfigurationValue of the application configuration
pub const ACTIVE_CONFIGURATION: u8 = 2;

/// Timeout of every vendor control request
pub const CONTROL_TIMEOUT: Duration = Duration::from_secs(5);

/// Settle time before resetting a 3410 after a download
const RESET_DELAY: Duration = Duration::from_millis(100);

/// What an attached adapter is running, as told by its descriptors
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum FirmwareState {
    /// Single configuration with a single endpoint: needs a download
    BootLoader,
    /// Application firmware present but the boot configuration is active
    BootConfiguration,
    Ready,
}

impl FirmwareState {
    pub fn from_layout(layout: &DeviceLayout) -> Self {
        if layout.num_configurations == 1 && layout.num_endpoints == 1 {
            Self::BootLoader
        } else if layout.active_configuration == BOOT_CONFIGURATION {
            Self::BootConfiguration
        } else {
            Self::Ready
        }
    }
}

impl std::fmt::Display for FirmwareState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::BootLoader => write!(f, "boot loader"),
            Self::BootConfiguration => write!(f, "boot configuration"),
            Self::Ready => write!(f, "ready"),
        }
    }
}

/// Per-session tunables
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionOptions {
    /// How long one interrupt receive waits before rechecking for shutdown
    pub interrupt_poll: Duration,
    /// Initial closing wait of every port
    pub closing_wait: Option<Duration>,
}

impl Default for SessionOptions {
    fn default() -> Self {
        Self {
            interrupt_poll: Duration::from_millis(100),
            closing_wait: Some(DEFAULT_CLOSING_WAIT),
        }
    }
}

/// Result of attaching to an adapter
pub enum AttachOutcome {
    /// Application firmware is running; ports may be opened
    Ready(Arc<DeviceSession>),
    /// Firmware was downloaded; the adapter will re-enumerate
    FirmwareDownloaded { reset_issued: bool },
    /// The adapter was switched out of its boot configuration and will
    /// re-enumerate
    ConfigurationSwitched,
}

impl AttachOutcome {
    pub fn is_ready(&self) -> bool {
        matches!(self, Self::Ready(_))
    }
}

impl std::fmt::Debug for AttachOutcome {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Ready(session) => f.debug_tuple("Ready").field(session.identity()).finish(),
            Self::FirmwareDownloaded { reset_issued } => f
                .debug_struct("FirmwareDownloaded")
                .field("reset_issued", reset_issued)
                .finish(),
            Self::ConfigurationSwitched => write!(f, "ConfigurationSwitched"),
        }
    }
}

/// Device-wide state mutated by port open and close
pub(crate) struct SharedState {
    pub(crate) open_ports: i32,
    dispatcher: Option<InterruptDispatcher>,
}

/// One attached, ready adapter
pub struct DeviceSession {
    identity: DeviceIdentity,
    transport: Arc<dyn UsbTransport>,
    data_path: Arc<dyn DataPath>,
    options: SessionOptions,
    gate: Gate,
    shared: Mutex<SharedState>,
    ports: Vec<Arc<PortSession>>,
}

impl DeviceSession {
    /// Run the attach state machine for an opened adapter
    pub fn attach(
        transport: Arc<dyn UsbTransport>,
        data_path: Arc<dyn DataPath>,
        identities: &IdentityTable,
        firmware: &dyn FirmwareSource,
        options: SessionOptions,
    ) -> Result<AttachOutcome> {
        let layout = transport.layout();
        let identity = identities.require(layout.vendor_id, layout.product_id)?;

        debug!(
            "Attaching {}: {} configurations, configuration {} active, {} endpoints",
            identity, layout.num_configurations, layout.active_configuration, layout.num_endpoints
        );

        match FirmwareState::from_layout(layout) {
            FirmwareState::BootLoader => {
                download_firmware(transport.as_ref(), &identity, firmware)?;

                let reset_issued = identity.family.needs_reset_after_download();
                if reset_issued {
                    thread::sleep(RESET_DELAY);
                    if let Err(e) = transport.reset() {
                        warn!("Reset after firmware download failed: {}", e);
                    }
                }

                info!("Firmware downloaded to {}, waiting for re-enumeration", identity);
                return Ok(AttachOutcome::FirmwareDownloaded { reset_issued });
            }
            FirmwareState::BootConfiguration => {
                info!("Switching {} to its active configuration", identity);
                transport.set_configuration(ACTIVE_CONFIGURATION)?;
                return Ok(AttachOutcome::ConfigurationSwitched);
            }
            FirmwareState::Ready => {}
        }

        info!("{} ready with {} port(s)", identity, identity.num_ports());
        Ok(AttachOutcome::Ready(Self::new(
            identity, transport, data_path, options,
        )))
    }

    /// Build a session for an adapter already running application firmware
    pub fn new(
        identity: DeviceIdentity,
        transport: Arc<dyn UsbTransport>,
        data_path: Arc<dyn DataPath>,
        options: SessionOptions,
    ) -> Arc<Self> {
        Arc::new_cyclic(|weak| {
            let ports = (0..identity.num_ports())
                .map(|port| {
                    Arc::new(PortSession::new(
                        weak.clone(),
                        port,
                        identity.family,
                        identity.uart_mode(),
                        options.closing_wait,
                    ))
                })
                .collect();

            Self {
                identity,
                transport,
                data_path,
                options,
                gate: Gate::new(),
                shared: Mutex::new(SharedState {
                    open_ports: 0,
                    dispatcher: None,
                }),
                ports,
            }
        })
    }

    pub fn identity(&self) -> &DeviceIdentity {
        &self.identity
    }

    pub fn num_ports(&self) -> u8 {
        self.identity.num_ports()
    }

    pub fn port(&self, port: u8) -> Option<Arc<PortSession>> {
        self.ports.get(usize::from(port)).cloned()
    }

    pub fn ports(&self) -> &[Arc<PortSession>] {
        &self.ports
    }

    /// Number of currently open ports
    pub fn open_port_count(&self) -> i32 {
        self.shared().open_ports
    }

    /// Whether the interrupt channel has been started and not stopped
    pub fn interrupt_active(&self) -> bool {
        self.shared().dispatcher.is_some()
    }

    /// Whether the interrupt channel is started and its loop still receiving
    pub fn interrupt_running(&self) -> bool {
        self.shared()
            .dispatcher
            .as_ref()
            .is_some_and(|d| !d.is_finished())
    }

    /// Stop the interrupt channel regardless of open ports
    ///
    /// Used when the adapter is going away.
    pub fn detach(&self) {
        let mut shared = self.shared();
        if shared.dispatcher.is_some() {
            debug!("Detaching {}", self.identity);
            self.stop_interrupt_channel(&mut shared);
        }
    }

    pub(crate) fn gate(&self) -> &Gate {
        &self.gate
    }

    pub(crate) fn shared(&self) -> MutexGuard<'_, SharedState> {
        self.shared.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub(crate) fn transport(&self) -> &dyn UsbTransport {
        self.transport.as_ref()
    }

    pub(crate) fn data_path(&self) -> &dyn DataPath {
        self.data_path.as_ref()
    }

    pub(crate) fn start_interrupt_channel(&self, shared: &mut SharedState) -> Result<()> {
        if let Some(stale) = shared.dispatcher.take() {
            stale.stop();
        }

        let ports = self.ports.iter().map(|p| p.state()).collect();
        let dispatcher = InterruptDispatcher::start(
            self.transport.clone(),
            ports,
            self.options.interrupt_poll,
        )?;
        shared.dispatcher = Some(dispatcher);
        Ok(())
    }

    pub(crate) fn stop_interrupt_channel(&self, shared: &mut SharedState) {
        if let Some(dispatcher) = shared.dispatcher.take() {
            dispatcher.stop();
        }
    }

    /// Send a vendor command without data
    pub(crate) fn command(&self, command: Command, value: u16, index: u16) -> Result<()> {
        self.command_data(command, value, index, &[])
    }

    /// Send a vendor command with a data stage
    pub(crate) fn command_data(
        &self,
        command: Command,
        value: u16,
        index: u16,
        data: &[u8],
    ) -> Result<()> {
        let sent = self
            .transport
            .control_out(command.code(), value, index, data, CONTROL_TIMEOUT)?;
        if sent != data.len() {
            warn!("Short control write ({} / {})", sent, data.len());
            return Err(Error::ShortTransfer {
                expected: data.len(),
                actual: sent,
            });
        }
        Ok(())
    }

    /// Issue a vendor command and read its full response into `buf`
    pub(crate) fn command_in(
        &self,
        command: Command,
        value: u16,
        index: u16,
        buf: &mut [u8],
    ) -> Result<()> {
        let received = self
            .transport
            .control_in(command.code(), value, index, buf, CONTROL_TIMEOUT)?;
        if received != buf.len() {
            warn!("Short control read ({} / {})", received, buf.len());
            return Err(Error::ShortTransfer {
                expected: buf.len(),
                actual: received,
            });
        }
        Ok(())
    }

    /// Masked write of one XDATA byte
    pub(crate) fn write_memory(&self, address: u32, mask: u8, value: u8) -> Result<()> {
        debug!(
            "Write memory: addr 0x{:08x}, mask 0x{:02x}, byte 0x{:02x}",
            address, mask, value
        );
        let record = MemoryWrite::masked_byte(address, mask, value);
        self.command_data(Command::WriteData, 0, ModuleId::Ram.index(), &record.encode())
    }

    /// Reset data toggles on a port's bulk endpoints, ignoring failures
    pub(crate) fn clear_bulk_halts(&self, port: u8) {
        let layout = self.transport.layout();
        let endpoints = [
            layout.bulk_out.get(usize::from(port)),
            layout.bulk_in.get(usize::from(port)),
        ];
        for endpoint in endpoints.into_iter().flatten() {
            if let Err(e) = self.transport.clear_halt(*endpoint) {
                debug!("Clear halt on endpoint 0x{:02x} failed: {}", endpoint, e);
            }
        }
    }

    pub(crate) fn bulk_out_endpoint(&self, port: u8) -> Result<u8> {
        self.transport
            .layout()
            .bulk_out
            .get(usize::from(port))
            .copied()
            .ok_or(Error::Transport(TransportError::NotFound))
    }
}

impl Drop for DeviceSession {
    fn drop(&mut self) {
        let shared = self.shared.get_mut().unwrap_or_else(|e| e.into_inner());
        if let Some(dispatcher) = shared.dispatcher.take() {
            dispatcher.stop();
        }
    }
}

impl std::fmt::Debug for DeviceSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DeviceSession")
            .field("identity", &self.identity)
            .field("ports", &self.ports)
            .finish()
    }
}
