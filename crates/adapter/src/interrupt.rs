//! Interrupt dispatcher
//!
//! One receive loop per device drains the interrupt-IN endpoint and routes
//! each 2-byte status event to the port it addresses. The loop runs on a
//! dedicated thread and resubmits after every completion until it is torn
//! down by its owner or the endpoint fails.

use crate::port::PortState;
use common::{Error, Result, TransportError, UsbTransport};
use protocol::{EventKind, InterruptEvent};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread::{self, JoinHandle};
use std::time::Duration;
use tracing::{debug, error, trace, warn};

/// Interrupt transfer buffer; events are 2 bytes but the endpoint may
/// deliver up to a full packet
const INTERRUPT_BUFFER_SIZE: usize = 64;

/// Why a receive completed
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Completion {
    /// A buffer of this many bytes arrived
    Success(usize),
    /// The channel was shut down on purpose or the device went away
    TornDown,
    /// Any other transport failure
    Failed(TransportError),
}

impl Completion {
    /// Classify one receive attempt
    ///
    /// Returns `None` when the poll interval elapsed without a completion.
    pub fn classify(result: std::result::Result<usize, TransportError>, stopping: bool) -> Option<Self> {
        if stopping {
            return Some(Self::TornDown);
        }
        match result {
            Ok(len) => Some(Self::Success(len)),
            Err(TransportError::Timeout) => None,
            Err(TransportError::NoDevice | TransportError::Cancelled) => Some(Self::TornDown),
            Err(e) => Some(Self::Failed(e)),
        }
    }
}

/// What the dispatcher did with one delivered buffer
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Dispatch {
    BadLength(usize),
    HardwareError(u8),
    BadPort(i16),
    DataError { port: u8, code: u8 },
    ModemStatus { port: u8, msr: u8 },
    Unknown { port: u8, kind: u8 },
}

/// Route one successfully received buffer
pub(crate) fn handle_completion(data: &[u8], ports: &[Arc<PortState>]) -> Dispatch {
    let event = match InterruptEvent::decode(data) {
        Ok(event) => event,
        Err(_) => {
            debug!("Bad interrupt packet size: {}", data.len());
            return Dispatch::BadLength(data.len());
        }
    };

    if event.is_hardware_error() {
        error!("Adapter hardware error: {}", event.payload);
        return Dispatch::HardwareError(event.payload);
    }

    let port_number = event.port();
    trace!(
        "Interrupt event: port {}, kind {:?}, data 0x{:02x}",
        port_number,
        event.kind(),
        event.payload
    );

    let Some(port) = usize::try_from(port_number)
        .ok()
        .and_then(|index| ports.get(index))
    else {
        warn!("Interrupt event for bad port number {}", port_number);
        return Dispatch::BadPort(port_number);
    };

    match event.kind() {
        EventKind::DataError => {
            warn!(
                "Data error on port {}, code 0x{:02x}",
                port.port(),
                event.payload
            );
            Dispatch::DataError {
                port: port.port(),
                code: event.payload,
            }
        }
        EventKind::ModemStatus => {
            port.apply_msr(event.payload);
            Dispatch::ModemStatus {
                port: port.port(),
                msr: event.payload,
            }
        }
        EventKind::Unknown(kind) => {
            warn!(
                "Unknown interrupt event kind {} on port {}, data 0x{:02x}",
                kind,
                port.port(),
                event.payload
            );
            Dispatch::Unknown {
                port: port.port(),
                kind,
            }
        }
    }
}

/// Running receive loop
///
/// Stopping is synchronous: [`InterruptDispatcher::stop`] returns after the
/// loop has exited, so no event is dispatched afterwards.
pub(crate) struct InterruptDispatcher {
    stop: Arc<AtomicBool>,
    handle: Option<JoinHandle<()>>,
}

impl InterruptDispatcher {
    pub(crate) fn start(
        transport: Arc<dyn UsbTransport>,
        ports: Vec<Arc<PortState>>,
        poll_interval: Duration,
    ) -> Result<Self> {
        let endpoint = transport
            .layout()
            .interrupt_in
            .ok_or(Error::NoInterruptEndpoint)?;
        let stop = Arc::new(AtomicBool::new(false));

        let handle = thread::Builder::new()
            .name(format!("ti-usb-interrupt-{:02x}", endpoint))
            .spawn({
                let stop = stop.clone();
                move || receive_loop(transport.as_ref(), endpoint, &ports, &stop, poll_interval)
            })?;

        debug!("Interrupt channel started on endpoint 0x{:02x}", endpoint);
        Ok(Self {
            stop,
            handle: Some(handle),
        })
    }

    /// Whether the loop ended on its own after a failure
    pub(crate) fn is_finished(&self) -> bool {
        self.handle.as_ref().is_none_or(|h| h.is_finished())
    }

    pub(crate) fn stop(mut self) {
        self.shutdown();
    }

    fn shutdown(&mut self) {
        self.stop.store(true, Ordering::Release);
        if let Some(handle) = self.handle.take() {
            if handle.join().is_err() {
                error!("Interrupt dispatcher thread panicked");
            }
            debug!("Interrupt channel stopped");
        }
    }
}

impl Drop for InterruptDispatcher {
    fn drop(&mut self) {
        self.shutdown();
    }
}

fn receive_loop(
    transport: &dyn UsbTransport,
    endpoint: u8,
    ports: &[Arc<PortState>],
    stop: &AtomicBool,
    poll_interval: Duration,
) {
    let mut buf = [0u8; INTERRUPT_BUFFER_SIZE];

    loop {
        if stop.load(Ordering::Acquire) {
            debug!("Interrupt channel shutting down");
            return;
        }

        let result = transport.interrupt_in(endpoint, &mut buf, poll_interval);
        let Some(completion) = Completion::classify(result, stop.load(Ordering::Acquire)) else {
            continue;
        };

        match completion {
            Completion::Success(len) => {
                handle_completion(&buf[..len], ports);
            }
            Completion::TornDown => {
                debug!("Interrupt channel shutting down");
                return;
            }
            Completion::Failed(e) => {
                // The channel stays dead until the next first open restarts it
                error!("Interrupt channel failed: {}", e);
                return;
            }
        }
    }
}
