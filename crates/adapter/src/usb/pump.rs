//! Bulk receive pump
//!
//! Serves [`DataPath`] for real adapters: every open port gets a worker
//! thread that keeps a bulk-IN read outstanding on the port's endpoint and
//! forwards received bytes to the application over a channel.

use common::{DataPath, TransportError, UsbTransport};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::thread::{self, JoinHandle};
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::{debug, error, trace, warn};

/// Bulk-IN transfer buffer
const BULK_IN_BUFFER_SIZE: usize = 64;

/// Bytes received on a port
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PortData {
    pub port: u8,
    pub data: Vec<u8>,
}

struct Worker {
    stop: Arc<AtomicBool>,
    handle: JoinHandle<()>,
}

/// One reader thread per open port
pub struct BulkReadPump {
    transport: Arc<dyn UsbTransport>,
    tx: mpsc::UnboundedSender<PortData>,
    poll_interval: Duration,
    workers: Mutex<HashMap<u8, Worker>>,
}

impl BulkReadPump {
    /// Create a pump and the receiver its data arrives on
    pub fn new(
        transport: Arc<dyn UsbTransport>,
        poll_interval: Duration,
    ) -> (Self, mpsc::UnboundedReceiver<PortData>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (
            Self {
                transport,
                tx,
                poll_interval,
                workers: Mutex::new(HashMap::new()),
            },
            rx,
        )
    }

    /// Whether a reader is running for a port
    pub fn is_reading(&self, port: u8) -> bool {
        self.workers()
            .get(&port)
            .is_some_and(|w| !w.handle.is_finished())
    }

    fn workers(&self) -> MutexGuard<'_, HashMap<u8, Worker>> {
        self.workers.lock().unwrap_or_else(|e| e.into_inner())
    }
}

impl DataPath for BulkReadPump {
    fn start_reading(&self, port: u8) -> Result<(), TransportError> {
        let endpoint = self
            .transport
            .layout()
            .bulk_in
            .get(usize::from(port))
            .copied()
            .ok_or(TransportError::NotFound)?;

        let mut workers = self.workers();
        if let Some(worker) = workers.remove(&port) {
            // A reader left over from an earlier open
            worker.stop.store(true, Ordering::Release);
            let _ = worker.handle.join();
        }

        let stop = Arc::new(AtomicBool::new(false));
        let handle = thread::Builder::new()
            .name(format!("ti-usb-bulk-in-{}", port))
            .spawn({
                let transport = self.transport.clone();
                let tx = self.tx.clone();
                let stop = stop.clone();
                let poll = self.poll_interval;
                move || read_loop(transport.as_ref(), port, endpoint, &tx, &stop, poll)
            })
            .map_err(|e| TransportError::Other(e.to_string()))?;

        debug!("Bulk reader started for port {} on endpoint 0x{:02x}", port, endpoint);
        workers.insert(port, Worker { stop, handle });
        Ok(())
    }

    fn stop(&self, port: u8) {
        let worker = self.workers().remove(&port);
        if let Some(worker) = worker {
            worker.stop.store(true, Ordering::Release);
            if worker.handle.join().is_err() {
                error!("Bulk reader for port {} panicked", port);
            }
            debug!("Bulk reader stopped for port {}", port);
        }
    }
}

impl Drop for BulkReadPump {
    fn drop(&mut self) {
        let workers = std::mem::take(&mut *self.workers());
        for (_, worker) in workers {
            worker.stop.store(true, Ordering::Release);
            let _ = worker.handle.join();
        }
    }
}

fn read_loop(
    transport: &dyn UsbTransport,
    port: u8,
    endpoint: u8,
    tx: &mpsc::UnboundedSender<PortData>,
    stop: &AtomicBool,
    poll_interval: Duration,
) {
    let mut buf = [0u8; BULK_IN_BUFFER_SIZE];

    while !stop.load(Ordering::Acquire) {
        match transport.bulk_in(endpoint, &mut buf, poll_interval) {
            Ok(0) => {}
            Ok(len) => {
                trace!("Port {} received {} bytes", port, len);
                let data = PortData {
                    port,
                    data: buf[..len].to_vec(),
                };
                if tx.send(data).is_err() {
                    debug!("Receiver for port {} dropped", port);
                    return;
                }
            }
            Err(TransportError::Timeout) => {}
            Err(TransportError::NoDevice | TransportError::Cancelled) => {
                debug!("Bulk reader for port {} shutting down", port);
                return;
            }
            Err(e) => {
                warn!("Bulk read on port {} failed: {}", port, e);
                return;
            }
        }
    }
}
