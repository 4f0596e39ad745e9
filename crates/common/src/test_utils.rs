//! Test utilities for the adapter host stack
//!
//! Provides a scripted [`MockTransport`] and [`MockDataPath`] for driving the
//! adapter core without hardware.
//!
//! # Example
//!
//! ```
//! use common::UsbTransport;
//! use common::test_utils::{MockTransport, ready_layout};
//! use std::time::Duration;
//!
//! let mock = MockTransport::new(ready_layout(0x0451, 0x3410, 1));
//! mock.control_out(0x06, 0x89, 3, &[], Duration::from_secs(1)).unwrap();
//! assert_eq!(mock.control_requests(), vec![(0x06, 0x89, 3)]);
//! ```

use crate::transport::{DataPath, DeviceLayout, TransportError, UsbTransport};
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Condvar, Mutex, MutexGuard};
use std::thread::{self, ThreadId};
use std::time::{Duration, Instant};

/// Default test timeout (5 seconds)
pub const DEFAULT_TEST_TIMEOUT: Duration = Duration::from_secs(5);

/// Interrupt-IN endpoint of the mock layouts
pub const MOCK_INTERRUPT_EP: u8 = 0x83;

/// Layout of a device running application firmware in its active configuration
pub fn ready_layout(vendor_id: u16, product_id: u16, ports: u8) -> DeviceLayout {
    DeviceLayout {
        vendor_id,
        product_id,
        num_configurations: 2,
        active_configuration: 2,
        num_endpoints: 1 + 2 * ports,
        interrupt_in: Some(MOCK_INTERRUPT_EP),
        bulk_in: (0..ports).map(|p| 0x81 + p).collect(),
        bulk_out: (0..ports).map(|p| 0x01 + p).collect(),
    }
}

/// Layout of a boot loader without application firmware
pub fn boot_loader_layout(vendor_id: u16, product_id: u16) -> DeviceLayout {
    DeviceLayout {
        vendor_id,
        product_id,
        num_configurations: 1,
        active_configuration: 1,
        num_endpoints: 1,
        interrupt_in: None,
        bulk_in: Vec::new(),
        bulk_out: vec![0x01],
    }
}

/// Layout of a device with firmware still sitting in its boot configuration
pub fn boot_config_layout(vendor_id: u16, product_id: u16) -> DeviceLayout {
    DeviceLayout {
        active_configuration: 1,
        ..ready_layout(vendor_id, product_id, 1)
    }
}

/// A transfer observed by the mock
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Transfer {
    ControlOut {
        request: u8,
        value: u16,
        index: u16,
        data: Vec<u8>,
    },
    ControlIn {
        request: u8,
        value: u16,
        index: u16,
        length: usize,
    },
    BulkOut {
        endpoint: u8,
        data: Vec<u8>,
    },
    ClearHalt {
        endpoint: u8,
    },
    Reset,
    SetConfiguration(u8),
}

/// A transfer together with the thread that issued it
#[derive(Debug, Clone)]
pub struct TransferRecord {
    pub thread: ThreadId,
    pub transfer: Transfer,
}

#[derive(Debug, Clone)]
enum Outcome {
    Fail(TransportError),
    Short,
}

#[derive(Debug, Clone)]
struct ControlRule {
    request: u8,
    /// Occurrence of the request that triggers, `None` for every occurrence
    nth: Option<usize>,
    outcome: Outcome,
}

/// Scripted in-memory [`UsbTransport`]
///
/// Records every transfer, answers control-IN requests from a table, fails
/// or shortens selected control requests, and serves interrupt completions
/// from a queue.
pub struct MockTransport {
    layout: DeviceLayout,
    records: Mutex<Vec<TransferRecord>>,
    control_rules: Mutex<Vec<ControlRule>>,
    control_counts: Mutex<HashMap<u8, usize>>,
    control_in_responses: Mutex<HashMap<u8, Vec<u8>>>,
    bulk_out_failure: Mutex<Option<(usize, TransportError)>>,
    bulk_out_count: Mutex<usize>,
    interrupts: Mutex<VecDeque<Result<Vec<u8>, TransportError>>>,
    interrupt_ready: Condvar,
    bulk_in: Mutex<HashMap<u8, VecDeque<Vec<u8>>>>,
    bulk_ready: Condvar,
    control_delay: Duration,
    in_flight: AtomicBool,
    overlap: AtomicBool,
    gone: AtomicBool,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|e| e.into_inner())
}

impl MockTransport {
    pub fn new(layout: DeviceLayout) -> Self {
        Self {
            layout,
            records: Mutex::new(Vec::new()),
            control_rules: Mutex::new(Vec::new()),
            control_counts: Mutex::new(HashMap::new()),
            control_in_responses: Mutex::new(HashMap::new()),
            bulk_out_failure: Mutex::new(None),
            bulk_out_count: Mutex::new(0),
            interrupts: Mutex::new(VecDeque::new()),
            interrupt_ready: Condvar::new(),
            bulk_in: Mutex::new(HashMap::new()),
            bulk_ready: Condvar::new(),
            control_delay: Duration::ZERO,
            in_flight: AtomicBool::new(false),
            overlap: AtomicBool::new(false),
            gone: AtomicBool::new(false),
        }
    }

    /// Hold every control transfer for `delay`, widening race windows
    pub fn with_control_delay(mut self, delay: Duration) -> Self {
        self.control_delay = delay;
        self
    }

    /// Fail every occurrence of a control request
    pub fn fail_control(&self, request: u8, error: TransportError) {
        lock(&self.control_rules).push(ControlRule {
            request,
            nth: None,
            outcome: Outcome::Fail(error),
        });
    }

    /// Fail only the `nth` (0-based) occurrence of a control request
    pub fn fail_control_nth(&self, request: u8, nth: usize, error: TransportError) {
        lock(&self.control_rules).push(ControlRule {
            request,
            nth: Some(nth),
            outcome: Outcome::Fail(error),
        });
    }

    /// Make every occurrence of a control request transfer one byte less
    pub fn short_control(&self, request: u8) {
        lock(&self.control_rules).push(ControlRule {
            request,
            nth: None,
            outcome: Outcome::Short,
        });
    }

    /// Remove every scripted control failure
    pub fn clear_control_rules(&self) {
        lock(&self.control_rules).clear();
    }

    /// Bytes returned by a control-IN request
    pub fn set_control_in(&self, request: u8, data: Vec<u8>) {
        lock(&self.control_in_responses).insert(request, data);
    }

    /// Fail the `chunk`-th (0-based) bulk-out transfer
    pub fn fail_bulk_out_at(&self, chunk: usize, error: TransportError) {
        *lock(&self.bulk_out_failure) = Some((chunk, error));
    }

    /// Queue a successful interrupt completion
    pub fn push_interrupt(&self, data: &[u8]) {
        lock(&self.interrupts).push_back(Ok(data.to_vec()));
        self.interrupt_ready.notify_all();
    }

    /// Queue a failed interrupt completion
    pub fn push_interrupt_error(&self, error: TransportError) {
        lock(&self.interrupts).push_back(Err(error));
        self.interrupt_ready.notify_all();
    }

    /// Queue bytes arriving on a bulk-IN endpoint
    pub fn push_bulk_in(&self, endpoint: u8, data: &[u8]) {
        lock(&self.bulk_in)
            .entry(endpoint)
            .or_default()
            .push_back(data.to_vec());
        self.bulk_ready.notify_all();
    }

    /// Number of interrupt completions not yet consumed
    pub fn pending_interrupts(&self) -> usize {
        lock(&self.interrupts).len()
    }

    /// Simulate unplugging: every later transfer fails with `NoDevice`
    pub fn disconnect(&self) {
        self.gone.store(true, Ordering::Release);
        self.interrupt_ready.notify_all();
        self.bulk_ready.notify_all();
    }

    /// Every transfer observed so far
    pub fn records(&self) -> Vec<TransferRecord> {
        lock(&self.records).clone()
    }

    /// `(request, value, index)` of every control transfer, both directions
    pub fn control_requests(&self) -> Vec<(u8, u16, u16)> {
        lock(&self.records)
            .iter()
            .filter_map(|r| match &r.transfer {
                Transfer::ControlOut {
                    request,
                    value,
                    index,
                    ..
                }
                | Transfer::ControlIn {
                    request,
                    value,
                    index,
                    ..
                } => Some((*request, *value, *index)),
                _ => None,
            })
            .collect()
    }

    /// Payloads of every control-OUT transfer with the given request
    pub fn control_payloads(&self, request: u8) -> Vec<Vec<u8>> {
        lock(&self.records)
            .iter()
            .filter_map(|r| match &r.transfer {
                Transfer::ControlOut {
                    request: req, data, ..
                } if *req == request => Some(data.clone()),
                _ => None,
            })
            .collect()
    }

    /// Sizes of every bulk-out transfer
    pub fn bulk_out_sizes(&self) -> Vec<usize> {
        lock(&self.records)
            .iter()
            .filter_map(|r| match &r.transfer {
                Transfer::BulkOut { data, .. } => Some(data.len()),
                _ => None,
            })
            .collect()
    }

    /// Concatenation of every bulk-out payload
    pub fn bulk_out_bytes(&self) -> Vec<u8> {
        lock(&self.records)
            .iter()
            .filter_map(|r| match &r.transfer {
                Transfer::BulkOut { data, .. } => Some(data.clone()),
                _ => None,
            })
            .flatten()
            .collect()
    }

    /// Whether two control transfers were ever in flight at once
    pub fn overlap_detected(&self) -> bool {
        self.overlap.load(Ordering::Acquire)
    }

    fn record(&self, transfer: Transfer) {
        lock(&self.records).push(TransferRecord {
            thread: thread::current().id(),
            transfer,
        });
    }

    fn check_present(&self) -> Result<(), TransportError> {
        if self.gone.load(Ordering::Acquire) {
            Err(TransportError::NoDevice)
        } else {
            Ok(())
        }
    }

    fn control_outcome(&self, request: u8) -> Option<Outcome> {
        let occurrence = {
            let mut counts = lock(&self.control_counts);
            let count = counts.entry(request).or_insert(0);
            let occurrence = *count;
            *count += 1;
            occurrence
        };

        lock(&self.control_rules)
            .iter()
            .find(|rule| {
                rule.request == request && rule.nth.is_none_or(|nth| nth == occurrence)
            })
            .map(|rule| rule.outcome.clone())
    }

    fn enter_control(&self) {
        if self.in_flight.swap(true, Ordering::AcqRel) {
            self.overlap.store(true, Ordering::Release);
        }
        if !self.control_delay.is_zero() {
            thread::sleep(self.control_delay);
        }
    }

    fn leave_control(&self) {
        self.in_flight.store(false, Ordering::Release);
    }
}

impl UsbTransport for MockTransport {
    fn layout(&self) -> &DeviceLayout {
        &self.layout
    }

    fn control_out(
        &self,
        request: u8,
        value: u16,
        index: u16,
        data: &[u8],
        _timeout: Duration,
    ) -> Result<usize, TransportError> {
        self.check_present()?;
        self.enter_control();
        self.record(Transfer::ControlOut {
            request,
            value,
            index,
            data: data.to_vec(),
        });
        let outcome = self.control_outcome(request);
        self.leave_control();

        match outcome {
            Some(Outcome::Fail(error)) => Err(error),
            Some(Outcome::Short) => Ok(data.len().saturating_sub(1)),
            None => Ok(data.len()),
        }
    }

    fn control_in(
        &self,
        request: u8,
        value: u16,
        index: u16,
        buf: &mut [u8],
        _timeout: Duration,
    ) -> Result<usize, TransportError> {
        self.check_present()?;
        self.enter_control();
        self.record(Transfer::ControlIn {
            request,
            value,
            index,
            length: buf.len(),
        });
        let outcome = self.control_outcome(request);
        let response = lock(&self.control_in_responses).get(&request).cloned();
        self.leave_control();

        if let Some(Outcome::Fail(error)) = outcome {
            return Err(error);
        }

        let response = response.unwrap_or_default();
        let mut len = response.len().min(buf.len());
        buf[..len].copy_from_slice(&response[..len]);
        if matches!(outcome, Some(Outcome::Short)) {
            len = len.saturating_sub(1);
        }
        Ok(len)
    }

    fn bulk_out(
        &self,
        endpoint: u8,
        data: &[u8],
        _timeout: Duration,
    ) -> Result<usize, TransportError> {
        self.check_present()?;
        let chunk = {
            let mut count = lock(&self.bulk_out_count);
            let chunk = *count;
            *count += 1;
            chunk
        };

        if let Some((at, error)) = lock(&self.bulk_out_failure).clone() {
            if at == chunk {
                return Err(error);
            }
        }

        self.record(Transfer::BulkOut {
            endpoint,
            data: data.to_vec(),
        });
        Ok(data.len())
    }

    fn bulk_in(
        &self,
        endpoint: u8,
        buf: &mut [u8],
        timeout: Duration,
    ) -> Result<usize, TransportError> {
        let deadline = Instant::now() + timeout;
        let mut queues = lock(&self.bulk_in);

        loop {
            self.check_present()?;

            if let Some(data) = queues.get_mut(&endpoint).and_then(|q| q.pop_front()) {
                let len = data.len().min(buf.len());
                buf[..len].copy_from_slice(&data[..len]);
                return Ok(len);
            }

            let now = Instant::now();
            if now >= deadline {
                return Err(TransportError::Timeout);
            }

            queues = self
                .bulk_ready
                .wait_timeout(queues, deadline - now)
                .map(|(guard, _)| guard)
                .unwrap_or_else(|e| e.into_inner().0);
        }
    }

    fn interrupt_in(
        &self,
        _endpoint: u8,
        buf: &mut [u8],
        timeout: Duration,
    ) -> Result<usize, TransportError> {
        let deadline = Instant::now() + timeout;
        let mut queue = lock(&self.interrupts);

        loop {
            self.check_present()?;

            if let Some(completion) = queue.pop_front() {
                let data = completion?;
                let len = data.len().min(buf.len());
                buf[..len].copy_from_slice(&data[..len]);
                return Ok(len);
            }

            let now = Instant::now();
            if now >= deadline {
                return Err(TransportError::Timeout);
            }

            queue = self
                .interrupt_ready
                .wait_timeout(queue, deadline - now)
                .map(|(guard, _)| guard)
                .unwrap_or_else(|e| e.into_inner().0);
        }
    }

    fn clear_halt(&self, endpoint: u8) -> Result<(), TransportError> {
        self.check_present()?;
        self.record(Transfer::ClearHalt { endpoint });
        Ok(())
    }

    fn reset(&self) -> Result<(), TransportError> {
        self.check_present()?;
        self.record(Transfer::Reset);
        Ok(())
    }

    fn set_configuration(&self, value: u8) -> Result<(), TransportError> {
        self.check_present()?;
        self.record(Transfer::SetConfiguration(value));
        Ok(())
    }
}

/// Recording [`DataPath`]
#[derive(Debug, Default)]
pub struct MockDataPath {
    started: Mutex<Vec<u8>>,
    stopped: Mutex<Vec<u8>>,
    fail_start: AtomicBool,
}

impl MockDataPath {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every later `start_reading` fail
    pub fn fail_start(&self, fail: bool) {
        self.fail_start.store(fail, Ordering::Release);
    }

    /// Ports whose reading was started, in call order
    pub fn started(&self) -> Vec<u8> {
        lock(&self.started).clone()
    }

    /// Ports whose transfers were stopped, in call order
    pub fn stopped(&self) -> Vec<u8> {
        lock(&self.stopped).clone()
    }
}

impl DataPath for MockDataPath {
    fn start_reading(&self, port: u8) -> Result<(), TransportError> {
        if self.fail_start.load(Ordering::Acquire) {
            return Err(TransportError::Io);
        }
        lock(&self.started).push(port);
        Ok(())
    }

    fn stop(&self, port: u8) {
        lock(&self.stopped).push(port);
    }
}

/// Poll `condition` until it holds or `timeout` elapses
///
/// Returns whether the condition was observed.
pub fn wait_until(timeout: Duration, condition: impl Fn() -> bool) -> bool {
    let deadline = Instant::now() + timeout;
    while Instant::now() < deadline {
        if condition() {
            return true;
        }
        thread::sleep(Duration::from_millis(2));
    }
    condition()
}
