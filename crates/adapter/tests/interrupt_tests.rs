//! Interrupt Channel Integration Tests
//!
//! Feeds interrupt completions through the mock transport into open ports.
//!
//! # Test Scenarios
//! - Modem status events update the cached status of the addressed port
//! - Malformed, hardware-error and out-of-range events are discarded
//! - Modem-status waiters wake on change, timeout, cancellation and close
//! - Endpoint failure and disconnect end the receive loop
//! - Concurrent readers never see a half-applied status update
//!
//! Run with: `cargo test -p adapter --test interrupt_tests`

use adapter::identity::TI_VENDOR_ID;
use adapter::{DeviceSession, IdentityTable, PortSession, SessionOptions};
use common::test_utils::{DEFAULT_TEST_TIMEOUT, MockDataPath, MockTransport, ready_layout, wait_until};
use common::{CancelToken, Error, TransportError};
use protocol::ModemStatus;
use rand::Rng;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread;
use std::time::Duration;

const POLL: Duration = Duration::from_millis(5);

/// Modem status event for a port: port (3 + n) in the high nibble, kind 4
fn msr_event(port: u8, msr: u8) -> [u8; 2] {
    [((3 + port) << 4) | 0x04, msr]
}

fn open_session(
    product_id: u16,
    ports: u8,
) -> (Arc<DeviceSession>, Arc<MockTransport>, Vec<Arc<PortSession>>) {
    common::setup_test_logging();
    let mock = Arc::new(MockTransport::new(ready_layout(
        TI_VENDOR_ID,
        product_id,
        ports,
    )));
    let session = DeviceSession::new(
        IdentityTable::new()
            .require(TI_VENDOR_ID, product_id)
            .unwrap(),
        mock.clone(),
        Arc::new(MockDataPath::new()),
        SessionOptions {
            interrupt_poll: POLL,
            closing_wait: None,
        },
    );

    let cancel = CancelToken::new();
    let opened = session.ports().to_vec();
    for port in &opened {
        port.open(None, &cancel).unwrap();
    }
    (session, mock, opened)
}

// ============================================================================
// Dispatch Tests
// ============================================================================

#[test]
fn test_modem_status_reaches_port() {
    let (_session, mock, ports) = open_session(0x5052, 2);

    mock.push_interrupt(&msr_event(1, 0xB1));
    assert!(wait_until(DEFAULT_TEST_TIMEOUT, || {
        ports[1].modem_status() == ModemStatus::CD | ModemStatus::DSR | ModemStatus::CTS
    }));

    assert_eq!(ports[1].counters().cts, 1);
    assert_eq!(ports[0].modem_status(), ModemStatus::empty());
    let lines = ports[1].modem_lines();
    assert!(lines.cts && lines.dsr && lines.cd && !lines.ri);
}

#[test]
fn test_wrong_length_completion_discarded() {
    let (_session, mock, ports) = open_session(0x3410, 1);

    mock.push_interrupt(&[0x34, 0xF0, 0x00]);
    mock.push_interrupt(&msr_event(0, 0x10));
    assert!(wait_until(DEFAULT_TEST_TIMEOUT, || mock.pending_interrupts() == 0));
    assert!(wait_until(DEFAULT_TEST_TIMEOUT, || {
        ports[0].modem_status() == ModemStatus::CTS
    }));
}

#[test]
fn test_bad_events_keep_channel_running() {
    let (session, mock, ports) = open_session(0x3410, 1);

    // Hardware error, port out of range, data error, unknown kind
    mock.push_interrupt(&[0xFF, 0x01]);
    mock.push_interrupt(&msr_event(1, 0xF0));
    mock.push_interrupt(&[0x33, 0x02]);
    mock.push_interrupt(&[0x37, 0xF0]);
    mock.push_interrupt(&msr_event(0, 0x80));

    assert!(wait_until(DEFAULT_TEST_TIMEOUT, || {
        ports[0].modem_status() == ModemStatus::CD
    }));
    assert!(session.interrupt_running());
}

#[test]
fn test_status_reset_on_open() {
    let (_session, mock, ports) = open_session(0x3410, 1);
    let cancel = CancelToken::new();

    mock.push_interrupt(&msr_event(0, 0xF0));
    assert!(wait_until(DEFAULT_TEST_TIMEOUT, || {
        ports[0].modem_status() == ModemStatus::STEADY_MASK
    }));

    ports[0].close(&cancel);
    ports[0].open(None, &cancel).unwrap();
    assert_eq!(ports[0].modem_status(), ModemStatus::empty());
}

// ============================================================================
// Modem Wait Tests
// ============================================================================

#[test]
fn test_wait_wakes_on_selected_change() {
    let (_session, mock, ports) = open_session(0x3410, 1);

    let waiter = {
        let port = ports[0].clone();
        thread::spawn(move || {
            port.wait_modem_change(ModemStatus::CTS, &CancelToken::new(), Some(DEFAULT_TEST_TIMEOUT))
        })
    };

    // DSR changes are not selected
    mock.push_interrupt(&msr_event(0, 0x22));
    thread::sleep(Duration::from_millis(30));
    assert!(!waiter.is_finished());

    mock.push_interrupt(&msr_event(0, 0x31));
    assert!(waiter.join().unwrap().unwrap());
}

#[test]
fn test_wait_times_out() {
    let (_session, _mock, ports) = open_session(0x3410, 1);
    let changed = ports[0]
        .wait_modem_change(
            ModemStatus::STEADY_MASK,
            &CancelToken::new(),
            Some(Duration::from_millis(30)),
        )
        .unwrap();
    assert!(!changed);
}

#[test]
fn test_wait_interrupted_by_cancel() {
    let (_session, _mock, ports) = open_session(0x3410, 1);
    let cancel = CancelToken::new();

    let waiter = {
        let port = ports[0].clone();
        let cancel = cancel.clone();
        thread::spawn(move || port.wait_modem_change(ModemStatus::STEADY_MASK, &cancel, None))
    };
    thread::sleep(Duration::from_millis(20));
    cancel.cancel();

    assert!(matches!(waiter.join().unwrap(), Err(Error::Interrupted)));
}

#[test]
fn test_wait_ends_when_port_closes() {
    let (_session, _mock, ports) = open_session(0x3410, 1);

    let waiter = {
        let port = ports[0].clone();
        thread::spawn(move || {
            port.wait_modem_change(ModemStatus::STEADY_MASK, &CancelToken::new(), None)
        })
    };
    thread::sleep(Duration::from_millis(20));
    ports[0].close(&CancelToken::new());

    assert!(matches!(waiter.join().unwrap(), Err(Error::PortNotOpen(0))));
}

// ============================================================================
// Channel Termination Tests
// ============================================================================

#[test]
fn test_endpoint_failure_ends_loop_until_next_first_open() {
    let (session, mock, ports) = open_session(0x3410, 1);
    let cancel = CancelToken::new();

    mock.push_interrupt_error(TransportError::Overflow);
    assert!(wait_until(DEFAULT_TEST_TIMEOUT, || !session.interrupt_running()));
    assert!(session.interrupt_active());

    // Events are no longer delivered
    mock.push_interrupt(&msr_event(0, 0x10));
    thread::sleep(Duration::from_millis(30));
    assert_eq!(ports[0].modem_status(), ModemStatus::empty());

    ports[0].close(&cancel);
    ports[0].open(None, &cancel).unwrap();
    assert!(session.interrupt_running());
    assert!(wait_until(DEFAULT_TEST_TIMEOUT, || {
        ports[0].modem_status() == ModemStatus::CTS
    }));
}

#[test]
fn test_disconnect_tears_down_loop() {
    let (session, mock, ports) = open_session(0x3410, 1);

    mock.disconnect();
    assert!(wait_until(DEFAULT_TEST_TIMEOUT, || !session.interrupt_running()));

    // Close still completes against a vanished device
    ports[0].close(&CancelToken::new());
    assert!(!ports[0].is_open());
    assert_eq!(session.open_port_count(), 0);
}

#[test]
fn test_detach_stops_channel() {
    let (session, _mock, _ports) = open_session(0x5052, 2);
    session.detach();
    assert!(!session.interrupt_active());
}

// ============================================================================
// Snapshot Consistency Tests
// ============================================================================

#[test]
fn test_concurrent_readers_see_whole_updates() {
    let (_session, mock, ports) = open_session(0x3410, 1);
    let done = Arc::new(AtomicBool::new(false));

    let reader = {
        let port = ports[0].clone();
        let done = done.clone();
        thread::spawn(move || {
            let mut last_cts = 0;
            while !done.load(Ordering::Acquire) {
                let status = port.modem_status();
                assert!((status & ModemStatus::DELTA_MASK).is_empty());

                let counters = port.counters();
                assert!(counters.cts >= last_cts);
                last_cts = counters.cts;
            }
        })
    };

    let mut rng = rand::rng();
    let mut expected_cts = 0;
    for _ in 0..200 {
        let msr: u8 = rng.random();
        if msr & 0x01 != 0 {
            expected_cts += 1;
        }
        mock.push_interrupt(&msr_event(0, msr));
    }
    // A final CTS change marks the end of the burst
    mock.push_interrupt(&msr_event(0, 0x91));
    expected_cts += 1;

    assert!(wait_until(DEFAULT_TEST_TIMEOUT, || {
        ports[0].counters().cts == expected_cts
    }));
    done.store(true, Ordering::Release);
    reader.join().unwrap();

    assert_eq!(ports[0].modem_status(), ModemStatus::CD | ModemStatus::CTS);
}
