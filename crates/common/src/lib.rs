//! Common utilities for the TI 3410/5052 adapter host stack
//!
//! This crate provides what the adapter crate and its test suites share:
//! the error taxonomy, logging setup, the USB transport capability the core
//! is written against, the cancellation token used for interruptible waits,
//! and a scripted mock transport for tests.

pub mod cancel;
pub mod error;
pub mod logging;
#[cfg(any(test, feature = "test-utils"))]
pub mod test_utils;
pub mod transport;

pub use cancel::CancelToken;
pub use error::{Error, Result};
pub use logging::{setup_logging, setup_test_logging};
pub use transport::{DataPath, DeviceLayout, TransportError, UsbTransport};
