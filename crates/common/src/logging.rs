//! Logging setup and configuration

use tracing_subscriber::{EnvFilter, fmt, prelude::*};

const DEFAULT_TEST_FILTER: &str = "adapter=debug,common=debug";

/// Setup tracing subscriber for the application
///
/// `RUST_LOG` takes precedence over `default_level`.
pub fn setup_logging(default_level: &str) -> crate::Result<()> {
    let filter = build_filter(default_level)?;

    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().with_target(false))
        .try_init()
        .map_err(|e| crate::Error::Config(format!("Logging already initialized: {}", e)))?;

    Ok(())
}

/// Route log output through the test harness capture
///
/// Safe to call from every test; only the first call installs a subscriber.
pub fn setup_test_logging() {
    let Ok(filter) = build_filter(DEFAULT_TEST_FILTER) else {
        return;
    };
    let _ = tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().with_test_writer())
        .try_init();
}

fn build_filter(default_level: &str) -> crate::Result<EnvFilter> {
    EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(default_level))
        .map_err(|e| crate::Error::Config(format!("Invalid log filter: {}", e)))
}
