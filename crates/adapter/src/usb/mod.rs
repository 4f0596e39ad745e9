//! Real USB access through `rusb`
//!
//! - `transport`: [`RusbTransport`], the transport capability over an opened
//!   device handle
//! - `manager`: bus scanning and opening of supported adapters
//! - `pump`: the bulk receive pump serving open ports

pub mod manager;
pub mod pump;
pub mod transport;

pub use manager::{AdapterInfo, AdapterScanner, check_filter};
pub use pump::{BulkReadPump, PortData};
pub use transport::{RusbTransport, map_rusb_error};
