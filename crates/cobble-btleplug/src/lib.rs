//! Desktop Bluetooth Low Energy adapter for Cobble
//!
//! Implements the `cobble-core` [`NativeAdapter`](cobble_core::NativeAdapter)
//! contract on top of `btleplug`, covering Linux (BlueZ over D-Bus), macOS
//! (CoreBluetooth) and Windows (WinRT).
//!
//! ## Architecture
//!
//! - [`config`] - adapter selection, connection timeout, scan filter policy
//! - [`error`] - adapter errors and their mapping onto core error codes
//! - `worker` - the async task that executes requests in order
//! - `adapter` - the synchronous [`BtleplugAdapter`] handed to `Central`
//!
//! ## Usage
//!
//! ```rust,no_run
//! use cobble_btleplug::{BtleplugAdapter, BtleplugConfig};
//! use cobble_core::{Central, CobbleConfig};
//!
//! # fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let adapter = BtleplugAdapter::new(BtleplugConfig::default())?;
//! let central = Central::new(CobbleConfig::default(), adapter);
//!
//! central.on_scan_result(|result| println!("{} {:?}", result.identifier, result.name));
//! central.init()?;
//! central.scan_start(&["180D".parse()?])?;
//! # Ok(())
//! # }
//! ```
//!
//! ## Platform Notes
//!
//! - btleplug does not expose the negotiated ATT MTU, so `max_write_size`
//!   reports the 20-byte default.
//! - CoreBluetooth hides device addresses; identifiers are platform
//!   peripheral ids there.

mod adapter;
pub mod config;
pub mod error;
mod worker;

pub use adapter::BtleplugAdapter;
pub use config::BtleplugConfig;
pub use error::{BtleplugAdapterError, Result};
pub use worker::{capabilities_from, RSSI_UNAVAILABLE};
