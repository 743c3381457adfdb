//! Cobble Core
//!
//! A platform-neutral core for Bluetooth Low Energy central-role clients. Each
//! platform stack (BlueZ, CoreBluetooth, WinRT, Android) is wrapped by a
//! [`NativeAdapter`] that turns native completion callbacks into a small event
//! vocabulary. This crate owns everything above that boundary:
//!
//! - [`state`] - the connection-lifecycle state machine (`Status` / `ErrorCode`)
//! - [`discovery`] - services and characteristics of the connected device
//! - [`dispatch`] - the thread-safe event funnel with immediate or deferred delivery
//! - [`central`] - the [`Central`] facade applications talk to
//! - [`adapter`] - the adapter contract and the [`EventSink`] adapters push into
//! - [`loopback`] - an in-process adapter for tests and demos
//!
//! ## Usage
//!
//! ```rust
//! use cobble_core::{Central, CobbleConfig, DeliveryMode, LoopbackAdapter, SimulatedDevice, Status};
//!
//! let adapter = LoopbackAdapter::simulated().with_device(
//!     SimulatedDevice::new("AA:BB:CC:DD:EE:FF")
//!         .with_name("Dev-A")
//!         .with_rssi(-60),
//! );
//! let central = Central::new(
//!     CobbleConfig::new().with_delivery(DeliveryMode::Deferred),
//!     adapter,
//! );
//!
//! central.on_scan_result(|result| println!("found {:?}", result.name));
//! central.init()?;
//! central.scan_start(&[])?;
//! central.drain();
//!
//! central.connect("AA:BB:CC:DD:EE:FF")?;
//! assert_eq!(central.status(), Status::Connected);
//! # Ok::<(), cobble_core::CobbleError>(())
//! ```

// ----------------------------------------------------------------------------
// Module Declarations
// ----------------------------------------------------------------------------

pub mod adapter;
pub mod central;
pub mod config;
pub mod discovery;
pub mod dispatch;
pub mod error;
pub mod event;
pub mod loopback;
pub mod state;
pub mod types;

// ----------------------------------------------------------------------------
// Public API
// ----------------------------------------------------------------------------

pub use adapter::{AdapterCapabilities, EventSink, NativeAdapter};
pub use central::Central;
pub use config::{CobbleConfig, DeliveryMode};
pub use discovery::DiscoveryCache;
pub use dispatch::{Delivery, DrainReport, EventDispatcher, EventHandler, KindCounts};
pub use error::{CobbleError, Result};
pub use event::{Event, EventKind};
pub use loopback::{LoopbackAdapter, Request, SimulatedDevice};
pub use state::{StateMachine, StateTransitionError, Transition, Trigger};
pub use types::{
    Capabilities, CharacteristicRecord, ConnectionStatus, DeviceIdentifier, ErrorCode, GattUuid,
    ScanResult, ServiceRecord, Status, SubscriptionKind, ValueUpdate, WriteType,
};
