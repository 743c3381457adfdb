//! Native adapter boundary
//!
//! A [`NativeAdapter`] turns facade requests into calls on a platform BLE stack
//! and reports completions back through the [`EventSink`] it was attached to.
//! Requests never return a result: success and failure both arrive later as
//! events (or as a [`EventSink::fault`] for hardware and permission problems).
//! Adapters must not call back into the facade directly.

use std::fmt;
use std::sync::Arc;

use tracing::warn;

use crate::event::Event;
use crate::types::{
    Capabilities, CharacteristicRecord, ConnectionStatus, DeviceIdentifier, ErrorCode, GattUuid,
    ScanResult, SubscriptionKind, ValueUpdate, WriteType,
};

// ----------------------------------------------------------------------------
// Adapter Trait
// ----------------------------------------------------------------------------

/// Static properties of an adapter implementation
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct AdapterCapabilities {
    /// The platform cannot scan without at least one service UUID in the filter
    pub requires_service_filter: bool,
}

/// Platform-specific BLE stack driver
pub trait NativeAdapter: Send + Sync {
    /// Receive the sink for all future events. Called once, before any request.
    fn attach(&mut self, sink: EventSink);

    fn capabilities(&self) -> AdapterCapabilities {
        AdapterCapabilities::default()
    }

    fn init(&self);

    fn deinit(&self);

    /// Start scanning; an empty filter means every advertiser
    fn scan_start(&self, filter: &[GattUuid]);

    fn scan_stop(&self);

    fn connect(&self, identifier: &DeviceIdentifier);

    /// Tear down the link or abort the pending connect.
    ///
    /// Must be acknowledged with [`ConnectionStatus::Disconnected`] (or
    /// [`ConnectionStatus::ConnectFailed`] for an aborted connect).
    fn disconnect(&self);

    fn read(&self, characteristic: &CharacteristicRecord);

    fn write(&self, characteristic: &CharacteristicRecord, bytes: &[u8], write_type: WriteType);

    fn subscribe(&self, characteristic: &CharacteristicRecord, kind: SubscriptionKind);
}

/// Lets a [`Central`](crate::Central) pick its adapter at runtime
impl<A: NativeAdapter + ?Sized> NativeAdapter for Box<A> {
    fn attach(&mut self, sink: EventSink) {
        (**self).attach(sink)
    }

    fn capabilities(&self) -> AdapterCapabilities {
        (**self).capabilities()
    }

    fn init(&self) {
        (**self).init()
    }

    fn deinit(&self) {
        (**self).deinit()
    }

    fn scan_start(&self, filter: &[GattUuid]) {
        (**self).scan_start(filter)
    }

    fn scan_stop(&self) {
        (**self).scan_stop()
    }

    fn connect(&self, identifier: &DeviceIdentifier) {
        (**self).connect(identifier)
    }

    fn disconnect(&self) {
        (**self).disconnect()
    }

    fn read(&self, characteristic: &CharacteristicRecord) {
        (**self).read(characteristic)
    }

    fn write(&self, characteristic: &CharacteristicRecord, bytes: &[u8], write_type: WriteType) {
        (**self).write(characteristic, bytes, write_type)
    }

    fn subscribe(&self, characteristic: &CharacteristicRecord, kind: SubscriptionKind) {
        (**self).subscribe(characteristic, kind)
    }
}

// ----------------------------------------------------------------------------
// Event Sink
// ----------------------------------------------------------------------------

/// Everything an adapter can report
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum Signal {
    Event(Event),
    Fault(ErrorCode),
    SessionMtu(Option<u16>),
}

/// Receiving end of the funnel behind an [`EventSink`]
pub(crate) trait EventFunnel: Send + Sync {
    fn ingest(&self, signal: Signal);
}

struct Detached;

impl EventFunnel for Detached {
    fn ingest(&self, _signal: Signal) {}
}

/// Handle an adapter uses to report events, safe to clone onto any thread
#[derive(Clone)]
pub struct EventSink {
    funnel: Arc<dyn EventFunnel>,
    max_value_len: usize,
}

impl EventSink {
    pub(crate) fn new(funnel: Arc<dyn EventFunnel>, max_value_len: usize) -> Self {
        Self {
            funnel,
            max_value_len,
        }
    }

    /// A sink that drops everything, for adapters that are not attached yet
    pub fn detached() -> Self {
        Self::new(Arc::new(Detached), crate::config::DEFAULT_MAX_VALUE_LEN)
    }

    pub fn scan_result(
        &self,
        name: Option<String>,
        rssi: i32,
        identifier: impl Into<DeviceIdentifier>,
    ) {
        self.funnel.ingest(Signal::Event(Event::ScanResult(ScanResult {
            name,
            rssi,
            identifier: identifier.into(),
        })));
    }

    pub fn connection_status(
        &self,
        identifier: impl Into<DeviceIdentifier>,
        status: ConnectionStatus,
    ) {
        self.funnel.ingest(Signal::Event(Event::ConnectionStatusChanged {
            identifier: identifier.into(),
            status,
        }));
    }

    pub fn service_discovered(&self, uuid: GattUuid) {
        self.funnel
            .ingest(Signal::Event(Event::ServiceDiscovered { uuid }));
    }

    pub fn characteristic_discovered(
        &self,
        service_uuid: GattUuid,
        char_uuid: GattUuid,
        capabilities: Capabilities,
    ) {
        self.funnel
            .ingest(Signal::Event(Event::CharacteristicDiscovered {
                service_uuid,
                char_uuid,
                capabilities,
            }));
    }

    /// Report a characteristic value. The bytes are copied, up to the
    /// configured maximum; longer values are truncated and flagged.
    pub fn value_update(&self, characteristic_uuid: GattUuid, bytes: &[u8]) {
        let update = ValueUpdate::bounded(characteristic_uuid, bytes, self.max_value_len);
        if let Some(original) = update.truncated_from {
            warn!(
                "Value for {} truncated from {} to {} bytes",
                characteristic_uuid,
                original,
                update.payload.len()
            );
        }
        self.funnel.ingest(Signal::Event(Event::ValueUpdate(update)));
    }

    /// Unrecoverable hardware or permission condition
    pub fn fault(&self, code: ErrorCode) {
        self.funnel.ingest(Signal::Fault(code));
    }

    /// Negotiated MTU of the current connection, `None` when unknown
    pub fn session_mtu(&self, mtu: Option<u16>) {
        self.funnel.ingest(Signal::SessionMtu(mtu));
    }
}

impl fmt::Debug for EventSink {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EventSink")
            .field("max_value_len", &self.max_value_len)
            .finish_non_exhaustive()
    }
}
