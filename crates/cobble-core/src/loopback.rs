//! In-process loopback adapter
//!
//! [`LoopbackAdapter`] stands in for a platform stack. In
//! [`manual`](LoopbackAdapter::manual) mode it only records requests, and tests
//! drive the [`EventSink`] themselves to emulate any adapter timing. In
//! [`simulated`](LoopbackAdapter::simulated) mode it answers requests
//! synchronously from a table of [`SimulatedDevice`]s, the way a well-behaved
//! stack would.

use std::collections::HashSet;
use std::sync::{Mutex, MutexGuard, PoisonError};

use tracing::debug;

use crate::adapter::{AdapterCapabilities, EventSink, NativeAdapter};
use crate::types::{
    Capabilities, CharacteristicRecord, ConnectionStatus, DeviceIdentifier, ErrorCode, GattUuid,
    SubscriptionKind, WriteType,
};

// ----------------------------------------------------------------------------
// Simulated Peripherals
// ----------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SimulatedCharacteristic {
    pub service_uuid: GattUuid,
    pub uuid: GattUuid,
    pub capabilities: Capabilities,
    pub value: Vec<u8>,
}

/// A peripheral the loopback adapter can discover and connect to
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SimulatedDevice {
    pub identifier: DeviceIdentifier,
    pub name: Option<String>,
    pub rssi: i32,
    pub services: Vec<GattUuid>,
    pub characteristics: Vec<SimulatedCharacteristic>,
    pub mtu: Option<u16>,
    /// When false every connect attempt fails
    pub connectable: bool,
}

impl SimulatedDevice {
    pub fn new(identifier: impl Into<DeviceIdentifier>) -> Self {
        Self {
            identifier: identifier.into(),
            name: None,
            rssi: -60,
            services: Vec::new(),
            characteristics: Vec::new(),
            mtu: None,
            connectable: true,
        }
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    pub fn with_rssi(mut self, rssi: i32) -> Self {
        self.rssi = rssi;
        self
    }

    pub fn with_service(mut self, uuid: GattUuid) -> Self {
        if !self.services.contains(&uuid) {
            self.services.push(uuid);
        }
        self
    }

    /// Add a characteristic, registering its service if needed
    pub fn with_characteristic(
        mut self,
        service_uuid: GattUuid,
        uuid: GattUuid,
        capabilities: Capabilities,
        value: impl Into<Vec<u8>>,
    ) -> Self {
        self = self.with_service(service_uuid);
        self.characteristics.push(SimulatedCharacteristic {
            service_uuid,
            uuid,
            capabilities,
            value: value.into(),
        });
        self
    }

    pub fn with_mtu(mut self, mtu: u16) -> Self {
        self.mtu = Some(mtu);
        self
    }

    pub fn unreachable(mut self) -> Self {
        self.connectable = false;
        self
    }

    fn advertises_any(&self, filter: &[GattUuid]) -> bool {
        filter.is_empty() || filter.iter().any(|uuid| self.services.contains(uuid))
    }
}

// ----------------------------------------------------------------------------
// Request Log
// ----------------------------------------------------------------------------

/// A request the facade issued to the adapter
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Request {
    Init,
    Deinit,
    ScanStart(Vec<GattUuid>),
    ScanStop,
    Connect(DeviceIdentifier),
    Disconnect,
    Read(GattUuid),
    Write {
        uuid: GattUuid,
        bytes: Vec<u8>,
        write_type: WriteType,
    },
    Subscribe {
        uuid: GattUuid,
        kind: SubscriptionKind,
    },
}

// ----------------------------------------------------------------------------
// Loopback Adapter
// ----------------------------------------------------------------------------

#[derive(Debug, Default)]
struct LoopbackState {
    requests: Vec<Request>,
    devices: Vec<SimulatedDevice>,
    connected: Option<usize>,
    subscribed: HashSet<GattUuid>,
    init_fault: Option<ErrorCode>,
    scan_fault: Option<ErrorCode>,
}

#[derive(Debug)]
pub struct LoopbackAdapter {
    simulate: bool,
    capabilities: AdapterCapabilities,
    sink: Option<EventSink>,
    state: Mutex<LoopbackState>,
}

impl LoopbackAdapter {
    /// Record requests and never answer them
    pub fn manual() -> Self {
        Self {
            simulate: false,
            capabilities: AdapterCapabilities::default(),
            sink: None,
            state: Mutex::new(LoopbackState::default()),
        }
    }

    /// Answer requests from the simulated device table
    pub fn simulated() -> Self {
        Self {
            simulate: true,
            ..Self::manual()
        }
    }

    pub fn with_device(self, device: SimulatedDevice) -> Self {
        self.lock().devices.push(device);
        self
    }

    pub fn with_capabilities(mut self, capabilities: AdapterCapabilities) -> Self {
        self.capabilities = capabilities;
        self
    }

    /// Make the next `init` raise a fault
    pub fn fail_init_with(&self, code: ErrorCode) {
        self.lock().init_fault = Some(code);
    }

    /// Make the next `scan_start` raise a fault
    pub fn fail_scan_with(&self, code: ErrorCode) {
        self.lock().scan_fault = Some(code);
    }

    /// Sink the facade attached, for driving events by hand
    pub fn sink(&self) -> Option<EventSink> {
        self.sink.clone()
    }

    /// Every request seen so far, oldest first
    pub fn requests(&self) -> Vec<Request> {
        self.lock().requests.clone()
    }

    /// Current stored value of a simulated characteristic
    pub fn value(&self, uuid: &GattUuid) -> Option<Vec<u8>> {
        let state = self.lock();
        let index = state.connected?;
        state.devices[index]
            .characteristics
            .iter()
            .find(|c| c.uuid == *uuid)
            .map(|c| c.value.clone())
    }

    fn lock(&self) -> MutexGuard<'_, LoopbackState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Injected faults fire in both modes
    fn raise(&self, fault: Option<ErrorCode>) {
        if let (Some(sink), Some(code)) = (&self.sink, fault) {
            sink.fault(code);
        }
    }

    /// Record a request; returns the sink only when the adapter should answer
    fn record(&self, request: Request) -> (MutexGuard<'_, LoopbackState>, Option<&EventSink>) {
        let mut state = self.lock();
        debug!("Loopback request {:?}", request);
        state.requests.push(request);
        let sink = if self.simulate {
            self.sink.as_ref()
        } else {
            None
        };
        (state, sink)
    }
}

// Every answer is emitted after the state lock is released, since sink calls
// may run application handlers that call back into this adapter.
impl NativeAdapter for LoopbackAdapter {
    fn attach(&mut self, sink: EventSink) {
        self.sink = Some(sink);
    }

    fn capabilities(&self) -> AdapterCapabilities {
        self.capabilities
    }

    fn init(&self) {
        let (mut state, _) = self.record(Request::Init);
        let fault = state.init_fault.take();
        drop(state);
        self.raise(fault);
    }

    fn deinit(&self) {
        let (mut state, _) = self.record(Request::Deinit);
        state.connected = None;
        state.subscribed.clear();
    }

    fn scan_start(&self, filter: &[GattUuid]) {
        let (mut state, sink) = self.record(Request::ScanStart(filter.to_vec()));
        if let Some(code) = state.scan_fault.take() {
            drop(state);
            self.raise(Some(code));
            return;
        }
        let Some(sink) = sink else { return };

        let seen: Vec<_> = state
            .devices
            .iter()
            .filter(|device| device.advertises_any(filter))
            .map(|device| (device.name.clone(), device.rssi, device.identifier.clone()))
            .collect();
        drop(state);

        for (name, rssi, identifier) in seen {
            sink.scan_result(name, rssi, identifier);
        }
    }

    fn scan_stop(&self) {
        self.record(Request::ScanStop);
    }

    fn connect(&self, identifier: &DeviceIdentifier) {
        let (mut state, sink) = self.record(Request::Connect(identifier.clone()));
        let Some(sink) = sink else { return };

        let index = state
            .devices
            .iter()
            .position(|device| device.identifier == *identifier && device.connectable);
        let Some(index) = index else {
            drop(state);
            sink.connection_status(identifier, ConnectionStatus::ConnectFailed);
            return;
        };

        state.connected = Some(index);
        state.subscribed.clear();
        let device = state.devices[index].clone();
        drop(state);

        sink.connection_status(identifier, ConnectionStatus::Connected);
        sink.session_mtu(device.mtu);
        for service in &device.services {
            sink.service_discovered(*service);
        }
        for characteristic in &device.characteristics {
            sink.characteristic_discovered(
                characteristic.service_uuid,
                characteristic.uuid,
                characteristic.capabilities,
            );
        }
    }

    fn disconnect(&self) {
        let (mut state, sink) = self.record(Request::Disconnect);
        let Some(sink) = sink else { return };

        let identifier = state
            .connected
            .take()
            .map(|index| state.devices[index].identifier.clone());
        state.subscribed.clear();
        drop(state);

        if let Some(identifier) = identifier {
            sink.connection_status(identifier, ConnectionStatus::Disconnected);
        }
    }

    fn read(&self, characteristic: &CharacteristicRecord) {
        let (state, sink) = self.record(Request::Read(characteristic.uuid));
        let Some(sink) = sink else { return };

        let value = state.connected.and_then(|index| {
            state.devices[index]
                .characteristics
                .iter()
                .find(|c| c.uuid == characteristic.uuid)
                .map(|c| c.value.clone())
        });
        drop(state);

        if let Some(value) = value {
            sink.value_update(characteristic.uuid, &value);
        }
    }

    fn write(&self, characteristic: &CharacteristicRecord, bytes: &[u8], write_type: WriteType) {
        let (mut state, sink) = self.record(Request::Write {
            uuid: characteristic.uuid,
            bytes: bytes.to_vec(),
            write_type,
        });
        let Some(sink) = sink else { return };

        let Some(index) = state.connected else { return };
        if let Some(stored) = state.devices[index]
            .characteristics
            .iter_mut()
            .find(|c| c.uuid == characteristic.uuid)
        {
            stored.value = bytes.to_vec();
        }
        let echo = state.subscribed.contains(&characteristic.uuid);
        drop(state);

        if echo {
            sink.value_update(characteristic.uuid, bytes);
        }
    }

    fn subscribe(&self, characteristic: &CharacteristicRecord, kind: SubscriptionKind) {
        let (mut state, _) = self.record(Request::Subscribe {
            uuid: characteristic.uuid,
            kind,
        });
        if self.simulate {
            state.subscribed.insert(characteristic.uuid);
        }
    }
}
