//! Event vocabulary produced by adapters

use crate::types::{
    Capabilities, ConnectionStatus, DeviceIdentifier, GattUuid, ScanResult, ValueUpdate,
};

// ----------------------------------------------------------------------------
// Events
// ----------------------------------------------------------------------------

/// Something the native stack reported
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Event {
    ScanResult(ScanResult),
    ConnectionStatusChanged {
        identifier: DeviceIdentifier,
        status: ConnectionStatus,
    },
    ServiceDiscovered {
        uuid: GattUuid,
    },
    CharacteristicDiscovered {
        service_uuid: GattUuid,
        char_uuid: GattUuid,
        capabilities: Capabilities,
    },
    ValueUpdate(ValueUpdate),
}

impl Event {
    pub fn kind(&self) -> EventKind {
        match self {
            Event::ScanResult(_) => EventKind::ScanResult,
            Event::ConnectionStatusChanged { .. } => EventKind::ConnectionStatus,
            Event::ServiceDiscovered { .. } => EventKind::ServiceDiscovered,
            Event::CharacteristicDiscovered { .. } => EventKind::CharacteristicDiscovered,
            Event::ValueUpdate(_) => EventKind::ValueUpdate,
        }
    }
}

/// Handler slot / queue an event belongs to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum EventKind {
    ScanResult,
    ConnectionStatus,
    ServiceDiscovered,
    CharacteristicDiscovered,
    ValueUpdate,
}

impl EventKind {
    /// Order in which deferred queues are drained
    pub const DRAIN_ORDER: [EventKind; 5] = [
        EventKind::ScanResult,
        EventKind::ConnectionStatus,
        EventKind::ServiceDiscovered,
        EventKind::CharacteristicDiscovered,
        EventKind::ValueUpdate,
    ];

    pub(crate) fn index(self) -> usize {
        self as usize
    }
}
