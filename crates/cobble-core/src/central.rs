//! Core facade
//!
//! [`Central`] is one BLE central session. It validates every request against
//! the [`StateMachine`], resolves characteristics through the
//! [`DiscoveryCache`] and forwards the request to its [`NativeAdapter`].
//!
//! Adapter events enter through the session's funnel: the state machine and
//! the cache are updated first, under a short lock, and only then is the event
//! handed to the [`EventDispatcher`]. `status()` is therefore current in both
//! delivery modes; only handler invocation is deferred. No lock is held while
//! the adapter or a handler runs.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use smallvec::{smallvec, SmallVec};
use tracing::{debug, error, info, warn};

use crate::adapter::{EventFunnel, EventSink, NativeAdapter, Signal};
use crate::config::{CobbleConfig, DeliveryMode};
use crate::discovery::DiscoveryCache;
use crate::dispatch::{DrainReport, EventDispatcher, EventHandler};
use crate::error::{CobbleError, Result};
use crate::event::{Event, EventKind};
use crate::state::{StateMachine, StateTransitionError, Transition, Trigger};
use crate::types::{
    Capabilities, CharacteristicRecord, ConnectionStatus, DeviceIdentifier, ErrorCode, GattUuid,
    ScanResult, ServiceRecord, Status, SubscriptionKind, ValueUpdate, WriteType,
};

// ----------------------------------------------------------------------------
// Shared Session State
// ----------------------------------------------------------------------------

#[derive(Debug, Default)]
struct Session {
    machine: StateMachine,
    cache: DiscoveryCache,
}

impl Session {
    fn apply(&mut self, trigger: Trigger) -> std::result::Result<Transition, StateTransitionError> {
        let transition = self.machine.apply(trigger)?;
        if transition.invalidates_cache {
            self.cache.clear();
        }
        Ok(transition)
    }
}

/// State reachable from both the facade and the adapter's sink
struct Shared {
    config: CobbleConfig,
    session: Mutex<Session>,
    dispatcher: EventDispatcher,
}

impl Shared {
    fn session(&self) -> MutexGuard<'_, Session> {
        self.session.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Update bookkeeping for one adapter event and return what to deliver
    fn account(&self, event: Event) -> SmallVec<[Event; 2]> {
        let mut session = self.session();
        let status = session.machine.status();

        match event {
            Event::ScanResult(_) if status != Status::Scanning => {
                debug!("Dropping scan result while {}", status);
                SmallVec::new()
            }
            Event::ConnectionStatusChanged {
                ref identifier,
                status: link,
            } => {
                let trigger = Trigger::Link {
                    identifier: identifier.clone(),
                    status: link,
                };
                if let Err(err) = session.apply(trigger) {
                    debug!("{}", err);
                }
                smallvec![event]
            }
            Event::ServiceDiscovered { uuid } => {
                if !status.has_link() {
                    debug!("Dropping service {} while {}", uuid, status);
                    return SmallVec::new();
                }
                if session.cache.add_service(uuid) {
                    smallvec![event]
                } else {
                    SmallVec::new()
                }
            }
            Event::CharacteristicDiscovered {
                service_uuid,
                char_uuid,
                capabilities,
            } => {
                if !status.has_link() {
                    debug!("Dropping characteristic {} while {}", char_uuid, status);
                    return SmallVec::new();
                }
                let created_service =
                    session
                        .cache
                        .add_characteristic(service_uuid, char_uuid, capabilities);
                if created_service {
                    debug!(
                        "Characteristic {} names unseen service {}",
                        char_uuid, service_uuid
                    );
                    smallvec![Event::ServiceDiscovered { uuid: service_uuid }, event]
                } else {
                    smallvec![event]
                }
            }
            Event::ValueUpdate(ref update) if !status.has_link() => {
                debug!(
                    "Dropping value for {} while {}",
                    update.characteristic_uuid, status
                );
                SmallVec::new()
            }
            event => smallvec![event],
        }
    }
}

impl EventFunnel for Shared {
    fn ingest(&self, signal: Signal) {
        match signal {
            Signal::Event(event) => {
                for event in self.account(event) {
                    self.dispatcher.dispatch(event);
                }
            }
            Signal::Fault(code) => {
                error!("Adapter fault: {}", code);
                let mut session = self.session();
                if let Err(err) = session.apply(Trigger::Fault(code)) {
                    debug!("{}", err);
                }
            }
            Signal::SessionMtu(mtu) => {
                let mut session = self.session();
                if session.machine.status().has_link() {
                    debug!("Session MTU {:?}", mtu);
                    session.cache.set_session_mtu(mtu);
                }
            }
        }
    }
}

// ----------------------------------------------------------------------------
// Central
// ----------------------------------------------------------------------------

/// A BLE central session driving one adapter, one device at a time
pub struct Central<A: NativeAdapter> {
    shared: Arc<Shared>,
    adapter: A,
}

impl<A: NativeAdapter> Central<A> {
    /// Create a session and attach the adapter to it.
    ///
    /// The delivery mode is fixed for the lifetime of the session.
    pub fn new(config: CobbleConfig, mut adapter: A) -> Self {
        let shared = Arc::new(Shared {
            dispatcher: EventDispatcher::new(config.delivery, config.queue_capacity),
            session: Mutex::new(Session::default()),
            config,
        });
        adapter.attach(EventSink::new(
            shared.clone(),
            shared.config.max_value_len,
        ));
        info!("Central created ({:?} delivery)", shared.config.delivery);
        Self { shared, adapter }
    }

    pub fn config(&self) -> &CobbleConfig {
        &self.shared.config
    }

    pub fn delivery_mode(&self) -> DeliveryMode {
        self.shared.config.delivery
    }

    pub fn adapter(&self) -> &A {
        &self.adapter
    }

    fn transition(&self, trigger: Trigger) -> Result<Transition> {
        Ok(self.shared.session().apply(trigger)?)
    }

    // ------------------------------------------------------------------------
    // Lifecycle
    // ------------------------------------------------------------------------

    /// Bring the adapter up.
    ///
    /// Valid from `Uninitialised` and from `Error`. Hardware and permission
    /// failures show up afterwards as `Status::Error` with an error code.
    pub fn init(&self) -> Result<()> {
        debug!("init");
        self.transition(Trigger::Init)?;
        self.adapter.init();
        Ok(())
    }

    /// Stop scanning, drop any connection and release the adapter
    pub fn deinit(&self) -> Result<()> {
        debug!("deinit");
        let transition = self.transition(Trigger::Deinit)?;
        if !transition.changed() {
            return Ok(());
        }
        match transition.from {
            Status::Connecting | Status::Connected => self.adapter.disconnect(),
            Status::Scanning => self.adapter.scan_stop(),
            _ => {}
        }
        self.adapter.deinit();
        Ok(())
    }

    // ------------------------------------------------------------------------
    // Scanning
    // ------------------------------------------------------------------------

    /// Start scanning for advertisers offering any of `filter`'s services
    pub fn scan_start(&self, filter: &[GattUuid]) -> Result<()> {
        debug!("scan_start ({} filter UUIDs)", filter.len());
        {
            let mut session = self.shared.session();
            StateMachine::next(session.machine.status(), &Trigger::ScanStart)?;
            self.check_scan_filter(filter)?;
            session.apply(Trigger::ScanStart)?;
        }
        self.adapter.scan_start(filter);
        Ok(())
    }

    fn check_scan_filter(&self, filter: &[GattUuid]) -> Result<()> {
        if !filter.is_empty() || !self.adapter.capabilities().requires_service_filter {
            return Ok(());
        }
        if self.shared.config.enforce_scan_filter {
            return Err(CobbleError::ScanFilterRequired);
        }
        warn!("Scanning without a service filter; this adapter may report nothing");
        Ok(())
    }

    /// Stop scanning. A no-op when not scanning.
    pub fn scan_stop(&self) -> Result<()> {
        debug!("scan_stop");
        if self.transition(Trigger::ScanStop)?.changed() {
            self.adapter.scan_stop();
        }
        Ok(())
    }

    // ------------------------------------------------------------------------
    // Connection
    // ------------------------------------------------------------------------

    /// Connect to a device, stopping any scan first.
    ///
    /// Returns once the request is issued; `status()` reads `Connecting`
    /// until the adapter reports the outcome.
    pub fn connect(&self, identifier: impl Into<DeviceIdentifier>) -> Result<()> {
        let identifier = identifier.into();
        debug!("connect {}", identifier);
        let transition = self.transition(Trigger::Connect(identifier.clone()))?;
        if transition.from == Status::Scanning {
            self.adapter.scan_stop();
        }
        self.adapter.connect(&identifier);
        Ok(())
    }

    /// Tear down the connection or abort the pending connect.
    ///
    /// The discovery cache is empty when this returns. The status moves to
    /// `Initialised` once the adapter confirms.
    pub fn disconnect(&self) -> Result<()> {
        debug!("disconnect");
        self.transition(Trigger::Disconnect)?;
        self.adapter.disconnect();
        Ok(())
    }

    // ------------------------------------------------------------------------
    // GATT Operations
    // ------------------------------------------------------------------------

    fn resolve(&self, uuid: &GattUuid) -> Result<CharacteristicRecord> {
        let session = self.shared.session();
        if session.machine.status() != Status::Connected {
            return Err(CobbleError::NotConnected);
        }
        session
            .cache
            .find_characteristic(uuid)
            .cloned()
            .ok_or(CobbleError::CharacteristicNotFound { uuid: *uuid })
    }

    /// Request a read; the value arrives as a value update
    pub fn read(&self, uuid: &GattUuid) -> Result<()> {
        debug!("read {}", uuid);
        let record = self.resolve(uuid)?;
        if !record.capabilities.contains(Capabilities::READ) {
            return Err(CobbleError::UnsupportedOperation {
                uuid: *uuid,
                operation: "read",
            });
        }
        self.adapter.read(&record);
        Ok(())
    }

    /// Write a value, acknowledged when the characteristic allows it.
    ///
    /// Payloads longer than [`max_write_size`](Self::max_write_size) are
    /// refused, never split.
    pub fn write(&self, uuid: &GattUuid, bytes: &[u8]) -> Result<WriteType> {
        debug!("write {} ({} bytes)", uuid, bytes.len());
        let record = self.resolve(uuid)?;
        let write_type =
            record
                .capabilities
                .write_type()
                .ok_or(CobbleError::UnsupportedOperation {
                    uuid: *uuid,
                    operation: "write",
                })?;

        let max_size = self.max_write_size(write_type.with_response());
        if bytes.len() > max_size {
            return Err(CobbleError::PayloadTooLarge {
                size: bytes.len(),
                max_size,
            });
        }
        self.adapter.write(&record, bytes, write_type);
        Ok(write_type)
    }

    /// Subscribe to value changes, preferring notifications over indications
    pub fn subscribe(&self, uuid: &GattUuid) -> Result<SubscriptionKind> {
        debug!("subscribe {}", uuid);
        let record = self.resolve(uuid)?;
        let kind =
            record
                .capabilities
                .subscription_kind()
                .ok_or(CobbleError::UnsupportedOperation {
                    uuid: *uuid,
                    operation: "subscribe",
                })?;
        self.adapter.subscribe(&record, kind);
        Ok(kind)
    }

    /// Largest single write accepted on the current connection.
    ///
    /// Valid in any state. Both write types share the same limit.
    pub fn max_write_size(&self, with_response: bool) -> usize {
        let size = self.shared.session().cache.max_write_size(&self.shared.config);
        debug!("max_write_size(with_response: {}) = {}", with_response, size);
        size
    }

    // ------------------------------------------------------------------------
    // Queries
    // ------------------------------------------------------------------------

    pub fn status(&self) -> Status {
        self.shared.session().machine.status()
    }

    /// Reason for `Status::Error`; `ErrorCode::None` in every other state
    pub fn error_code(&self) -> ErrorCode {
        self.shared.session().machine.error_code()
    }

    /// Device of the current connect attempt or connection
    pub fn target(&self) -> Option<DeviceIdentifier> {
        self.shared.session().machine.target().cloned()
    }

    pub fn services(&self) -> Vec<ServiceRecord> {
        self.shared.session().cache.services().to_vec()
    }

    pub fn characteristics(&self) -> Vec<CharacteristicRecord> {
        self.shared.session().cache.characteristics().to_vec()
    }

    pub fn find_characteristic(&self, uuid: &GattUuid) -> Result<CharacteristicRecord> {
        self.shared
            .session()
            .cache
            .find_characteristic(uuid)
            .cloned()
            .ok_or(CobbleError::CharacteristicNotFound { uuid: *uuid })
    }

    /// Queue depth per event kind, in drain order
    pub fn pending_events(&self) -> Vec<(EventKind, usize)> {
        EventKind::DRAIN_ORDER
            .iter()
            .map(|&kind| (kind, self.shared.dispatcher.pending(kind)))
            .collect()
    }

    // ------------------------------------------------------------------------
    // Event Delivery
    // ------------------------------------------------------------------------

    /// Deliver queued events on the calling thread. A no-op in immediate mode.
    pub fn drain(&self) -> DrainReport {
        self.shared.dispatcher.drain()
    }

    fn set_handler(&self, kind: EventKind, handler: EventHandler) {
        self.shared.dispatcher.set_handler(kind, Some(handler));
    }

    /// Remove the handler of one kind; its events are discarded from now on
    pub fn clear_handler(&self, kind: EventKind) {
        self.shared.dispatcher.set_handler(kind, None);
    }

    pub fn on_scan_result<F>(&self, handler: F)
    where
        F: Fn(ScanResult) + Send + Sync + 'static,
    {
        self.set_handler(
            EventKind::ScanResult,
            Arc::new(move |event| {
                if let Event::ScanResult(result) = event {
                    handler(result);
                }
            }),
        );
    }

    pub fn on_connection_status<F>(&self, handler: F)
    where
        F: Fn(DeviceIdentifier, ConnectionStatus) + Send + Sync + 'static,
    {
        self.set_handler(
            EventKind::ConnectionStatus,
            Arc::new(move |event| {
                if let Event::ConnectionStatusChanged { identifier, status } = event {
                    handler(identifier, status);
                }
            }),
        );
    }

    pub fn on_service_discovered<F>(&self, handler: F)
    where
        F: Fn(ServiceRecord) + Send + Sync + 'static,
    {
        self.set_handler(
            EventKind::ServiceDiscovered,
            Arc::new(move |event| {
                if let Event::ServiceDiscovered { uuid } = event {
                    handler(ServiceRecord { uuid });
                }
            }),
        );
    }

    pub fn on_characteristic_discovered<F>(&self, handler: F)
    where
        F: Fn(CharacteristicRecord) + Send + Sync + 'static,
    {
        self.set_handler(
            EventKind::CharacteristicDiscovered,
            Arc::new(move |event| {
                if let Event::CharacteristicDiscovered {
                    service_uuid,
                    char_uuid,
                    capabilities,
                } = event
                {
                    handler(CharacteristicRecord {
                        uuid: char_uuid,
                        service_uuid,
                        capabilities,
                    });
                }
            }),
        );
    }

    pub fn on_value_update<F>(&self, handler: F)
    where
        F: Fn(ValueUpdate) + Send + Sync + 'static,
    {
        self.set_handler(
            EventKind::ValueUpdate,
            Arc::new(move |event| {
                if let Event::ValueUpdate(update) = event {
                    handler(update);
                }
            }),
        );
    }
}

impl<A: NativeAdapter + std::fmt::Debug> std::fmt::Debug for Central<A> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Central")
            .field("status", &self.status())
            .field("dispatcher", &self.shared.dispatcher)
            .field("adapter", &self.adapter)
            .finish()
    }
}
