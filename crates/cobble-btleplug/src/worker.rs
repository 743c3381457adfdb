//! Async request worker
//!
//! The facade is synchronous and never waits on the radio, so every request is
//! queued as a [`Command`] and executed here, one at a time and in order, on
//! the tokio runtime. A second task pumps btleplug's central event stream
//! (advertisements and link loss) and a third forwards notifications of the
//! connected peripheral. Results only ever leave through the [`EventSink`].

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use btleplug::api::{
    BDAddr, Central as _, CentralEvent, CharPropFlags, Characteristic, Manager as _,
    Peripheral as _, PeripheralProperties, ScanFilter, WriteType as BleWriteType,
};
use btleplug::platform::{Adapter, Manager, Peripheral};
use cobble_core::{
    Capabilities, CharacteristicRecord, ConnectionStatus, DeviceIdentifier, ErrorCode, EventSink,
    GattUuid, SubscriptionKind, WriteType,
};
use futures::stream::StreamExt;
use tokio::sync::{mpsc, Mutex, RwLock};
use tokio::task::JoinHandle;
use tokio::time::timeout;
use tracing::{debug, error, info, warn};

use crate::config::BtleplugConfig;
use crate::error::{BtleplugAdapterError, Result};

/// RSSI reported when the stack has no reading (HCI "not available")
pub const RSSI_UNAVAILABLE: i32 = 127;

// ----------------------------------------------------------------------------
// Commands
// ----------------------------------------------------------------------------

#[derive(Debug)]
pub(crate) enum Command {
    Init,
    Deinit,
    ScanStart(Vec<GattUuid>),
    ScanStop,
    Connect(DeviceIdentifier),
    Disconnect,
    Read(CharacteristicRecord),
    Write(CharacteristicRecord, Vec<u8>, WriteType),
    Subscribe(CharacteristicRecord, SubscriptionKind),
}

// ----------------------------------------------------------------------------
// Conversions
// ----------------------------------------------------------------------------

/// Map btleplug characteristic properties onto core capabilities
pub fn capabilities_from(flags: CharPropFlags) -> Capabilities {
    let mut capabilities = Capabilities::empty();
    if flags.contains(CharPropFlags::READ) {
        capabilities |= Capabilities::READ;
    }
    if flags.contains(CharPropFlags::WRITE) {
        capabilities |= Capabilities::WRITE;
    }
    if flags.contains(CharPropFlags::WRITE_WITHOUT_RESPONSE) {
        capabilities |= Capabilities::WRITE_WITHOUT_RESPONSE;
    }
    if flags.contains(CharPropFlags::NOTIFY) {
        capabilities |= Capabilities::NOTIFY;
    }
    if flags.contains(CharPropFlags::INDICATE) {
        capabilities |= Capabilities::INDICATE;
    }
    capabilities
}

fn write_type_to_ble(write_type: WriteType) -> BleWriteType {
    match write_type {
        WriteType::WithResponse => BleWriteType::WithResponse,
        WriteType::WithoutResponse => BleWriteType::WithoutResponse,
    }
}

/// MAC address where the platform exposes one, the platform peripheral id
/// otherwise (CoreBluetooth hides addresses)
fn identifier_of(peripheral: &Peripheral, properties: &PeripheralProperties) -> DeviceIdentifier {
    if properties.address == BDAddr::default() {
        DeviceIdentifier::new(format!("{:?}", peripheral.id()))
    } else {
        DeviceIdentifier::new(properties.address.to_string())
    }
}

// ----------------------------------------------------------------------------
// Worker
// ----------------------------------------------------------------------------

/// State shared between the worker and the central event pump
#[derive(Clone, Default)]
struct Link {
    connected: Arc<RwLock<Option<(DeviceIdentifier, Peripheral)>>>,
    seen: Arc<RwLock<HashMap<DeviceIdentifier, Peripheral>>>,
    scanning: Arc<AtomicBool>,
    /// Forwarder of the connected peripheral's notifications
    notifications: Arc<Mutex<Option<JoinHandle<()>>>>,
}

impl Link {
    /// Stop forwarding notifications of the previous connection
    async fn stop_notifications(&self) {
        if let Some(task) = self.notifications.lock().await.take() {
            task.abort();
            debug!("Notification forwarder stopped");
        }
    }
}

pub(crate) struct Worker {
    config: BtleplugConfig,
    sink: EventSink,
    adapter: Option<Adapter>,
    link: Link,
    event_task: Option<JoinHandle<()>>,
}

impl Worker {
    pub(crate) fn new(config: BtleplugConfig, sink: EventSink) -> Self {
        Self {
            config,
            sink,
            adapter: None,
            link: Link::default(),
            event_task: None,
        }
    }

    /// Execute commands until every sender is gone
    pub(crate) async fn run(mut self, mut commands: mpsc::UnboundedReceiver<Command>) {
        while let Some(command) = commands.recv().await {
            debug!("Adapter command {:?}", command);
            self.handle(command).await;
        }
        self.shutdown().await;
        debug!("Adapter worker stopped");
    }

    async fn handle(&mut self, command: Command) {
        match command {
            Command::Init => {
                if let Err(e) = self.init().await {
                    error!("Failed to initialise BLE adapter: {}", e);
                    self.sink
                        .fault(e.fault_code().unwrap_or(ErrorCode::Unknown));
                }
            }
            Command::Deinit => self.shutdown().await,
            Command::ScanStart(filter) => {
                if let Err(e) = self.scan_start(filter).await {
                    error!("Failed to start BLE scan: {}", e);
                    // Scan start mostly fails because the radio is off
                    self.sink
                        .fault(e.fault_code().unwrap_or(ErrorCode::HardwareTurnedOff));
                }
            }
            Command::ScanStop => {
                if let Err(e) = self.scan_stop().await {
                    warn!("Failed to stop BLE scan: {}", e);
                }
            }
            Command::Connect(identifier) => {
                if let Err(e) = self.connect(&identifier).await {
                    error!("Failed to connect to {}: {}", identifier, e);
                    self.sink
                        .connection_status(identifier, ConnectionStatus::ConnectFailed);
                }
            }
            Command::Disconnect => self.disconnect().await,
            Command::Read(record) => {
                if let Err(e) = self.read(&record).await {
                    error!("Failed to read {}: {}", record.uuid, e);
                }
            }
            Command::Write(record, bytes, write_type) => {
                if let Err(e) = self.write(&record, &bytes, write_type).await {
                    error!("Failed to write {}: {}", record.uuid, e);
                }
            }
            Command::Subscribe(record, kind) => {
                if let Err(e) = self.subscribe(&record, kind).await {
                    error!("Failed to subscribe to {}: {}", record.uuid, e);
                }
            }
        }
    }

    // ------------------------------------------------------------------------
    // Lifecycle
    // ------------------------------------------------------------------------

    async fn init(&mut self) -> Result<()> {
        self.shutdown().await;

        let manager = Manager::new().await?;
        let adapters = manager.adapters().await?;
        if adapters.is_empty() {
            return Err(BtleplugAdapterError::NoAdapter);
        }
        let available = adapters.len();
        let adapter = adapters
            .into_iter()
            .nth(self.config.adapter_index)
            .ok_or(BtleplugAdapterError::AdapterIndex {
                index: self.config.adapter_index,
                available,
            })?;

        let events = adapter.events().await?;
        self.event_task = Some(tokio::spawn(pump_central_events(
            adapter.clone(),
            events,
            self.sink.clone(),
            self.link.clone(),
        )));

        match adapter.adapter_info().await {
            Ok(description) => info!("BLE adapter initialised: {}", description),
            Err(_) => info!("BLE adapter initialised"),
        }
        self.adapter = Some(adapter);
        Ok(())
    }

    async fn shutdown(&mut self) {
        if self.link.scanning.load(Ordering::SeqCst) {
            if let Err(e) = self.scan_stop().await {
                warn!("Failed to stop BLE scan: {}", e);
            }
        }
        self.disconnect().await;
        if let Some(task) = self.event_task.take() {
            task.abort();
        }
        self.link.seen.write().await.clear();
        if self.adapter.take().is_some() {
            info!("BLE adapter released");
        }
    }

    fn adapter(&self) -> Result<&Adapter> {
        self.adapter
            .as_ref()
            .ok_or(BtleplugAdapterError::NotInitialised)
    }

    // ------------------------------------------------------------------------
    // Scanning
    // ------------------------------------------------------------------------

    async fn scan_start(&mut self, filter: Vec<GattUuid>) -> Result<()> {
        let scan_filter = ScanFilter {
            services: filter.into_iter().map(Into::into).collect(),
        };
        self.adapter()?.start_scan(scan_filter).await?;
        self.link.scanning.store(true, Ordering::SeqCst);
        info!("Started BLE scanning");
        Ok(())
    }

    async fn scan_stop(&mut self) -> Result<()> {
        self.link.scanning.store(false, Ordering::SeqCst);
        self.adapter()?.stop_scan().await?;
        info!("Stopped BLE scanning");
        Ok(())
    }

    // ------------------------------------------------------------------------
    // Connection
    // ------------------------------------------------------------------------

    async fn find_peripheral(&self, identifier: &DeviceIdentifier) -> Result<Peripheral> {
        if let Some(peripheral) = self.link.seen.read().await.get(identifier) {
            return Ok(peripheral.clone());
        }
        for peripheral in self.adapter()?.peripherals().await? {
            if let Ok(Some(properties)) = peripheral.properties().await {
                if identifier_of(&peripheral, &properties) == *identifier {
                    return Ok(peripheral);
                }
            }
        }
        Err(BtleplugAdapterError::PeripheralNotFound {
            identifier: identifier.clone(),
        })
    }

    async fn connect(&mut self, identifier: &DeviceIdentifier) -> Result<()> {
        let peripheral = self.find_peripheral(identifier).await?;

        match timeout(self.config.connection_timeout(), peripheral.connect()).await {
            Ok(result) => result?,
            Err(_) => return Err(BtleplugAdapterError::ConnectionTimeout),
        }

        if let Err(e) = peripheral.discover_services().await {
            if let Err(e) = peripheral.disconnect().await {
                debug!("Disconnect after failed discovery: {}", e);
            }
            return Err(e.into());
        }

        *self.link.connected.write().await = Some((identifier.clone(), peripheral.clone()));
        info!("Connected to {}", identifier);

        self.sink
            .connection_status(identifier, ConnectionStatus::Connected);
        // btleplug does not expose the negotiated ATT MTU
        self.sink.session_mtu(None);
        for service in peripheral.services() {
            self.sink.service_discovered(service.uuid.into());
            for characteristic in &service.characteristics {
                self.sink.characteristic_discovered(
                    characteristic.service_uuid.into(),
                    characteristic.uuid.into(),
                    capabilities_from(characteristic.properties),
                );
            }
        }

        self.start_notifications(&peripheral).await
    }

    async fn start_notifications(&mut self, peripheral: &Peripheral) -> Result<()> {
        let mut notifications = peripheral.notifications().await?;
        let sink = self.sink.clone();
        let mut slot = self.link.notifications.lock().await;
        if let Some(task) = slot.take() {
            task.abort();
        }
        *slot = Some(tokio::spawn(async move {
            while let Some(data) = notifications.next().await {
                sink.value_update(data.uuid.into(), &data.value);
            }
            debug!("Notification stream ended");
        }));
        Ok(())
    }

    async fn disconnect(&mut self) {
        self.link.stop_notifications().await;
        let Some((identifier, peripheral)) = self.link.connected.write().await.take() else {
            return;
        };
        if let Err(e) = peripheral.disconnect().await {
            error!("Failed to disconnect from {}: {}", identifier, e);
        }
        info!("Disconnected from {}", identifier);
        self.sink
            .connection_status(identifier, ConnectionStatus::Disconnected);
    }

    // ------------------------------------------------------------------------
    // GATT Operations
    // ------------------------------------------------------------------------

    async fn characteristic(
        &self,
        record: &CharacteristicRecord,
    ) -> Result<(Peripheral, Characteristic)> {
        let connected = self.link.connected.read().await;
        let (_, peripheral) = connected
            .as_ref()
            .ok_or(BtleplugAdapterError::NotConnected)?;
        let uuid: uuid::Uuid = record.uuid.into();
        let service_uuid: uuid::Uuid = record.service_uuid.into();
        let characteristic = peripheral
            .characteristics()
            .into_iter()
            .find(|c| c.uuid == uuid && c.service_uuid == service_uuid)
            .ok_or(BtleplugAdapterError::CharacteristicNotFound { uuid: record.uuid })?;
        Ok((peripheral.clone(), characteristic))
    }

    async fn read(&self, record: &CharacteristicRecord) -> Result<()> {
        let (peripheral, characteristic) = self.characteristic(record).await?;
        let value = peripheral.read(&characteristic).await?;
        self.sink.value_update(record.uuid, &value);
        Ok(())
    }

    async fn write(
        &self,
        record: &CharacteristicRecord,
        bytes: &[u8],
        write_type: WriteType,
    ) -> Result<()> {
        let (peripheral, characteristic) = self.characteristic(record).await?;
        peripheral
            .write(&characteristic, bytes, write_type_to_ble(write_type))
            .await?;
        debug!("Wrote {} bytes to {}", bytes.len(), record.uuid);
        Ok(())
    }

    async fn subscribe(&self, record: &CharacteristicRecord, kind: SubscriptionKind) -> Result<()> {
        let (peripheral, characteristic) = self.characteristic(record).await?;
        // btleplug enables notifications when advertised, indications otherwise,
        // which matches the resolved kind
        peripheral.subscribe(&characteristic).await?;
        debug!("Subscribed to {} ({:?})", record.uuid, kind);
        Ok(())
    }
}

// ----------------------------------------------------------------------------
// Central Event Pump
// ----------------------------------------------------------------------------

async fn pump_central_events(
    adapter: Adapter,
    mut events: std::pin::Pin<Box<dyn futures::Stream<Item = CentralEvent> + Send>>,
    sink: EventSink,
    link: Link,
) {
    while let Some(event) = events.next().await {
        match event {
            CentralEvent::DeviceDiscovered(id) | CentralEvent::DeviceUpdated(id) => {
                if !link.scanning.load(Ordering::SeqCst) {
                    continue;
                }
                let Ok(peripheral) = adapter.peripheral(&id).await else {
                    continue;
                };
                let Ok(Some(properties)) = peripheral.properties().await else {
                    continue;
                };
                let identifier = identifier_of(&peripheral, &properties);
                link.seen
                    .write()
                    .await
                    .insert(identifier.clone(), peripheral);
                sink.scan_result(
                    properties.local_name,
                    properties.rssi.map(i32::from).unwrap_or(RSSI_UNAVAILABLE),
                    identifier,
                );
            }
            CentralEvent::DeviceDisconnected(id) => {
                let lost = {
                    let mut connected = link.connected.write().await;
                    let matches_link =
                        matches!(connected.as_ref(), Some((_, peripheral)) if peripheral.id() == id);
                    if matches_link {
                        connected.take()
                    } else {
                        None
                    }
                };
                if let Some((identifier, _)) = lost {
                    link.stop_notifications().await;
                    warn!("Lost connection to {}", identifier);
                    sink.connection_status(identifier, ConnectionStatus::Disconnected);
                }
            }
            _ => {}
        }
    }
    debug!("Central event stream ended");
}
