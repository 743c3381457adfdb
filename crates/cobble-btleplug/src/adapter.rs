//! [`NativeAdapter`] implementation over btleplug

use cobble_core::{
    AdapterCapabilities, CharacteristicRecord, DeviceIdentifier, EventSink, GattUuid,
    NativeAdapter, SubscriptionKind, WriteType,
};
use tokio::runtime::{Builder, Handle, Runtime};
use tokio::sync::mpsc;
use tracing::{debug, warn};

use crate::config::BtleplugConfig;
use crate::error::Result;
use crate::worker::{Command, Worker};

// ----------------------------------------------------------------------------
// Adapter
// ----------------------------------------------------------------------------

/// Desktop BLE adapter (BlueZ, CoreBluetooth, WinRT)
///
/// Requests are queued to a worker task on a tokio runtime: the caller's
/// runtime when created inside one, otherwise a private runtime owned by the
/// adapter.
pub struct BtleplugAdapter {
    config: BtleplugConfig,
    handle: Handle,
    commands: Option<mpsc::UnboundedSender<Command>>,
    // Keeps the private runtime alive; declared last so the sender drops first
    _runtime: Option<Runtime>,
}

impl BtleplugAdapter {
    pub fn new(config: BtleplugConfig) -> Result<Self> {
        if let Ok(handle) = Handle::try_current() {
            return Ok(Self::with_handle(config, handle));
        }
        let runtime = Builder::new_multi_thread()
            .worker_threads(2)
            .thread_name("cobble-btleplug")
            .enable_all()
            .build()?;
        Ok(Self {
            config,
            handle: runtime.handle().clone(),
            commands: None,
            _runtime: Some(runtime),
        })
    }

    /// Run the worker on an existing runtime
    pub fn with_handle(config: BtleplugConfig, handle: Handle) -> Self {
        Self {
            config,
            handle,
            commands: None,
            _runtime: None,
        }
    }

    pub fn config(&self) -> &BtleplugConfig {
        &self.config
    }

    fn send(&self, command: Command) {
        match &self.commands {
            Some(commands) => {
                if commands.send(command).is_err() {
                    warn!("Adapter worker has stopped; request dropped");
                }
            }
            None => warn!("Adapter used before being attached; request dropped"),
        }
    }
}

impl NativeAdapter for BtleplugAdapter {
    fn attach(&mut self, sink: EventSink) {
        let (tx, rx) = mpsc::unbounded_channel();
        let worker = Worker::new(self.config.clone(), sink);
        self.handle.spawn(worker.run(rx));
        self.commands = Some(tx);
        debug!("btleplug adapter attached");
    }

    fn capabilities(&self) -> AdapterCapabilities {
        AdapterCapabilities {
            requires_service_filter: self.config.require_service_filter,
        }
    }

    fn init(&self) {
        self.send(Command::Init);
    }

    fn deinit(&self) {
        self.send(Command::Deinit);
    }

    fn scan_start(&self, filter: &[GattUuid]) {
        self.send(Command::ScanStart(filter.to_vec()));
    }

    fn scan_stop(&self) {
        self.send(Command::ScanStop);
    }

    fn connect(&self, identifier: &DeviceIdentifier) {
        self.send(Command::Connect(identifier.clone()));
    }

    fn disconnect(&self) {
        self.send(Command::Disconnect);
    }

    fn read(&self, characteristic: &CharacteristicRecord) {
        self.send(Command::Read(characteristic.clone()));
    }

    fn write(&self, characteristic: &CharacteristicRecord, bytes: &[u8], write_type: WriteType) {
        self.send(Command::Write(
            characteristic.clone(),
            bytes.to_vec(),
            write_type,
        ));
    }

    fn subscribe(&self, characteristic: &CharacteristicRecord, kind: SubscriptionKind) {
        self.send(Command::Subscribe(characteristic.clone(), kind));
    }
}

impl std::fmt::Debug for BtleplugAdapter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BtleplugAdapter")
            .field("config", &self.config)
            .field("attached", &self.commands.is_some())
            .field("owns_runtime", &self._runtime.is_some())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_owns_runtime_outside_tokio() {
        let adapter = BtleplugAdapter::new(BtleplugConfig::default()).unwrap();
        assert!(adapter._runtime.is_some());
        // Requests before attach are dropped, not panics
        adapter.scan_stop();
    }

    #[tokio::test]
    async fn test_uses_ambient_runtime() {
        let mut adapter = BtleplugAdapter::new(BtleplugConfig::default()).unwrap();
        assert!(adapter._runtime.is_none());
        adapter.attach(EventSink::detached());
        adapter.scan_stop();
        assert!(adapter.commands.is_some());
    }

    #[test]
    fn test_capabilities_follow_config() {
        let config = BtleplugConfig::new().with_require_service_filter(true);
        let adapter = BtleplugAdapter::new(config).unwrap();
        assert!(adapter.capabilities().requires_service_filter);
    }
}
