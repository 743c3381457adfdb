//! Command handlers for the Cobble CLI

use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use cobble_core::{
    Capabilities, Central, CharacteristicRecord, DeviceIdentifier, GattUuid,
    LoopbackAdapter, NativeAdapter, ScanResult, ServiceRecord, SimulatedDevice, Status,
    ValueUpdate, WriteType,
};
use tokio::time::{self, Instant, MissedTickBehavior};
use tracing::{debug, info, warn};

use crate::cli::Commands;
use crate::error::{CliError, Result};

/// Cadence of deferred-mode drains
pub const DRAIN_INTERVAL: Duration = Duration::from_millis(10);

/// How long `connect` scans for its target before giving up
pub const SEARCH_TIMEOUT: Duration = Duration::from_secs(10);

/// Extra wait for connection and disconnection acknowledgements
pub const LINK_TIMEOUT: Duration = Duration::from_secs(15);

/// Identifier of the peripheral served by `--simulate`
pub const DEMO_IDENTIFIER: &str = "C0:FF:EE:00:00:01";

const HEART_RATE_SERVICE: GattUuid = GattUuid::from_short(0x180D);
const HEART_RATE_MEASUREMENT: GattUuid = GattUuid::from_short(0x2A37);
const BODY_SENSOR_LOCATION: GattUuid = GattUuid::from_short(0x2A38);
const ECHO_SERVICE: GattUuid = GattUuid::from_short(0xFFE0);
const ECHO_CHARACTERISTIC: GattUuid = GattUuid::from_short(0xFFE1);

/// Loopback adapter serving a heart rate sensor with an echo characteristic
pub fn simulated_adapter() -> LoopbackAdapter {
    let demo = SimulatedDevice::new(DEMO_IDENTIFIER)
        .with_name("Cobble Demo")
        .with_rssi(-52)
        .with_mtu(185)
        .with_characteristic(
            HEART_RATE_SERVICE,
            HEART_RATE_MEASUREMENT,
            Capabilities::NOTIFY,
            vec![0x00, 72],
        )
        .with_characteristic(
            HEART_RATE_SERVICE,
            BODY_SENSOR_LOCATION,
            Capabilities::READ,
            vec![0x01],
        )
        .with_characteristic(
            ECHO_SERVICE,
            ECHO_CHARACTERISTIC,
            Capabilities::READ | Capabilities::WRITE | Capabilities::NOTIFY,
            Vec::new(),
        );
    let bystander = SimulatedDevice::new("C0:FF:EE:00:00:02")
        .with_rssi(-88)
        .with_service(GattUuid::from_short(0x180F))
        .unreachable();

    LoopbackAdapter::simulated()
        .with_device(demo)
        .with_device(bystander)
}

// ----------------------------------------------------------------------------
// Connect Plan and Report
// ----------------------------------------------------------------------------

/// What `connect` does once the link is up
#[derive(Debug, Clone)]
pub struct ConnectPlan {
    pub identifier: DeviceIdentifier,
    pub filter: Vec<GattUuid>,
    pub subscribe: Option<GattUuid>,
    pub read: Option<GattUuid>,
    pub write: Option<(GattUuid, Vec<u8>)>,
    pub linger: Duration,
}

impl ConnectPlan {
    /// Connect, discover, then disconnect straight away
    pub fn new(identifier: impl Into<DeviceIdentifier>) -> Self {
        Self {
            identifier: identifier.into(),
            filter: Vec::new(),
            subscribe: None,
            read: None,
            write: None,
            linger: Duration::ZERO,
        }
    }

    #[allow(clippy::too_many_arguments)]
    fn from_args(
        identifier: String,
        filter: Vec<String>,
        subscribe: Option<String>,
        read: Option<String>,
        write: Option<String>,
        hex_bytes: Option<String>,
        seconds: u64,
    ) -> Result<Self> {
        let write = match (write, hex_bytes) {
            (Some(uuid), Some(bytes)) => {
                Some((uuid.parse::<GattUuid>()?, hex::decode(bytes.trim())?))
            }
            _ => None,
        };
        Ok(Self {
            identifier: identifier.into(),
            filter: parse_uuids(&filter)?,
            subscribe: subscribe.map(|uuid| uuid.parse::<GattUuid>()).transpose()?,
            read: read.map(|uuid| uuid.parse::<GattUuid>()).transpose()?,
            write,
            linger: Duration::from_secs(seconds),
        })
    }
}

/// Everything observed during a `connect` session
#[derive(Debug, Clone, Default)]
pub struct ConnectReport {
    pub services: Vec<ServiceRecord>,
    pub characteristics: Vec<CharacteristicRecord>,
    pub values: Vec<ValueUpdate>,
    pub write_type: Option<WriteType>,
    pub max_write_size: usize,
    /// The peripheral dropped the link before the session ended
    pub remote_disconnect: bool,
}

// ----------------------------------------------------------------------------
// Dispatcher
// ----------------------------------------------------------------------------

/// Command dispatcher for handling CLI commands
pub struct CommandDispatcher;

impl CommandDispatcher {
    /// Execute a CLI command against a central
    pub async fn execute<A: NativeAdapter>(command: Commands, central: &Central<A>) -> Result<()> {
        match command {
            Commands::Scan { filter, seconds } => {
                let filter = parse_uuids(&filter)?;
                let seen =
                    Self::handle_scan_command(central, &filter, Duration::from_secs(seconds))
                        .await?;
                info!("Scan finished, {} device(s) seen", seen.len());
                Ok(())
            }
            Commands::Connect {
                identifier,
                filter,
                subscribe,
                read,
                write,
                hex,
                seconds,
            } => {
                let plan =
                    ConnectPlan::from_args(identifier, filter, subscribe, read, write, hex, seconds)?;
                let report = Self::handle_connect_command(central, plan).await?;
                info!(
                    "Session finished: {} service(s), {} characteristic(s), {} value(s)",
                    report.services.len(),
                    report.characteristics.len(),
                    report.values.len()
                );
                Ok(())
            }
        }
    }

    /// Scan for `duration`, printing each device the first time it is seen
    pub async fn handle_scan_command<A: NativeAdapter>(
        central: &Central<A>,
        filter: &[GattUuid],
        duration: Duration,
    ) -> Result<Vec<ScanResult>> {
        let seen = Arc::new(Mutex::new(Vec::<ScanResult>::new()));
        let known = Mutex::new(HashSet::<DeviceIdentifier>::new());
        let sink = Arc::clone(&seen);
        central.on_scan_result(move |result| {
            let first = known
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .insert(result.identifier.clone());
            if first {
                println!(
                    "{:<40} {:>4} dBm  {}",
                    result.identifier.as_str(),
                    result.rssi,
                    result.name.as_deref().unwrap_or("<unnamed>")
                );
                sink.lock()
                    .unwrap_or_else(PoisonError::into_inner)
                    .push(result);
            }
        });

        central.init()?;
        let outcome = async {
            central.scan_start(filter)?;
            pump(central, duration, |_| false).await?;
            central.scan_stop()?;
            Ok::<_, CliError>(())
        }
        .await;
        shutdown(central).await;
        outcome?;

        let results = std::mem::take(&mut *seen.lock().unwrap_or_else(PoisonError::into_inner));
        Ok(results)
    }

    /// Find, connect to and exercise one device
    pub async fn handle_connect_command<A: NativeAdapter>(
        central: &Central<A>,
        plan: ConnectPlan,
    ) -> Result<ConnectReport> {
        let found = Arc::new(AtomicBool::new(false));
        let values = Arc::new(Mutex::new(Vec::<ValueUpdate>::new()));

        let target = plan.identifier.clone();
        let flag = Arc::clone(&found);
        central.on_scan_result(move |result| {
            if result.identifier == target && !flag.swap(true, Ordering::SeqCst) {
                println!("Found {} ({} dBm)", result.identifier, result.rssi);
            }
        });
        central.on_connection_status(|identifier, status| {
            println!("{} {}", identifier, status);
        });
        central.on_service_discovered(|service| println!("  service {}", service.uuid));
        central.on_characteristic_discovered(|characteristic| {
            println!(
                "    characteristic {} {:?}",
                characteristic.uuid, characteristic.capabilities
            );
        });
        let sink = Arc::clone(&values);
        central.on_value_update(move |update| {
            match update.truncated_from {
                Some(native) => println!(
                    "  value {} = {} (truncated from {} bytes)",
                    update.characteristic_uuid,
                    hex::encode(&update.payload),
                    native
                ),
                None => println!(
                    "  value {} = {}",
                    update.characteristic_uuid,
                    hex::encode(&update.payload)
                ),
            }
            sink.lock()
                .unwrap_or_else(PoisonError::into_inner)
                .push(update);
        });

        central.init()?;
        let outcome = Self::run_session(central, &plan, &found).await;
        shutdown(central).await;
        let mut report = outcome?;
        report.values = std::mem::take(&mut *values.lock().unwrap_or_else(PoisonError::into_inner));
        Ok(report)
    }

    async fn run_session<A: NativeAdapter>(
        central: &Central<A>,
        plan: &ConnectPlan,
        found: &AtomicBool,
    ) -> Result<ConnectReport> {
        central.scan_start(&plan.filter)?;
        let seen = pump(central, SEARCH_TIMEOUT, |_| found.load(Ordering::SeqCst)).await?;
        if !seen {
            central.scan_stop()?;
            return Err(CliError::DeviceNotFound {
                identifier: plan.identifier.clone(),
            });
        }

        info!("Connecting to {}", plan.identifier);
        central.connect(&plan.identifier)?;
        pump(central, LINK_TIMEOUT, |c| c.status() != Status::Connecting).await?;
        if central.status() != Status::Connected {
            return Err(CliError::ConnectFailed {
                identifier: plan.identifier.clone(),
            });
        }

        let mut report = ConnectReport {
            services: central.services(),
            characteristics: central.characteristics(),
            max_write_size: central.max_write_size(true),
            ..ConnectReport::default()
        };
        debug!("Max write size {} bytes", report.max_write_size);

        if let Some(uuid) = &plan.subscribe {
            let kind = central.subscribe(uuid)?;
            println!("Subscribed to {} ({:?})", uuid, kind);
        }
        if let Some(uuid) = &plan.read {
            central.read(uuid)?;
        }
        if let Some((uuid, bytes)) = &plan.write {
            let write_type = central.write(uuid, bytes)?;
            println!("Wrote {} byte(s) to {} ({:?})", bytes.len(), uuid, write_type);
            report.write_type = Some(write_type);
        }

        pump(central, plan.linger, |c| c.status() != Status::Connected).await?;
        if central.status() == Status::Connected {
            central.disconnect()?;
            pump(central, LINK_TIMEOUT, |c| !c.status().has_link()).await?;
        } else {
            report.remote_disconnect = true;
        }
        Ok(report)
    }
}

// ----------------------------------------------------------------------------
// Helpers
// ----------------------------------------------------------------------------

fn parse_uuids(values: &[String]) -> Result<Vec<GattUuid>> {
    values
        .iter()
        .map(|value| value.parse::<GattUuid>().map_err(CliError::from))
        .collect()
}

/// Tick every [`DRAIN_INTERVAL`], draining deferred events, until `done`
/// holds or `duration` elapses. Returns whether `done` was reached.
async fn pump<A, F>(central: &Central<A>, duration: Duration, mut done: F) -> Result<bool>
where
    A: NativeAdapter,
    F: FnMut(&Central<A>) -> bool,
{
    let deadline = Instant::now() + duration;
    let mut ticker = time::interval(DRAIN_INTERVAL);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    loop {
        ticker.tick().await;
        let report = central.drain();
        if !report.is_empty() {
            debug!(
                "Drained {} event(s), {} discarded, {} dropped",
                report.dispatched(),
                report.discarded(),
                report.dropped()
            );
        }
        if central.status() == Status::Error {
            return Err(CliError::Fault(central.error_code()));
        }
        if done(central) {
            return Ok(true);
        }
        if Instant::now() >= deadline {
            return Ok(false);
        }
    }
}

/// Tear the session down and flush whatever is still queued
async fn shutdown<A: NativeAdapter>(central: &Central<A>) {
    if let Err(e) = central.deinit() {
        warn!("Deinit failed: {}", e);
    }
    central.drain();
}

#[cfg(test)]
mod tests {
    use super::*;
    use cobble_core::{CobbleConfig, DeliveryMode, ErrorCode};

    fn central(delivery: DeliveryMode) -> Central<LoopbackAdapter> {
        Central::new(
            CobbleConfig::new().with_delivery(delivery),
            simulated_adapter(),
        )
    }

    fn plan() -> ConnectPlan {
        ConnectPlan::new(DEMO_IDENTIFIER)
    }

    #[tokio::test]
    async fn test_scan_lists_each_device_once() {
        for delivery in [DeliveryMode::Immediate, DeliveryMode::Deferred] {
            let central = central(delivery);
            let seen = CommandDispatcher::handle_scan_command(&central, &[], Duration::ZERO)
                .await
                .unwrap();
            assert_eq!(seen.len(), 2);
            assert_eq!(seen[0].identifier.as_str(), DEMO_IDENTIFIER);
            assert_eq!(seen[0].name.as_deref(), Some("Cobble Demo"));
            assert_eq!(central.status(), Status::Uninitialised);
        }
    }

    #[tokio::test]
    async fn test_scan_filter() {
        let central = central(DeliveryMode::Immediate);
        let seen = CommandDispatcher::handle_scan_command(
            &central,
            &[GattUuid::from_short(0x180F)],
            Duration::ZERO,
        )
        .await
        .unwrap();
        assert_eq!(seen.len(), 1);
        assert_eq!(seen[0].identifier.as_str(), "C0:FF:EE:00:00:02");
    }

    #[tokio::test]
    async fn test_scan_reports_fault() {
        let central = central(DeliveryMode::Immediate);
        central.adapter().fail_scan_with(ErrorCode::HardwareTurnedOff);
        let result = CommandDispatcher::handle_scan_command(&central, &[], Duration::ZERO).await;
        assert!(matches!(
            result,
            Err(CliError::Fault(ErrorCode::HardwareTurnedOff))
        ));
    }

    #[tokio::test]
    async fn test_connect_session() {
        for delivery in [DeliveryMode::Immediate, DeliveryMode::Deferred] {
            let central = central(delivery);
            let plan = ConnectPlan {
                subscribe: Some(ECHO_CHARACTERISTIC),
                read: Some(BODY_SENSOR_LOCATION),
                write: Some((ECHO_CHARACTERISTIC, vec![0x01, 0x02])),
                ..plan()
            };
            let report = CommandDispatcher::handle_connect_command(&central, plan)
                .await
                .unwrap();

            assert_eq!(report.services.len(), 2);
            assert_eq!(report.characteristics.len(), 3);
            assert_eq!(report.max_write_size, 182);
            assert_eq!(report.write_type, Some(WriteType::WithResponse));
            assert!(!report.remote_disconnect);

            let payloads: Vec<_> = report.values.iter().map(|v| v.payload.clone()).collect();
            assert_eq!(payloads, vec![vec![0x01], vec![0x01, 0x02]]);
            assert_eq!(central.status(), Status::Uninitialised);
            assert!(central.services().is_empty());
        }
    }

    #[tokio::test]
    async fn test_connect_unreachable_device() {
        let central = central(DeliveryMode::Immediate);
        let plan = ConnectPlan {
            identifier: "C0:FF:EE:00:00:02".into(),
            ..plan()
        };
        let result = CommandDispatcher::handle_connect_command(&central, plan).await;
        assert!(matches!(result, Err(CliError::ConnectFailed { .. })));
        assert_eq!(central.status(), Status::Uninitialised);
    }

    #[tokio::test]
    async fn test_connect_rejects_unknown_characteristic() {
        let central = central(DeliveryMode::Immediate);
        let plan = ConnectPlan {
            read: Some(GattUuid::from_short(0x2A19)),
            ..plan()
        };
        let result = CommandDispatcher::handle_connect_command(&central, plan).await;
        assert!(matches!(
            result,
            Err(CliError::Core(cobble_core::CobbleError::CharacteristicNotFound { .. }))
        ));
    }

    #[test]
    fn test_plan_from_args() {
        let plan = ConnectPlan::from_args(
            DEMO_IDENTIFIER.into(),
            vec!["180D".into()],
            None,
            Some("2a38".into()),
            Some("FFE1".into()),
            Some("0a0B".into()),
            3,
        )
        .unwrap();
        assert_eq!(plan.filter, vec![HEART_RATE_SERVICE]);
        assert_eq!(plan.read, Some(BODY_SENSOR_LOCATION));
        assert_eq!(plan.write, Some((ECHO_CHARACTERISTIC, vec![0x0A, 0x0B])));
        assert_eq!(plan.linger, Duration::from_secs(3));

        let bad_hex = ConnectPlan::from_args(
            DEMO_IDENTIFIER.into(),
            Vec::new(),
            None,
            None,
            Some("FFE1".into()),
            Some("xyz".into()),
            3,
        );
        assert!(matches!(bad_hex, Err(CliError::HexDecoding(_))));
    }
}
