//! Property-based tests for the lifecycle state machine and the facade
//!
//! Random trigger sequences must only ever produce transitions from the
//! lifecycle table, refused triggers must leave the machine untouched, and the
//! discovery cache must be empty whenever no link exists.

use cobble_core::{
    Capabilities, Central, CobbleConfig, ConnectionStatus, DeliveryMode, DeviceIdentifier,
    ErrorCode, GattUuid, LoopbackAdapter, StateMachine, Status, Trigger, ValueUpdate,
};
use proptest::prelude::*;

// ----------------------------------------------------------------------------
// Strategies
// ----------------------------------------------------------------------------

fn arb_identifier() -> impl Strategy<Value = DeviceIdentifier> {
    prop_oneof![Just("AA:BB:CC:DD:EE:FF"), Just("11:22:33:44:55:66")].prop_map(DeviceIdentifier::from)
}

fn arb_link() -> impl Strategy<Value = ConnectionStatus> {
    prop_oneof![
        Just(ConnectionStatus::Connected),
        Just(ConnectionStatus::Disconnected),
        Just(ConnectionStatus::ConnectFailed),
    ]
}

fn arb_error_code() -> impl Strategy<Value = ErrorCode> {
    prop_oneof![
        Just(ErrorCode::None),
        Just(ErrorCode::HardwareUnsupported),
        Just(ErrorCode::HardwareTurnedOff),
        Just(ErrorCode::PermissionsNotGranted),
        Just(ErrorCode::Unknown),
    ]
}

fn arb_trigger() -> impl Strategy<Value = Trigger> {
    prop_oneof![
        Just(Trigger::Init),
        Just(Trigger::Deinit),
        Just(Trigger::ScanStart),
        Just(Trigger::ScanStop),
        arb_identifier().prop_map(Trigger::Connect),
        Just(Trigger::Disconnect),
        (arb_identifier(), arb_link())
            .prop_map(|(identifier, status)| Trigger::Link { identifier, status }),
        arb_error_code().prop_map(Trigger::Fault),
    ]
}

/// Every status change the lifecycle allows
fn allowed(from: Status, to: Status) -> bool {
    use Status::*;
    if from == to || to == Error || to == Uninitialised {
        return true;
    }
    matches!(
        (from, to),
        (Uninitialised | Error, Initialised)
            | (Initialised, Scanning)
            | (Scanning, Initialised)
            | (Initialised | Scanning, Connecting)
            | (Connecting, Connected)
            | (Connecting | Connected, Initialised)
    )
}

/// Facade-level actions mixed with adapter reports
#[derive(Debug, Clone)]
enum Action {
    Init,
    Deinit,
    ScanStart,
    ScanStop,
    Connect,
    Disconnect,
    AdapterLink(ConnectionStatus),
    AdapterCharacteristic(u16),
    AdapterFault(ErrorCode),
    AdapterMtu(Option<u16>),
}

fn arb_action() -> impl Strategy<Value = Action> {
    prop_oneof![
        Just(Action::Init),
        Just(Action::Deinit),
        Just(Action::ScanStart),
        Just(Action::ScanStop),
        Just(Action::Connect),
        Just(Action::Disconnect),
        arb_link().prop_map(Action::AdapterLink),
        (0x2A00u16..0x2A10).prop_map(Action::AdapterCharacteristic),
        arb_error_code().prop_map(Action::AdapterFault),
        proptest::option::of(23u16..517).prop_map(Action::AdapterMtu),
    ]
}

// ----------------------------------------------------------------------------
// Properties
// ----------------------------------------------------------------------------

proptest! {
    /// Property: every accepted trigger follows the lifecycle table
    #[test]
    fn transitions_stay_in_table(triggers in prop::collection::vec(arb_trigger(), 0..64)) {
        let mut machine = StateMachine::new();
        for trigger in triggers {
            let before = machine.clone();
            let reported = match &trigger {
                Trigger::Link { identifier, .. } => Some(identifier.clone()),
                _ => None,
            };
            match machine.apply(trigger) {
                Ok(transition) => {
                    // Accepted link reports always name the device being connected
                    if let (Some(reported), Some(target)) = (&reported, before.target()) {
                        prop_assert_eq!(reported, target);
                    }
                    prop_assert_eq!(transition.from, before.status());
                    prop_assert_eq!(transition.to, machine.status());
                    prop_assert!(allowed(transition.from, transition.to),
                        "{} -> {} is not in the table", transition.from, transition.to);
                }
                Err(_) => {
                    prop_assert_eq!(machine.status(), before.status());
                    prop_assert_eq!(machine.error_code(), before.error_code());
                    prop_assert_eq!(machine.target(), before.target());
                }
            }

            // Error code is only meaningful in the error state
            prop_assert_eq!(
                machine.error_code() != ErrorCode::None,
                machine.status() == Status::Error
            );
            // A target exists only while a link is pending or up
            if machine.target().is_some() {
                prop_assert!(machine.status().has_link());
            }
            if machine.status().has_link() {
                prop_assert!(machine.target().is_some());
            }
        }
    }

    /// Property: the facade never keeps discovery results without a link
    #[test]
    fn cache_empty_without_link(actions in prop::collection::vec(arb_action(), 0..64)) {
        let central = Central::new(
            CobbleConfig::new().with_delivery(DeliveryMode::Deferred),
            LoopbackAdapter::manual(),
        );
        let sink = central.adapter().sink().unwrap();
        let service = GattUuid::from_short(0x180D);

        for action in actions {
            let disconnecting = matches!(action, Action::Disconnect);
            let result = match action {
                Action::Init => central.init(),
                Action::Deinit => central.deinit(),
                Action::ScanStart => central.scan_start(&[]),
                Action::ScanStop => central.scan_stop(),
                Action::Connect => central.connect("AA:BB:CC:DD:EE:FF"),
                Action::Disconnect => central.disconnect(),
                Action::AdapterLink(status) => {
                    sink.connection_status("AA:BB:CC:DD:EE:FF", status);
                    Ok(())
                }
                Action::AdapterCharacteristic(short) => {
                    sink.characteristic_discovered(
                        service,
                        GattUuid::from_short(u32::from(short)),
                        Capabilities::READ | Capabilities::NOTIFY,
                    );
                    Ok(())
                }
                Action::AdapterFault(code) => {
                    sink.fault(code);
                    Ok(())
                }
                Action::AdapterMtu(mtu) => {
                    sink.session_mtu(mtu);
                    Ok(())
                }
            };

            if !central.status().has_link() || (disconnecting && result.is_ok()) {
                prop_assert!(central.characteristics().is_empty());
                prop_assert!(central.services().is_empty());
                prop_assert_eq!(central.max_write_size(true), 20);
            }
            // Owning services are always present
            let services = central.services();
            for record in central.characteristics() {
                prop_assert!(services.iter().any(|s| s.uuid == record.service_uuid));
            }
            central.drain();
        }
    }

    /// Property: payloads are bounded to 256 bytes and flagged when cut
    #[test]
    fn value_updates_are_bounded(payload in prop::collection::vec(any::<u8>(), 0..600)) {
        let update = ValueUpdate::bounded(GattUuid::from_short(0x2A37), &payload, 256);
        prop_assert_eq!(update.payload.len(), payload.len().min(256));
        prop_assert_eq!(&update.payload[..], &payload[..update.payload.len()]);
        prop_assert_eq!(update.is_truncated(), payload.len() > 256);
        if let Some(original) = update.truncated_from {
            prop_assert_eq!(original, payload.len());
        }
    }
}
