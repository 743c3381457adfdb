//! The exported C functions, driven through the loopback adapter
//!
//! The session and callback registry are process-wide, so every test holds
//! `SERIAL` and starts from a fresh session.

use std::ffi::CStr;
use std::os::raw::{c_char, c_int};
use std::ptr;
use std::slice;
use std::sync::{Mutex, MutexGuard, PoisonError};

use cobble::*;
use cobble_core::{Capabilities, GattUuid, LoopbackAdapter, SimulatedDevice};

// ----------------------------------------------------------------------------
// Test Utilities
// ----------------------------------------------------------------------------

const DEVICE: &str = "AA:BB:CC:DD:EE:FF";
const SERVICE: GattUuid = GattUuid::from_short(0xFFE0);
const CHAR_X: GattUuid = GattUuid::from_short(0xFFE1);
const CHAR_READ: GattUuid = GattUuid::from_short(0xFFE3);

const STATUS_INITIALISED: c_int = 1;
const STATUS_SCANNING: c_int = 2;
const STATUS_CONNECTED: c_int = 4;

static SERIAL: Mutex<()> = Mutex::new(());
static SCANS: Mutex<Vec<(Option<String>, i32, String)>> = Mutex::new(Vec::new());
static LINKS: Mutex<Vec<(String, i32)>> = Mutex::new(Vec::new());
static CHARACTERISTICS: Mutex<Vec<(String, String)>> = Mutex::new(Vec::new());
static VALUES: Mutex<Vec<(String, Vec<u8>)>> = Mutex::new(Vec::new());

fn text(ptr: *const c_char) -> String {
    unsafe { CStr::from_ptr(ptr) }.to_str().unwrap().to_string()
}

extern "C" fn on_scan(name: *const c_char, rssi: c_int, identifier: *const c_char) {
    let name = (!name.is_null()).then(|| text(name));
    SCANS.lock().unwrap().push((name, rssi, text(identifier)));
}

extern "C" fn on_link(identifier: *const c_char, status: c_int) {
    LINKS.lock().unwrap().push((text(identifier), status));
}

extern "C" fn on_characteristic(service: *const c_char, characteristic: *const c_char) {
    CHARACTERISTICS
        .lock()
        .unwrap()
        .push((text(service), text(characteristic)));
}

extern "C" fn on_value(uuid: *const c_char, data: *const u8, len: c_int) {
    let bytes = unsafe { slice::from_raw_parts(data, len as usize) }.to_vec();
    VALUES.lock().unwrap().push((text(uuid), bytes));
}

fn demo_device() -> SimulatedDevice {
    SimulatedDevice::new(DEVICE)
        .with_name("Dev-A")
        .with_rssi(-60)
        .with_characteristic(
            SERVICE,
            CHAR_X,
            Capabilities::WRITE | Capabilities::NOTIFY,
            Vec::new(),
        )
        .with_characteristic(SERVICE, CHAR_READ, Capabilities::READ, vec![0x42, 0x43])
}

/// Fresh loopback session with every callback registered
fn setup(deferred: bool) -> MutexGuard<'static, ()> {
    let guard = SERIAL.lock().unwrap_or_else(PoisonError::into_inner);
    cobble_shutdown();
    SCANS.lock().unwrap().clear();
    LINKS.lock().unwrap().clear();
    CHARACTERISTICS.lock().unwrap().clear();
    VALUES.lock().unwrap().clear();

    cobble_deferred_set(deferred);
    install_adapter(Box::new(
        LoopbackAdapter::simulated().with_device(demo_device()),
    ));
    register_scanresult_cb(Some(on_scan));
    register_connectionstatus_cb(Some(on_link));
    register_characteristicdiscovered_cb(Some(on_characteristic));
    register_updatevalue_cb(Some(on_value));
    guard
}

fn c(text: &'static [u8]) -> *const c_char {
    text.as_ptr().cast()
}

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------

#[test]
fn test_no_session_defaults() {
    let _guard = setup(false);
    cobble_shutdown();

    assert_eq!(cobble_status(), 0);
    assert_eq!(cobble_error_get(), 0);
    assert_eq!(cobble_max_writesize_get(true), 20);

    // Requests without a session are rejected without side effects
    unsafe { cobble_connect(c(b"AA:BB:CC:DD:EE:FF\0")) };
    cobble_queue_process();
    assert_eq!(cobble_status(), 0);
    assert!(LINKS.lock().unwrap().is_empty());
}

#[test]
fn test_scan_connect_and_read_immediately() {
    let _guard = setup(false);

    cobble_init();
    assert_eq!(cobble_status(), STATUS_INITIALISED);

    unsafe { cobble_scan_start(c(b"FFE0\0")) };
    assert_eq!(cobble_status(), STATUS_SCANNING);
    assert_eq!(
        *SCANS.lock().unwrap(),
        vec![(Some("Dev-A".to_string()), -60, DEVICE.to_string())]
    );

    unsafe { cobble_connect(c(b"AA:BB:CC:DD:EE:FF\0")) };
    assert_eq!(cobble_status(), STATUS_CONNECTED);
    assert_eq!(*LINKS.lock().unwrap(), vec![(DEVICE.to_string(), 1)]);
    assert_eq!(CHARACTERISTICS.lock().unwrap().len(), 2);
    assert_eq!(
        CHARACTERISTICS.lock().unwrap()[0],
        (SERVICE.to_canonical(), CHAR_X.to_canonical())
    );

    unsafe { cobble_read(c(b"FFE3\0")) };
    assert_eq!(
        *VALUES.lock().unwrap(),
        vec![(CHAR_READ.to_canonical(), vec![0x42, 0x43])]
    );

    cobble_disconnect();
    assert_eq!(cobble_status(), STATUS_INITIALISED);
    assert_eq!(LINKS.lock().unwrap()[1], (DEVICE.to_string(), 0));
}

#[test]
fn test_deferred_callbacks_wait_for_queue_process() {
    let _guard = setup(true);

    cobble_init();
    unsafe { cobble_scan_start(ptr::null()) };
    unsafe { cobble_connect(c(b"AA:BB:CC:DD:EE:FF\0")) };
    assert_eq!(cobble_status(), STATUS_CONNECTED);
    assert!(SCANS.lock().unwrap().is_empty());
    assert!(LINKS.lock().unwrap().is_empty());

    cobble_queue_process();
    assert_eq!(SCANS.lock().unwrap().len(), 1);
    assert_eq!(*LINKS.lock().unwrap(), vec![(DEVICE.to_string(), 1)]);
    assert_eq!(CHARACTERISTICS.lock().unwrap().len(), 2);
}

#[test]
fn test_subscribe_then_write_echoes_value() {
    let _guard = setup(false);
    cobble_init();
    unsafe { cobble_connect(c(b"AA:BB:CC:DD:EE:FF\0")) };

    let payload = [1u8, 2, 3];
    unsafe {
        cobble_subscribe(c(b"FFE1\0"));
        cobble_write(c(b"FFE1\0"), payload.as_ptr(), payload.len() as c_int);
    }
    assert_eq!(
        *VALUES.lock().unwrap(),
        vec![(CHAR_X.to_canonical(), payload.to_vec())]
    );

    // Oversized, negative and null writes never reach the device
    let oversized = [0u8; 21];
    unsafe {
        cobble_write(c(b"FFE1\0"), oversized.as_ptr(), oversized.len() as c_int);
        cobble_write(c(b"FFE1\0"), payload.as_ptr(), -1);
        cobble_write(c(b"FFE1\0"), ptr::null(), 3);
    }
    assert_eq!(VALUES.lock().unwrap().len(), 1);
    assert_eq!(cobble_max_writesize_get(false), 20);
}

#[test]
fn test_characteristics_get_replays_cache() {
    let _guard = setup(false);
    cobble_init();
    unsafe { cobble_connect(c(b"AA:BB:CC:DD:EE:FF\0")) };
    CHARACTERISTICS.lock().unwrap().clear();

    cobble_characteristics_get();
    let seen = CHARACTERISTICS.lock().unwrap().clone();
    assert_eq!(
        seen,
        vec![
            (SERVICE.to_canonical(), CHAR_X.to_canonical()),
            (SERVICE.to_canonical(), CHAR_READ.to_canonical()),
        ]
    );
}

#[test]
fn test_unregistered_callback_is_skipped() {
    let _guard = setup(false);
    register_scanresult_cb(None);

    cobble_init();
    unsafe { cobble_scan_start(c(b"\0")) };
    assert_eq!(cobble_status(), STATUS_SCANNING);
    assert!(SCANS.lock().unwrap().is_empty());
}

#[test]
fn test_invalid_arguments_leave_state_alone() {
    let _guard = setup(false);
    cobble_init();

    unsafe {
        cobble_scan_start(c(b"180D,not-a-uuid\0"));
        cobble_connect(ptr::null());
        cobble_read(c(b"\xff\xfe\0"));
    }
    assert_eq!(cobble_status(), STATUS_INITIALISED);
    assert!(LINKS.lock().unwrap().is_empty());
}

#[test]
fn test_shutdown_then_reinstall() {
    let _guard = setup(false);
    cobble_init();
    unsafe { cobble_connect(c(b"AA:BB:CC:DD:EE:FF\0")) };

    cobble_shutdown();
    assert_eq!(cobble_status(), 0);
    assert_eq!(LINKS.lock().unwrap().last(), Some(&(DEVICE.to_string(), 0)));

    install_adapter(Box::new(
        LoopbackAdapter::simulated().with_device(demo_device()),
    ));
    cobble_init();
    unsafe { cobble_connect(c(b"AA:BB:CC:DD:EE:FF\0")) };
    assert_eq!(cobble_status(), STATUS_CONNECTED);
}
