//! Process-wide session and callback registry behind the C surface

use std::ffi::CString;
use std::os::raw::{c_char, c_int};
use std::ptr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, PoisonError, RwLock};

use cobble_btleplug::{BtleplugAdapter, BtleplugConfig};
use cobble_core::{
    Central, CharacteristicRecord, CobbleConfig, DeliveryMode, DeviceIdentifier, EventKind,
    NativeAdapter,
};
use tracing::{info, warn};

use crate::error::{FfiError, Result};

pub type FfiCentral = Central<Box<dyn NativeAdapter>>;

// ----------------------------------------------------------------------------
// Callback Types
// ----------------------------------------------------------------------------

/// `(name or NULL, rssi, identifier)`
pub type ScanResultCallback = extern "C" fn(*const c_char, c_int, *const c_char);
/// `(service uuid, characteristic uuid)`
pub type CharacteristicDiscoveredCallback = extern "C" fn(*const c_char, *const c_char);
/// `(characteristic uuid, bytes, length)`
pub type UpdateValueCallback = extern "C" fn(*const c_char, *const u8, c_int);
/// `(identifier, 0 disconnected | 1 connected | 2 connect failed)`
pub type ConnectionStatusCallback = extern "C" fn(*const c_char, c_int);

#[derive(Clone, Copy)]
struct Callbacks {
    scan_result: Option<ScanResultCallback>,
    characteristic_discovered: Option<CharacteristicDiscoveredCallback>,
    update_value: Option<UpdateValueCallback>,
    connection_status: Option<ConnectionStatusCallback>,
}

impl Callbacks {
    const EMPTY: Self = Self {
        scan_result: None,
        characteristic_discovered: None,
        update_value: None,
        connection_status: None,
    };
}

// ----------------------------------------------------------------------------
// Globals
// ----------------------------------------------------------------------------

static SESSION: RwLock<Option<Arc<FfiCentral>>> = RwLock::new(None);
static CALLBACKS: RwLock<Callbacks> = RwLock::new(Callbacks::EMPTY);
static DEFERRED: AtomicBool = AtomicBool::new(false);

/// The live session, if any. The registry lock is released before returning.
pub fn current() -> Option<Arc<FfiCentral>> {
    SESSION
        .read()
        .unwrap_or_else(PoisonError::into_inner)
        .clone()
}

pub fn require() -> Result<Arc<FfiCentral>> {
    current().ok_or(FfiError::NotInitialised)
}

/// Session for `cobble_init`, creating the desktop adapter on first use
pub fn get_or_create() -> Result<Arc<FfiCentral>> {
    let mut slot = SESSION.write().unwrap_or_else(PoisonError::into_inner);
    if let Some(central) = slot.as_ref() {
        return Ok(central.clone());
    }
    let adapter = BtleplugAdapter::new(BtleplugConfig::default())?;
    let central = build(Box::new(adapter));
    *slot = Some(central.clone());
    Ok(central)
}

/// Replace the session with one driving `adapter`; the previous session is
/// deinitialised first
pub fn install(adapter: Box<dyn NativeAdapter>) -> Arc<FfiCentral> {
    let central = build(adapter);
    let previous = SESSION
        .write()
        .unwrap_or_else(PoisonError::into_inner)
        .replace(central.clone());
    if let Some(previous) = previous {
        release(previous);
    }
    central
}

/// Tear the session down. The next `cobble_init` starts a fresh one.
pub fn shutdown() {
    let previous = SESSION.write().unwrap_or_else(PoisonError::into_inner).take();
    match previous {
        Some(previous) => release(previous),
        None => info!("Shutdown without a session"),
    }
}

fn release(central: Arc<FfiCentral>) {
    if let Err(err) = central.deinit() {
        warn!("Deinit during shutdown failed: {}", err);
    }
}

fn build(adapter: Box<dyn NativeAdapter>) -> Arc<FfiCentral> {
    let delivery = if DEFERRED.load(Ordering::SeqCst) {
        DeliveryMode::Deferred
    } else {
        DeliveryMode::Immediate
    };
    let central = Arc::new(Central::new(
        CobbleConfig::new().with_delivery(delivery),
        adapter,
    ));
    let callbacks = *CALLBACKS.read().unwrap_or_else(PoisonError::into_inner);
    install_scan_result(&central, callbacks.scan_result);
    install_characteristic_discovered(&central, callbacks.characteristic_discovered);
    install_update_value(&central, callbacks.update_value);
    install_connection_status(&central, callbacks.connection_status);
    central
}

/// Delivery mode for sessions created from now on
pub fn set_deferred(deferred: bool) {
    DEFERRED.store(deferred, Ordering::SeqCst);
    if current().is_some() {
        warn!("Delivery mode change takes effect after cobble_shutdown");
    }
}

// ----------------------------------------------------------------------------
// Registration
// ----------------------------------------------------------------------------

fn callbacks_mut() -> std::sync::RwLockWriteGuard<'static, Callbacks> {
    CALLBACKS.write().unwrap_or_else(PoisonError::into_inner)
}

pub fn register_scan_result(callback: Option<ScanResultCallback>) {
    callbacks_mut().scan_result = callback;
    if let Some(central) = current() {
        install_scan_result(&central, callback);
    }
}

pub fn register_characteristic_discovered(callback: Option<CharacteristicDiscoveredCallback>) {
    callbacks_mut().characteristic_discovered = callback;
    if let Some(central) = current() {
        install_characteristic_discovered(&central, callback);
    }
}

pub fn register_update_value(callback: Option<UpdateValueCallback>) {
    callbacks_mut().update_value = callback;
    if let Some(central) = current() {
        install_update_value(&central, callback);
    }
}

pub fn register_connection_status(callback: Option<ConnectionStatusCallback>) {
    callbacks_mut().connection_status = callback;
    if let Some(central) = current() {
        install_connection_status(&central, callback);
    }
}

// ----------------------------------------------------------------------------
// Handler Installation
// ----------------------------------------------------------------------------

/// Strings handed to C; interior NULs cannot be represented
fn c_string(text: &str) -> Option<CString> {
    match CString::new(text) {
        Ok(text) => Some(text),
        Err(err) => {
            warn!("Dropping callback argument with interior NUL: {}", err);
            None
        }
    }
}

fn install_scan_result(central: &FfiCentral, callback: Option<ScanResultCallback>) {
    let Some(callback) = callback else {
        central.clear_handler(EventKind::ScanResult);
        return;
    };
    central.on_scan_result(move |result| {
        let Some(identifier) = c_string(result.identifier.as_str()) else {
            return;
        };
        let name = result.name.as_deref().and_then(c_string);
        let name_ptr = name.as_ref().map_or(ptr::null(), |name| name.as_ptr());
        callback(name_ptr, result.rssi, identifier.as_ptr());
    });
}

fn install_characteristic_discovered(
    central: &FfiCentral,
    callback: Option<CharacteristicDiscoveredCallback>,
) {
    let Some(callback) = callback else {
        central.clear_handler(EventKind::CharacteristicDiscovered);
        return;
    };
    central.on_characteristic_discovered(move |record| emit_characteristic(callback, &record));
}

pub fn emit_characteristic(
    callback: CharacteristicDiscoveredCallback,
    record: &CharacteristicRecord,
) {
    let (Some(service), Some(characteristic)) = (
        c_string(&record.service_uuid.to_canonical()),
        c_string(&record.uuid.to_canonical()),
    ) else {
        return;
    };
    callback(service.as_ptr(), characteristic.as_ptr());
}

fn install_update_value(central: &FfiCentral, callback: Option<UpdateValueCallback>) {
    let Some(callback) = callback else {
        central.clear_handler(EventKind::ValueUpdate);
        return;
    };
    central.on_value_update(move |update| {
        let Some(uuid) = c_string(&update.characteristic_uuid.to_canonical()) else {
            return;
        };
        let len = c_int::try_from(update.payload.len()).unwrap_or(c_int::MAX);
        callback(uuid.as_ptr(), update.payload.as_ptr(), len);
    });
}

fn install_connection_status(central: &FfiCentral, callback: Option<ConnectionStatusCallback>) {
    let Some(callback) = callback else {
        central.clear_handler(EventKind::ConnectionStatus);
        return;
    };
    central.on_connection_status(move |identifier: DeviceIdentifier, status| {
        let Some(identifier) = c_string(identifier.as_str()) else {
            return;
        };
        callback(identifier.as_ptr(), status as c_int);
    });
}

/// Registered characteristic callback, for `cobble_characteristics_get`
pub fn characteristic_callback() -> Option<CharacteristicDiscoveredCallback> {
    CALLBACKS
        .read()
        .unwrap_or_else(PoisonError::into_inner)
        .characteristic_discovered
}
