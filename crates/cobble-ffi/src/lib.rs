//! Cobble C bindings
//!
//! Exposes one process-wide [`Central`](cobble_core::Central) session through
//! the flat C surface declared in `include/cobble.h`. Requests never return a
//! result: rejected calls are logged and the outcome is read back through
//! `cobble_status()` / `cobble_error_get()` and the registered callbacks.
//!
//! Callbacks run on the adapter's worker thread unless `cobble_deferred_set(true)`
//! was called before `cobble_init`, in which case they run inside
//! `cobble_queue_process` on the caller's thread. Strings passed to callbacks
//! are only valid for the duration of the call.

use std::ffi::CStr;
use std::os::raw::{c_char, c_int};
use std::slice;

use cobble_core::{GattUuid, NativeAdapter, Status};
use tracing::{debug, warn};

mod error;
mod session;

pub use error::{FfiError, Result};
pub use session::{
    CharacteristicDiscoveredCallback, ConnectionStatusCallback, ScanResultCallback,
    UpdateValueCallback,
};

// ----------------------------------------------------------------------------
// Argument Helpers
// ----------------------------------------------------------------------------

/// # Safety
///
/// `text` must be NULL or point to a NUL-terminated string that outlives `'a`.
unsafe fn optional_str<'a>(text: *const c_char) -> Result<Option<&'a str>> {
    if text.is_null() {
        return Ok(None);
    }
    Ok(Some(CStr::from_ptr(text).to_str()?))
}

/// # Safety
///
/// Same contract as [`optional_str`].
unsafe fn required_str<'a>(text: *const c_char, argument: &'static str) -> Result<&'a str> {
    optional_str(text)?.ok_or(FfiError::NullPointer { argument })
}

/// Comma-separated service list; blank entries are ignored
fn parse_filter(list: Option<&str>) -> Result<Vec<GattUuid>> {
    let Some(list) = list else {
        return Ok(Vec::new());
    };
    list.split(',')
        .map(str::trim)
        .filter(|entry| !entry.is_empty())
        .map(|entry| Ok(entry.parse::<GattUuid>()?))
        .collect()
}

fn report(operation: &str, result: Result<()>) {
    match result {
        Ok(()) => debug!("{} accepted", operation),
        Err(err) => warn!("{} rejected: {}", operation, err),
    }
}

/// Route a session to `adapter` instead of the desktop stack
///
/// Used by embedders that bring their own platform adapter, and by tests.
pub fn install_adapter(adapter: Box<dyn NativeAdapter>) {
    session::install(adapter);
}

// ----------------------------------------------------------------------------
// Setup
// ----------------------------------------------------------------------------

/// Install a stderr log subscriber. Safe to call more than once.
#[no_mangle]
pub extern "C" fn cobble_log_init(verbose: bool) {
    let level = if verbose {
        tracing::Level::DEBUG
    } else {
        tracing::Level::INFO
    };
    let installed = tracing_subscriber::fmt()
        .with_max_level(level)
        .with_target(false)
        .with_writer(std::io::stderr)
        .try_init();
    if installed.is_err() {
        debug!("Log subscriber already installed");
    }
}

/// Queue events for `cobble_queue_process` instead of calling back immediately.
/// Applies to sessions created after the call.
#[no_mangle]
pub extern "C" fn cobble_deferred_set(deferred: bool) {
    session::set_deferred(deferred);
}

#[no_mangle]
pub extern "C" fn register_scanresult_cb(callback: Option<ScanResultCallback>) {
    session::register_scan_result(callback);
}

#[no_mangle]
pub extern "C" fn register_characteristicdiscovered_cb(
    callback: Option<CharacteristicDiscoveredCallback>,
) {
    session::register_characteristic_discovered(callback);
}

#[no_mangle]
pub extern "C" fn register_updatevalue_cb(callback: Option<UpdateValueCallback>) {
    session::register_update_value(callback);
}

#[no_mangle]
pub extern "C" fn register_connectionstatus_cb(callback: Option<ConnectionStatusCallback>) {
    session::register_connection_status(callback);
}

// ----------------------------------------------------------------------------
// Lifecycle
// ----------------------------------------------------------------------------

#[no_mangle]
pub extern "C" fn cobble_init() {
    report(
        "cobble_init",
        session::get_or_create().and_then(|central| Ok(central.init()?)),
    );
}

#[no_mangle]
pub extern "C" fn cobble_deinit() {
    report(
        "cobble_deinit",
        session::require().and_then(|central| Ok(central.deinit()?)),
    );
}

/// Deinitialise and drop the session
#[no_mangle]
pub extern "C" fn cobble_shutdown() {
    session::shutdown();
}

// ----------------------------------------------------------------------------
// Scanning and Connection
// ----------------------------------------------------------------------------

/// Start scanning for devices offering any of the comma-separated services.
///
/// # Safety
///
/// `service_uuids` must be NULL (no filter) or a valid NUL-terminated string.
#[no_mangle]
pub unsafe extern "C" fn cobble_scan_start(service_uuids: *const c_char) {
    let result = optional_str(service_uuids).and_then(|list| {
        let filter = parse_filter(list)?;
        Ok(session::require()?.scan_start(&filter)?)
    });
    report("cobble_scan_start", result);
}

#[no_mangle]
pub extern "C" fn cobble_scan_stop() {
    report(
        "cobble_scan_stop",
        session::require().and_then(|central| Ok(central.scan_stop()?)),
    );
}

/// # Safety
///
/// `identifier` must be a valid NUL-terminated string.
#[no_mangle]
pub unsafe extern "C" fn cobble_connect(identifier: *const c_char) {
    let result = required_str(identifier, "identifier")
        .and_then(|identifier| Ok(session::require()?.connect(identifier)?));
    report("cobble_connect", result);
}

#[no_mangle]
pub extern "C" fn cobble_disconnect() {
    report(
        "cobble_disconnect",
        session::require().and_then(|central| Ok(central.disconnect()?)),
    );
}

// ----------------------------------------------------------------------------
// GATT
// ----------------------------------------------------------------------------

/// Replay every known characteristic to the characteristic callback
#[no_mangle]
pub extern "C" fn cobble_characteristics_get() {
    let Some(central) = session::current() else {
        warn!("cobble_characteristics_get rejected: {}", FfiError::NotInitialised);
        return;
    };
    let Some(callback) = session::characteristic_callback() else {
        debug!("No characteristic callback registered");
        return;
    };
    for record in central.characteristics() {
        session::emit_characteristic(callback, &record);
    }
}

/// # Safety
///
/// `uuid` must be a valid NUL-terminated string.
#[no_mangle]
pub unsafe extern "C" fn cobble_subscribe(uuid: *const c_char) {
    let result = required_str(uuid, "uuid").and_then(|uuid| {
        let uuid = uuid.parse::<GattUuid>()?;
        session::require()?.subscribe(&uuid)?;
        Ok(())
    });
    report("cobble_subscribe", result);
}

/// # Safety
///
/// `uuid` must be a valid NUL-terminated string.
#[no_mangle]
pub unsafe extern "C" fn cobble_read(uuid: *const c_char) {
    let result = required_str(uuid, "uuid").and_then(|uuid| {
        let uuid = uuid.parse::<GattUuid>()?;
        Ok(session::require()?.read(&uuid)?)
    });
    report("cobble_read", result);
}

/// # Safety
///
/// `uuid` must be a valid NUL-terminated string and `data` must point to `len`
/// readable bytes (it may be NULL when `len` is 0).
#[no_mangle]
pub unsafe extern "C" fn cobble_write(uuid: *const c_char, data: *const u8, len: c_int) {
    let result = required_str(uuid, "uuid").and_then(|uuid| {
        let uuid = uuid.parse::<GattUuid>()?;
        let len = usize::try_from(len).map_err(|_| FfiError::InvalidLength { len })?;
        let bytes = match (data.is_null(), len) {
            (_, 0) => &[][..],
            (true, _) => return Err(FfiError::NullPointer { argument: "data" }),
            (false, len) => slice::from_raw_parts(data, len),
        };
        session::require()?.write(&uuid, bytes)?;
        Ok(())
    });
    report("cobble_write", result);
}

/// Largest write accepted on the current connection; 20 without a session
#[no_mangle]
pub extern "C" fn cobble_max_writesize_get(with_response: bool) -> c_int {
    let size = match session::current() {
        Some(central) => central.max_write_size(with_response),
        None => cobble_core::config::DEFAULT_WRITE_SIZE,
    };
    c_int::try_from(size).unwrap_or(c_int::MAX)
}

// ----------------------------------------------------------------------------
// Status and Delivery
// ----------------------------------------------------------------------------

/// Current `CobbleStatus`; `Uninitialised` (0) without a session
#[no_mangle]
pub extern "C" fn cobble_status() -> c_int {
    let status = session::current().map_or(Status::Uninitialised, |central| central.status());
    status as c_int
}

/// Current `CobbleErrorCode`; meaningful when the status is `Error`
#[no_mangle]
pub extern "C" fn cobble_error_get() -> c_int {
    session::current().map_or(0, |central| central.error_code() as c_int)
}

/// Deliver queued events on the calling thread. A no-op in immediate mode.
#[no_mangle]
pub extern "C" fn cobble_queue_process() {
    if let Some(central) = session::current() {
        let report = central.drain();
        if !report.is_empty() {
            debug!(
                "Queue processed: {} dispatched, {} discarded",
                report.dispatched(),
                report.discarded()
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_filter() {
        assert!(parse_filter(None).unwrap().is_empty());
        assert!(parse_filter(Some("")).unwrap().is_empty());

        let filter = parse_filter(Some("180D, FFE0,,")).unwrap();
        assert_eq!(
            filter,
            vec![GattUuid::from_short(0x180D), GattUuid::from_short(0xFFE0)]
        );

        assert!(matches!(
            parse_filter(Some("180D,not-a-uuid")),
            Err(FfiError::Core(_))
        ));
    }

    #[test]
    fn test_null_arguments() {
        let text = unsafe { optional_str(std::ptr::null()) }.unwrap();
        assert!(text.is_none());

        let err = unsafe { required_str(std::ptr::null(), "uuid") }.unwrap_err();
        assert!(matches!(err, FfiError::NullPointer { argument: "uuid" }));

        let bytes = b"FFE1\0";
        let text = unsafe { required_str(bytes.as_ptr().cast(), "uuid") }.unwrap();
        assert_eq!(text, "FFE1");
    }
}
