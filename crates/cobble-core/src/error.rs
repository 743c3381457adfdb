//! Error types returned by the Cobble facade
//!
//! Only operational errors are returned from calls. Session-terminal conditions
//! (hardware missing or disabled, permission denied) are never returned: they
//! move the session to [`Status::Error`](crate::Status::Error) and are read back
//! through `status()` / `error_code()`.

use thiserror::Error;

use crate::types::{GattUuid, Status};

// ----------------------------------------------------------------------------
// Error Types
// ----------------------------------------------------------------------------

/// Errors reported by [`Central`](crate::Central) operations
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CobbleError {
    #[error("Cannot {operation} while {status}")]
    InvalidState {
        operation: &'static str,
        status: Status,
    },

    #[error("A connection is already {status}; only one device at a time")]
    ConnectionInProgress { status: Status },

    #[error("Not connected")]
    NotConnected,

    #[error("Characteristic not found: {uuid}")]
    CharacteristicNotFound { uuid: GattUuid },

    #[error("Characteristic {uuid} does not support {operation}")]
    UnsupportedOperation {
        uuid: GattUuid,
        operation: &'static str,
    },

    #[error("Payload too large: {size} bytes (max: {max_size})")]
    PayloadTooLarge { size: usize, max_size: usize },

    #[error("This adapter requires a non-empty service filter to scan")]
    ScanFilterRequired,

    #[error("Invalid UUID: {value}")]
    InvalidUuid { value: String },
}

impl CobbleError {
    /// Whether retrying the same call later can succeed without re-initialising.
    ///
    /// Malformed input is the only permanent error.
    pub fn is_transient(&self) -> bool {
        !matches!(self, CobbleError::InvalidUuid { .. })
    }
}

/// Result type for Cobble operations
pub type Result<T> = std::result::Result<T, CobbleError>;
