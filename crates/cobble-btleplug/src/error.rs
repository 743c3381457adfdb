//! Error types for the btleplug adapter
//!
//! These errors never reach the facade as return values. The worker logs them
//! and, for hardware and permission problems, raises a fault through the sink.

use cobble_core::{DeviceIdentifier, ErrorCode, GattUuid};
use thiserror::Error;

// ----------------------------------------------------------------------------
// Error Types
// ----------------------------------------------------------------------------

#[derive(Error, Debug)]
pub enum BtleplugAdapterError {
    #[error("Failed to start adapter runtime: {0}")]
    Runtime(#[from] std::io::Error),

    #[error("No BLE adapters available")]
    NoAdapter,

    #[error("Adapter index {index} out of range ({available} available)")]
    AdapterIndex { index: usize, available: usize },

    #[error("BLE adapter not initialised")]
    NotInitialised,

    #[error("Peripheral not found: {identifier}")]
    PeripheralNotFound { identifier: DeviceIdentifier },

    #[error("Connection timeout")]
    ConnectionTimeout,

    #[error("Peripheral not connected")]
    NotConnected,

    #[error("Characteristic not found: {uuid}")]
    CharacteristicNotFound { uuid: GattUuid },

    #[error("Bluetooth stack error: {0}")]
    Stack(#[from] btleplug::Error),
}

impl BtleplugAdapterError {
    /// Session-terminal condition behind this error, if any
    pub fn fault_code(&self) -> Option<ErrorCode> {
        match self {
            BtleplugAdapterError::NoAdapter | BtleplugAdapterError::AdapterIndex { .. } => {
                Some(ErrorCode::HardwareUnsupported)
            }
            BtleplugAdapterError::Stack(btleplug::Error::PermissionDenied) => {
                Some(ErrorCode::PermissionsNotGranted)
            }
            BtleplugAdapterError::Stack(btleplug::Error::NotSupported(_)) => {
                Some(ErrorCode::HardwareUnsupported)
            }
            _ => None,
        }
    }
}

/// Result type for adapter internals
pub type Result<T> = std::result::Result<T, BtleplugAdapterError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fault_classification() {
        assert_eq!(
            BtleplugAdapterError::NoAdapter.fault_code(),
            Some(ErrorCode::HardwareUnsupported)
        );
        assert_eq!(
            BtleplugAdapterError::Stack(btleplug::Error::PermissionDenied).fault_code(),
            Some(ErrorCode::PermissionsNotGranted)
        );
        assert_eq!(
            BtleplugAdapterError::Stack(btleplug::Error::NotSupported("le".into())).fault_code(),
            Some(ErrorCode::HardwareUnsupported)
        );
        assert_eq!(BtleplugAdapterError::ConnectionTimeout.fault_code(), None);
        assert_eq!(
            BtleplugAdapterError::Stack(btleplug::Error::DeviceNotFound).fault_code(),
            None
        );
    }

    #[test]
    fn test_error_messages() {
        let err = BtleplugAdapterError::AdapterIndex {
            index: 2,
            available: 1,
        };
        assert_eq!(err.to_string(), "Adapter index 2 out of range (1 available)");
    }
}
