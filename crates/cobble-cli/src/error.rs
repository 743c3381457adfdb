//! Error handling for the Cobble CLI

use cobble_core::{DeviceIdentifier, ErrorCode};
use thiserror::Error;

/// CLI-specific error types
#[derive(Error, Debug)]
pub enum CliError {
    #[error("Cobble error: {0}")]
    Core(#[from] cobble_core::CobbleError),

    #[error("Adapter error: {0}")]
    Adapter(#[from] cobble_btleplug::BtleplugAdapterError),

    #[error("Bluetooth unavailable: {0}")]
    Fault(ErrorCode),

    #[error("Device not seen while scanning: {identifier}")]
    DeviceNotFound { identifier: DeviceIdentifier },

    #[error("Could not connect to {identifier}")]
    ConnectFailed { identifier: DeviceIdentifier },

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("TOML parsing error: {0}")]
    TomlParsing(#[from] toml::de::Error),

    #[error("Hex decoding error: {0}")]
    HexDecoding(#[from] hex::FromHexError),
}

/// Result type for CLI operations
pub type Result<T> = std::result::Result<T, CliError>;
