//! Errors raised while translating C arguments

use std::str::Utf8Error;

use thiserror::Error;

#[derive(Error, Debug)]
pub enum FfiError {
    #[error("Null pointer passed as {argument}")]
    NullPointer { argument: &'static str },

    #[error("Argument is not valid UTF-8: {0}")]
    InvalidUtf8(#[from] Utf8Error),

    #[error("Negative buffer length: {len}")]
    InvalidLength { len: i32 },

    #[error("cobble_init has not been called")]
    NotInitialised,

    #[error("Cobble error: {0}")]
    Core(#[from] cobble_core::CobbleError),

    #[error("Adapter error: {0}")]
    Adapter(#[from] cobble_btleplug::BtleplugAdapterError),
}

pub type Result<T> = std::result::Result<T, FfiError>;
