//! Session configuration

use serde::{Deserialize, Serialize};

// ----------------------------------------------------------------------------
// Delivery Mode
// ----------------------------------------------------------------------------

/// How adapter events reach application handlers
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeliveryMode {
    /// Handlers run synchronously on the adapter thread that raised the event
    #[default]
    Immediate,
    /// Events are queued per kind until the application calls `drain()`
    Deferred,
}

// ----------------------------------------------------------------------------
// Configuration
// ----------------------------------------------------------------------------

/// Maximum characteristic value carried by a [`ValueUpdate`](crate::ValueUpdate)
pub const DEFAULT_MAX_VALUE_LEN: usize = 256;

/// Write size that is safe on every BLE transport (23-byte default MTU minus ATT header)
pub const DEFAULT_WRITE_SIZE: usize = 20;

/// ATT opcode plus handle
pub const ATT_HEADER_LEN: usize = 3;

/// Configuration for a [`Central`](crate::Central) session
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CobbleConfig {
    /// Event delivery strategy
    pub delivery: DeliveryMode,
    /// Longer native values are truncated to this many bytes
    pub max_value_len: usize,
    /// Write size reported when no MTU has been negotiated
    pub default_write_size: usize,
    /// Protocol overhead subtracted from a negotiated MTU
    pub att_header_len: usize,
    /// Refuse empty scan filters on adapters that need one
    pub enforce_scan_filter: bool,
    /// Per-kind cap on deferred queues; `None` keeps every event until drained
    pub queue_capacity: Option<usize>,
}

impl Default for CobbleConfig {
    fn default() -> Self {
        Self {
            delivery: DeliveryMode::Immediate,
            max_value_len: DEFAULT_MAX_VALUE_LEN,
            default_write_size: DEFAULT_WRITE_SIZE,
            att_header_len: ATT_HEADER_LEN,
            enforce_scan_filter: true,
            queue_capacity: None,
        }
    }
}

impl CobbleConfig {
    /// Create a configuration with default settings
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the delivery mode
    pub fn with_delivery(mut self, delivery: DeliveryMode) -> Self {
        self.delivery = delivery;
        self
    }

    /// Set the maximum value length
    pub fn with_max_value_len(mut self, len: usize) -> Self {
        self.max_value_len = len;
        self
    }

    /// Set the fallback write size
    pub fn with_default_write_size(mut self, size: usize) -> Self {
        self.default_write_size = size;
        self
    }

    /// Enable or disable scan filter enforcement
    pub fn with_enforce_scan_filter(mut self, enforce: bool) -> Self {
        self.enforce_scan_filter = enforce;
        self
    }

    /// Cap each deferred queue
    pub fn with_queue_capacity(mut self, capacity: usize) -> Self {
        self.queue_capacity = Some(capacity);
        self
    }
}
