//! Desktop adapter configuration

use std::time::Duration;

use serde::{Deserialize, Serialize};

// ----------------------------------------------------------------------------
// Configuration
// ----------------------------------------------------------------------------

/// Configuration for [`BtleplugAdapter`](crate::BtleplugAdapter)
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct BtleplugConfig {
    /// Which host adapter to use when several are present
    pub adapter_index: usize,
    /// Maximum time to wait for a connection, in milliseconds
    pub connection_timeout_ms: u64,
    /// Declare that scans need a service filter (CoreBluetooth reports
    /// nothing useful in the background without one)
    pub require_service_filter: bool,
}

impl Default for BtleplugConfig {
    fn default() -> Self {
        Self {
            adapter_index: 0,
            connection_timeout_ms: 5_000,
            require_service_filter: cfg!(target_os = "macos"),
        }
    }
}

impl BtleplugConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn connection_timeout(&self) -> Duration {
        Duration::from_millis(self.connection_timeout_ms)
    }

    /// Set adapter index
    pub fn with_adapter_index(mut self, index: usize) -> Self {
        self.adapter_index = index;
        self
    }

    /// Set connection timeout
    pub fn with_connection_timeout(mut self, timeout: Duration) -> Self {
        self.connection_timeout_ms = u64::try_from(timeout.as_millis()).unwrap_or(u64::MAX);
        self
    }

    /// Override the per-platform service filter requirement
    pub fn with_require_service_filter(mut self, required: bool) -> Self {
        self.require_service_filter = required;
        self
    }
}
