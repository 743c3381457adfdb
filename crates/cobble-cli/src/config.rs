//! Cobble CLI configuration
//!
//! An optional TOML file with one table per layer:
//!
//! ```toml
//! [core]
//! delivery = "deferred"
//! queue_capacity = 512
//!
//! [btleplug]
//! adapter_index = 0
//! connection_timeout_ms = 8000
//! ```

use std::path::Path;

use cobble_btleplug::BtleplugConfig;
use cobble_core::CobbleConfig;
use serde::{Deserialize, Serialize};

use crate::error::{CliError, Result};

// ----------------------------------------------------------------------------
// Application Configuration
// ----------------------------------------------------------------------------

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    /// Core session settings
    pub core: CobbleConfig,
    /// Desktop adapter settings
    pub btleplug: BtleplugConfig,
}

impl AppConfig {
    /// Load configuration from a TOML file
    pub fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let text = std::fs::read_to_string(path.as_ref())?;
        let config: AppConfig = toml::from_str(&text)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.core.max_value_len == 0 {
            return Err(CliError::Config("core.max_value_len must be positive".into()));
        }
        if self.core.default_write_size == 0 {
            return Err(CliError::Config(
                "core.default_write_size must be positive".into(),
            ));
        }
        if self.core.queue_capacity == Some(0) {
            return Err(CliError::Config("core.queue_capacity must be positive".into()));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use cobble_core::DeliveryMode;

    #[test]
    fn test_parse_toml() {
        let config: AppConfig = toml::from_str(
            r#"
            [core]
            delivery = "deferred"
            queue_capacity = 64

            [btleplug]
            connection_timeout_ms = 8000
            "#,
        )
        .unwrap();
        assert_eq!(config.core.delivery, DeliveryMode::Deferred);
        assert_eq!(config.core.queue_capacity, Some(64));
        assert_eq!(config.core.max_value_len, 256);
        assert_eq!(config.btleplug.connection_timeout_ms, 8000);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_empty_file_uses_defaults() {
        let config: AppConfig = toml::from_str("").unwrap();
        assert_eq!(config, AppConfig::default());
    }

    #[test]
    fn test_validation() {
        let mut config = AppConfig::default();
        config.core.queue_capacity = Some(0);
        assert!(matches!(config.validate(), Err(CliError::Config(_))));
    }
}
