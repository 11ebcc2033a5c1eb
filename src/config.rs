// ============================================================================
// Engine Configuration
// ============================================================================
//
// Loaded from TOML. Every field has a default, so an empty document (or no
// file at all) yields a working configuration.
//
// ============================================================================

use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::domain::order::ChargePolicy;
use crate::utils::{CircuitBreakerConfig, RetryConfig};

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read config file {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid config: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("invalid config value for {field}: {reason}")]
    Invalid { field: &'static str, reason: String },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Hours between placement and the estimated delivery date.
    pub delivery_lead_time_hours: i64,
    /// Order-number draws before creation gives up on collisions.
    pub identifier_attempts: u32,
    /// Buffered events per subscriber before it starts lagging.
    pub notifier_capacity: usize,
    pub storage: StorageConfig,
    pub charges: ChargePolicy,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            delivery_lead_time_hours: 72,
            identifier_attempts: 5,
            notifier_capacity: 256,
            storage: StorageConfig::default(),
            charges: ChargePolicy::default(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    pub timeout_ms: u64,
    pub retry: RetryConfig,
    pub circuit_breaker: CircuitBreakerConfig,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            timeout_ms: 5_000,
            retry: RetryConfig::default(),
            circuit_breaker: CircuitBreakerConfig::default(),
        }
    }
}

impl StorageConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }
}

impl EngineConfig {
    pub fn from_toml_str(raw: &str) -> Result<Self, ConfigError> {
        let config: EngineConfig = toml::from_str(raw)?;
        config.validate()?;
        Ok(config)
    }

    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.display().to_string(),
            source,
        })?;
        Self::from_toml_str(&raw)
    }

    pub fn delivery_lead_time(&self) -> chrono::Duration {
        chrono::Duration::hours(self.delivery_lead_time_hours)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.delivery_lead_time_hours < 0 {
            return Err(ConfigError::Invalid {
                field: "delivery_lead_time_hours",
                reason: "must not be negative".into(),
            });
        }
        if self.identifier_attempts == 0 {
            return Err(ConfigError::Invalid {
                field: "identifier_attempts",
                reason: "must be at least 1".into(),
            });
        }
        if self.notifier_capacity == 0 {
            return Err(ConfigError::Invalid {
                field: "notifier_capacity",
                reason: "must be at least 1".into(),
            });
        }
        if self.storage.timeout_ms == 0 {
            return Err(ConfigError::Invalid {
                field: "storage.timeout_ms",
                reason: "must be at least 1".into(),
            });
        }
        if self.storage.retry.multiplier < 1.0 {
            return Err(ConfigError::Invalid {
                field: "storage.retry.multiplier",
                reason: format!("{} is below 1.0", self.storage.retry.multiplier),
            });
        }
        if self.charges.tax_rate.is_sign_negative() || self.charges.shipping_fee.is_sign_negative() {
            return Err(ConfigError::Invalid {
                field: "charges",
                reason: "fees and rates must not be negative".into(),
            });
        }
        Ok(())
    }
}
