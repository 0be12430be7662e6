//! Crate-wide configuration: one struct per subsystem plus a top-level
//! [`StoreConfig`] that aggregates them — `Default` impls and a
//! `validate()` pass, minus any file persistence; a host application owns
//! that if it wants it.

use thiserror::Error;

use crate::memory::MemoryConfig;
use crate::policy::WritePolicy;
use crate::reliability::{CircuitBreakerConfig, DegradationConfig, HealthCheckConfig};

/// A configuration value failed validation.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("invalid configuration: {0}")]
pub struct ConfigError(pub String);

/// Aggregates every subsystem's tuning knobs behind one `Default` and one
/// `validate()` pass. A host application may serialize this itself (every
/// config struct derives `serde::{Serialize, Deserialize}`), but the crate
/// does not own config persistence.
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct StoreConfig {
    /// Memory-pressure eviction tuning.
    pub memory: MemoryConfig,
    /// Circuit breaker tuning.
    pub circuit_breaker: CircuitBreakerConfig,
    /// Health checker tuning.
    pub health_check: HealthCheckConfig,
    /// Degradation manager tuning.
    pub degradation: DegradationConfig,
    /// Default write policy applied when an operation doesn't override it.
    pub default_write_policy: WritePolicy,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            memory: MemoryConfig::default(),
            circuit_breaker: CircuitBreakerConfig::default(),
            health_check: HealthCheckConfig::default(),
            degradation: DegradationConfig::default(),
            default_write_policy: WritePolicy::CacheAndNetwork,
        }
    }
}

impl StoreConfig {
    /// Validate every subsystem config, surfacing the first failure.
    ///
    /// Each subsystem validates itself with a `String` error; this just
    /// wraps whichever fails first in [`ConfigError`].
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.memory.validate().map_err(ConfigError)?;
        self.circuit_breaker.validate().map_err(ConfigError)?;
        self.health_check.validate().map_err(ConfigError)?;
        self.degradation.validate().map_err(ConfigError)?;
        Ok(())
    }
}

/// `serde::with` helper serializing a [`chrono::Duration`] as whole
/// seconds. `chrono::Duration` has no native `Serialize`/`Deserialize`
/// even with the crate's `serde` feature enabled (that feature only
/// covers `DateTime`), so subsystem configs that carry a `chrono::Duration`
/// field (`CircuitBreakerConfig::open_duration`, `DegradationConfig::cooldown`)
/// opt into this representation explicitly.
pub(crate) mod chrono_duration_seconds {
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(duration: &chrono::Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_i64(duration.num_seconds())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<chrono::Duration, D::Error> {
        let seconds = i64::deserialize(deserializer)?;
        Ok(chrono::Duration::seconds(seconds))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_validates() {
        assert!(StoreConfig::default().validate().is_ok());
    }

    #[test]
    fn invalid_memory_fractions_surface_as_config_error() {
        let mut config = StoreConfig::default();
        config.memory.moderate_frac = 0.95;
        config.memory.critical_frac = 0.5;
        assert!(config.validate().is_err());
    }

    #[test]
    fn invalid_health_check_timeout_surfaces_as_config_error() {
        let mut config = StoreConfig::default();
        config.health_check.timeout = std::time::Duration::from_secs(60);
        config.health_check.check_interval = std::time::Duration::from_secs(30);
        assert!(config.validate().is_err());
    }

    #[test]
    fn round_trips_through_json() {
        let config = StoreConfig::default();
        let json = serde_json::to_string(&config).expect("serialize");
        let restored: StoreConfig = serde_json::from_str(&json).expect("deserialize");
        assert_eq!(restored.default_write_policy, config.default_write_policy);
        assert_eq!(restored.circuit_breaker.open_duration, config.circuit_breaker.open_duration);
    }
}
