//! # Recovery Configuration
//!
//! All tunables for the subsystem in one place. Defaults match the
//! constants the components were calibrated with; a config file and
//! `RECOVERY_`-prefixed environment variables can override them.

use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::health::CircuitConfig;
use crate::learning::LearningConfig;
use crate::middleware::MiddlewareConfig;
use crate::types::{RecoveryError, Result};

/// Top-level configuration for the recovery subsystem
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RecoveryConfig {
    /// Circuit breaker thresholds and cooldown
    pub circuit: CircuitConfig,
    /// Learning store location and save cadence
    pub learning: LearningConfig,
    /// Invocation middleware attempt limit and jitter
    pub middleware: MiddlewareConfig,
    /// Maximum retained failure-history entries
    pub history_limit: usize,
}

impl Default for RecoveryConfig {
    fn default() -> Self {
        Self {
            circuit: CircuitConfig::default(),
            learning: LearningConfig::default(),
            middleware: MiddlewareConfig::default(),
            history_limit: 1000,
        }
    }
}

impl RecoveryConfig {
    /// Loads configuration from an optional file layered under
    /// `RECOVERY_`-prefixed environment variables.
    ///
    /// Missing file and empty environment yield the defaults.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut builder = config::Config::builder();
        if let Some(path) = path {
            builder = builder.add_source(config::File::from(path));
        }
        builder = builder.add_source(
            config::Environment::with_prefix("RECOVERY").separator("__"),
        );

        builder
            .build()
            .map_err(|err| RecoveryError::Config(err.to_string()))?
            .try_deserialize()
            .map_err(|err| RecoveryError::Config(err.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn test_defaults() {
        let config = RecoveryConfig::default();
        assert_eq!(config.circuit.min_attempts, 5);
        assert_eq!(config.circuit.failure_threshold, 0.5);
        assert_eq!(config.circuit.cooldown, Duration::from_secs(30));
        assert_eq!(config.middleware.max_attempts, 3);
        assert_eq!(config.history_limit, 1000);
        assert_eq!(config.learning.save_every, 1);
    }

    #[test]
    fn test_load_without_sources_gives_defaults() {
        let config = RecoveryConfig::load(None).unwrap();
        assert_eq!(config.circuit.min_attempts, 5);
        assert_eq!(config.history_limit, 1000);
    }

    #[test]
    fn test_load_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("recovery.toml");
        std::fs::write(
            &path,
            r#"
history_limit = 50

[circuit]
min_attempts = 7
failure_threshold = 0.6
cooldown = { secs = 10, nanos = 0 }
degraded_threshold = 0.3

[middleware]
max_attempts = 5
jitter_factor = 0.0
"#,
        )
        .unwrap();

        let config = RecoveryConfig::load(Some(&path)).unwrap();
        assert_eq!(config.history_limit, 50);
        assert_eq!(config.circuit.min_attempts, 7);
        assert_eq!(config.circuit.cooldown, Duration::from_secs(10));
        assert_eq!(config.middleware.max_attempts, 5);
        // Untouched sections keep their defaults.
        assert_eq!(config.learning.save_every, 1);
    }
}
