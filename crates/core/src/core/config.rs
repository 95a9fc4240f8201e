//! Run configuration surface.
//!
//! Loaded once at startup (optionally from a JSON file), validated, and
//! immutable for the duration of a run.

use serde::{Deserialize, Serialize};
use std::path::Path;

use crate::error::ConfigError;

fn default_n_runs() -> i64 {
    10
}

fn default_n_epochs() -> i64 {
    200
}

fn default_n_trials() -> i64 {
    100
}

fn default_n_zero() -> i64 {
    5
}

fn default_test_interval() -> i64 {
    -1
}

/// Counter maxima and termination thresholds for a training session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "snake_case")]
pub struct RunConfig {
    /// Total number of runs when running Train.
    pub n_runs: i64,
    /// Epochs per run.
    pub n_epochs: i64,
    /// Trials per epoch.
    pub n_trials: i64,
    /// Stop a run after this many consecutive zero-error epochs.
    /// Values <= 0 behave as 2 at the termination predicate.
    pub n_zero: i64,
    /// Run the Test stack every this many training epochs; <= 0 disables
    /// periodic testing.
    pub test_interval: i64,
}

impl Default for RunConfig {
    fn default() -> Self {
        Self {
            n_runs: default_n_runs(),
            n_epochs: default_n_epochs(),
            n_trials: default_n_trials(),
            n_zero: default_n_zero(),
            test_interval: default_test_interval(),
        }
    }
}

impl RunConfig {
    /// Counter maxima must be positive; a hierarchy with an invalid max
    /// must never start running.
    pub fn validate(&self) -> Result<(), ConfigError> {
        for (field, value) in [
            ("n_runs", self.n_runs),
            ("n_epochs", self.n_epochs),
            ("n_trials", self.n_trials),
        ] {
            if value < 1 {
                return Err(ConfigError::BadField { field, value });
            }
        }
        Ok(())
    }

    /// The effective zero-error streak threshold.
    pub fn n_zero_stop(&self) -> i64 {
        if self.n_zero <= 0 {
            2
        } else {
            self.n_zero
        }
    }

    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path).map_err(|e| ConfigError::File {
            path: path.display().to_string(),
            reason: e.to_string(),
        })?;
        let cfg: RunConfig = serde_json::from_str(&text).map_err(|e| ConfigError::File {
            path: path.display().to_string(),
            reason: e.to_string(),
        })?;
        cfg.validate()?;
        Ok(cfg)
    }

    /// Load from `path` if it exists, else defaults.
    pub fn load_or_default(path: &Path) -> Result<Self, ConfigError> {
        if path.exists() {
            Self::load(path)
        } else {
            Ok(Self::default())
        }
    }
}
