//! Runtime Configuration
//!
//! Tunables for the per-thread runtime. Every field has a default, so a
//! config document only needs to name what it changes:
//!
//! ```json
//! { "max_effect_runs_per_flush": 1000 }
//! ```

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Errors produced while loading or validating a [`RuntimeConfig`].
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to parse runtime configuration: {0}")]
    Parse(#[from] serde_json::Error),

    #[error("invalid runtime configuration: {field} must be greater than zero")]
    Zero { field: &'static str },
}

/// Settings for the reactive runtime of one thread.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct RuntimeConfig {
    /// Upper bound on queue entries processed by a single drain. Reaching it
    /// means effects keep re-triggering each other; the drain stops and
    /// reports `RunawayEffects`.
    pub max_effect_runs_per_flush: usize,

    /// Catch panics from effects during a drain and report them as
    /// `CallbackPanicked`, so the remaining effects still run. When off, a
    /// panicking effect unwinds through the write that triggered it.
    pub isolate_effect_panics: bool,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            max_effect_runs_per_flush: 100_000,
            isolate_effect_panics: true,
        }
    }
}

impl RuntimeConfig {
    /// Parse and validate a JSON config document.
    pub fn from_json(input: &str) -> Result<Self, ConfigError> {
        let config: Self = serde_json::from_str(input)?;
        config.validate()?;
        Ok(config)
    }

    /// Check the values are usable.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.max_effect_runs_per_flush == 0 {
            return Err(ConfigError::Zero {
                field: "max_effect_runs_per_flush",
            });
        }
        Ok(())
    }
}
