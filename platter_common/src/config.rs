//! TOML engine configuration loader with validation.
//!
//! Loads `EngineConfig` from a TOML file or string, applies defaults for
//! absent fields, and validates parameter bounds before the engine wires
//! anything up.

use std::path::Path;

use serde::Deserialize;
use thiserror::Error;

/// Default number of simulated decks.
pub const DEFAULT_DECKS: u8 = 2;

/// Default deck servicing cadence [us].
pub const DEFAULT_TICK_US: u32 = 1000;

/// Configuration loading/validation error.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// File I/O error.
    #[error("config I/O error: {0}")]
    Io(String),

    /// TOML parse error.
    #[error("config parse error: {0}")]
    Parse(String),

    /// Parameter validation error.
    #[error("config validation: {0}")]
    Validation(String),
}

/// Engine configuration.
#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct EngineConfig {
    /// Number of simulated decks to register.
    pub decks: u8,

    /// Deck servicing cadence [us].
    pub tick_us: u32,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            decks: DEFAULT_DECKS,
            tick_us: DEFAULT_TICK_US,
        }
    }
}

impl EngineConfig {
    /// Validate parameter bounds.
    ///
    /// # Errors
    /// Returns `ConfigError::Validation` naming the offending field.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.decks == 0 {
            return Err(ConfigError::Validation(
                "decks must be at least 1".to_string(),
            ));
        }
        if self.tick_us < 100 {
            return Err(ConfigError::Validation(format!(
                "tick_us = {} is below the 100us minimum",
                self.tick_us
            )));
        }
        Ok(())
    }
}

/// Load and validate the engine configuration from a TOML file.
pub fn load_config(path: &Path) -> Result<EngineConfig, ConfigError> {
    let content = std::fs::read_to_string(path)
        .map_err(|e| ConfigError::Io(format!("failed to read {}: {e}", path.display())))?;
    load_config_from_str(&content)
}

/// Load and validate the engine configuration from a TOML string.
pub fn load_config_from_str(content: &str) -> Result<EngineConfig, ConfigError> {
    let config: EngineConfig =
        toml::from_str(content).map_err(|e| ConfigError::Parse(e.to_string()))?;
    config.validate()?;
    Ok(config)
}
