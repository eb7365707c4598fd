//! TOML configuration loader with validation.
//!
//! Loads [`MotionConfig`] from a single file and checks parameter bounds,
//! slave map consistency and per-axis overrides before anything touches the
//! engine.

use std::path::Path;

use motion_common::config::MotionConfig;
use thiserror::Error;
use tracing::debug;

// ─── Error Type ─────────────────────────────────────────────────────

/// Configuration loading/validation error.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConfigError {
    /// File I/O error.
    #[error("config I/O error: {0}")]
    IoError(String),
    /// TOML parse error.
    #[error("config parse error: {0}")]
    ParseError(String),
    /// Parameter validation error.
    #[error("config validation: {0}")]
    ValidationError(String),
}

// ─── Loading ────────────────────────────────────────────────────────

/// Load and validate the configuration file at `path`.
pub fn load_config(path: &Path) -> Result<MotionConfig, ConfigError> {
    let text = std::fs::read_to_string(path)
        .map_err(|e| ConfigError::IoError(format!("failed to read {}: {e}", path.display())))?;
    debug!(path = %path.display(), bytes = text.len(), "config file read");
    load_config_from_str(&text)
}

/// Parse and validate configuration text.
pub fn load_config_from_str(text: &str) -> Result<MotionConfig, ConfigError> {
    let config: MotionConfig =
        toml::from_str(text).map_err(|e| ConfigError::ParseError(e.to_string()))?;
    config.validate().map_err(ConfigError::ValidationError)?;
    Ok(config)
}
