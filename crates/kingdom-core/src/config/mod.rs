//! Configuration types for the Kingdom session layer.
//!
//! Configuration is loaded from a single YAML file (usually `kingdom.yaml`).
//! Every field has a default, so an empty file is a valid configuration.
//!
//! ```yaml
//! session:
//!   reset_metadata_on_mutation: true
//!   max_sessions: 64
//! engine:
//!   phases: [growth, upkeep, main]
//!   players: [player-1, player-2]
//!   simulation_depth: 3
//! logging:
//!   level: info
//! ```

pub mod engine;
pub mod session;

use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;

pub use engine::EngineConfig;
pub use session::SessionConfig;

/// Complete Kingdom configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct KingdomConfig {
    /// Session adapter and registry settings.
    #[serde(default)]
    pub session: SessionConfig,

    /// In-memory engine settings.
    #[serde(default)]
    pub engine: EngineConfig,

    /// Logging settings.
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Logging configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Default `tracing` filter directive, overridden by `RUST_LOG`.
    #[serde(default = "default_log_level")]
    pub level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

fn default_log_level() -> String {
    "info".to_string()
}

/// Error type for configuration loading.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("YAML parse error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("Configuration error: {0}")]
    Config(String),
}

impl KingdomConfig {
    /// Load configuration from a YAML file.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let content = fs::read_to_string(path.as_ref())?;
        Self::from_yaml(&content)
    }

    /// Parse configuration from YAML content.
    pub fn from_yaml(content: &str) -> Result<Self, ConfigError> {
        // serde_yaml rejects an empty document; treat it as all defaults.
        if content.trim().is_empty() {
            return Ok(Self::default());
        }
        let config: Self = serde_yaml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    /// Check cross-field constraints serde cannot express.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.engine.phases.is_empty() {
            return Err(ConfigError::Config(
                "engine.phases must list at least one phase".to_string(),
            ));
        }
        if self.session.max_sessions == Some(0) {
            return Err(ConfigError::Config(
                "session.max_sessions must be greater than zero".to_string(),
            ));
        }
        Ok(())
    }
}
