//! Configuration for the wound triage service.
//!
//! A single JSON document with one section per concern. Every section is
//! `#[serde(default)]`, so a file only needs the keys it changes; the
//! defaults reproduce the Jetson deployment (jetson-containers running
//! nano_llm with VILA1.5-3b).

mod error;
mod launch;
mod sections;

pub use error::ConfigError;
pub use launch::{LaunchSpec, VolumeBinding, VOLUMES_PLACEHOLDER};
pub use sections::{
    CaptureConfig, HttpConfig, LoggingConfig, PromptConfig, SessionPolicy, WatchConfig,
    OUTPUT_PLACEHOLDER,
};

use std::path::Path;

use serde::{Deserialize, Serialize};

use triage_types::sys_info;

/// Whole-service configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct TriageConfig {
    pub launch: LaunchSpec,
    pub session: SessionPolicy,
    pub prompt: PromptConfig,
    pub watch: WatchConfig,
    pub http: HttpConfig,
    pub capture: CaptureConfig,
    pub logging: LoggingConfig,
}

impl TriageConfig {
    /// Load from a JSON file and validate.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let raw = std::fs::read_to_string(path).map_err(|e| ConfigError::io(path, e))?;
        let config = Self::from_json(&raw)?;
        sys_info!("[CONFIG] Loaded configuration from {}", path.display());
        Ok(config)
    }

    /// Load from `path` when given, defaults otherwise.
    pub fn load_or_default(path: Option<&Path>) -> Result<Self, ConfigError> {
        match path {
            Some(p) => Self::load(p),
            None => {
                let config = Self::default();
                config.validate()?;
                Ok(config)
            }
        }
    }

    pub fn from_json(raw: &str) -> Result<Self, ConfigError> {
        let config: Self = serde_json::from_str(raw)?;
        config.validate()?;
        Ok(config)
    }

    /// Reject settings the session manager cannot run with.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.launch.program.trim().is_empty() {
            return Err(ConfigError::invalid("launch.program", "must not be empty"));
        }
        if self.session.response_timeout_secs == 0 {
            return Err(ConfigError::invalid(
                "session.response_timeout_secs",
                "must be greater than zero",
            ));
        }
        if self.session.restart_max_attempts == 0 {
            return Err(ConfigError::invalid(
                "session.restart_max_attempts",
                "must be at least 1",
            ));
        }
        if self.session.end_of_turn_marker.is_empty() {
            return Err(ConfigError::invalid(
                "session.end_of_turn_marker",
                "must not be empty",
            ));
        }
        if self.session.queue_capacity == Some(0) {
            return Err(ConfigError::invalid(
                "session.queue_capacity",
                "must be greater than zero when set",
            ));
        }
        if self.watch.extensions.is_empty() {
            return Err(ConfigError::invalid("watch.extensions", "must list at least one"));
        }
        Ok(())
    }
}
