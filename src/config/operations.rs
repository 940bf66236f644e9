//! Config loading, validation, and utility operations.

use super::model::Config;
use crate::error::{Result, VolcoordError};
use std::path::Path;

impl Config {
    /// Load config from a YAML file.
    ///
    /// Unknown fields in the YAML are silently ignored for forward compatibility.
    ///
    /// # Returns
    ///
    /// * `Ok(Config)` - Successfully loaded and validated config
    /// * `Err(VolcoordError::Config)` - Read error, parse error or validation failure
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();

        let content = std::fs::read_to_string(path).map_err(|e| {
            VolcoordError::Config(format!(
                "failed to read config file '{}': {}",
                path.display(),
                e
            ))
        })?;

        Self::from_yaml(&content)
    }

    /// Parse config from a YAML string.
    pub fn from_yaml(yaml: &str) -> Result<Self> {
        let config: Config = serde_yaml::from_str(yaml)
            .map_err(|e| VolcoordError::Config(format!("failed to parse config YAML: {}", e)))?;

        config.validate()?;
        Ok(config)
    }

    /// Serialize config to YAML string.
    pub fn to_yaml(&self) -> Result<String> {
        serde_yaml::to_string(self)
            .map_err(|e| VolcoordError::Config(format!("failed to serialize config to YAML: {}", e)))
    }

    /// Validate config values and return error on invalid values.
    ///
    /// Validation rules:
    /// - `reply_buffer_size` must be at least 3 bytes (room for a lock mode reply)
    /// - `monitor_retries` must be positive
    /// - `restart.poll_interval_ms` must be positive
    /// - `host_tags` entries must be non-empty and carry no `@` prefix
    ///
    /// Empty or malformed `volume_list` entries are not rejected here; the
    /// activation filter skips them with a logged error.
    pub fn validate(&self) -> Result<()> {
        if self.reply_buffer_size < 3 {
            return Err(VolcoordError::Config(
                "reply_buffer_size must be at least 3".to_string(),
            ));
        }

        if self.monitor_retries == 0 {
            return Err(VolcoordError::Config(
                "monitor_retries must be greater than 0".to_string(),
            ));
        }

        if self.restart.poll_interval_ms == 0 {
            return Err(VolcoordError::Config(
                "restart.poll_interval_ms must be greater than 0".to_string(),
            ));
        }

        for tag in &self.host_tags {
            if tag.is_empty() {
                return Err(VolcoordError::Config(
                    "host_tags entries must be non-empty".to_string(),
                ));
            }
            if tag.starts_with('@') {
                return Err(VolcoordError::Config(format!(
                    "host_tags entries must not carry '@' (found '{}'). Use '{}' instead.",
                    tag,
                    tag.trim_start_matches('@')
                )));
            }
        }

        Ok(())
    }
}
