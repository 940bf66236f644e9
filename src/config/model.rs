//! Config struct definition and default implementation.

use super::types::*;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Configuration for the volcoord daemon.
///
/// Unknown fields in the YAML are ignored for forward compatibility.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    // =========================================================================
    // Activation settings
    // =========================================================================
    /// Whether the device-mapping layer may be driven at all.
    #[serde(default = "default_true")]
    pub activation: bool,

    /// Allow-list of `@tag`, `@*`, `vg` and `vg/lv` entries.
    ///
    /// `None` means no list is configured and only host tags are consulted.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub volume_list: Option<Vec<String>>,

    /// Tags carried by this host.
    #[serde(default)]
    pub host_tags: Vec<String>,

    /// Whether volumes with missing underlying devices may be activated.
    #[serde(default)]
    pub partial_activation: bool,

    // =========================================================================
    // Event monitoring settings
    // =========================================================================
    /// Event monitor interaction mode.
    #[serde(default)]
    pub monitoring: MonitoringMode,

    /// How many times a pending registration is re-checked.
    #[serde(default = "default_monitor_retries")]
    pub monitor_retries: u32,

    /// Spacing between registration re-checks, in milliseconds.
    #[serde(default = "default_monitor_retry_interval_ms")]
    pub monitor_retry_interval_ms: u64,

    /// Event timeout handed to the monitor on registration, in seconds.
    #[serde(default = "default_monitor_timeout_secs")]
    pub monitor_timeout_secs: u32,

    // =========================================================================
    // Daemon settings
    // =========================================================================
    /// Initial reply buffer capacity handed to command handlers.
    #[serde(default = "default_reply_buffer_size")]
    pub reply_buffer_size: usize,

    /// Initial debug level.
    #[serde(default)]
    pub debug_level: u8,

    /// Restart handoff settings.
    #[serde(default)]
    pub restart: RestartConfig,
}

impl Config {
    pub fn monitor_retry_interval(&self) -> Duration {
        Duration::from_millis(self.monitor_retry_interval_ms)
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            activation: default_true(),
            volume_list: None,
            host_tags: Vec::new(),
            partial_activation: false,
            monitoring: MonitoringMode::default(),
            monitor_retries: default_monitor_retries(),
            monitor_retry_interval_ms: default_monitor_retry_interval_ms(),
            monitor_timeout_secs: default_monitor_timeout_secs(),
            reply_buffer_size: default_reply_buffer_size(),
            debug_level: 0,
            restart: RestartConfig::default(),
        }
    }
}
