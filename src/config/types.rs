//! Configuration types and defaults for volcoord.
//!
//! This module defines enums, nested sections, and default value functions
//! used by the Config struct.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

/// How the activation engine interacts with the event monitor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum MonitoringMode {
    /// Register and unregister devices as they change state (default).
    #[default]
    Enabled,
    /// Never register new devices, but still unregister on the way down.
    Disabled,
    /// Skip event monitor interaction altogether.
    Ignore,
}

impl MonitoringMode {
    /// Parse a monitoring mode from a string.
    #[allow(clippy::should_implement_trait)]
    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "enabled" => Some(Self::Enabled),
            "disabled" => Some(Self::Disabled),
            "ignore" => Some(Self::Ignore),
            _ => None,
        }
    }
}

/// Settings for the state-preserving restart handoff.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RestartConfig {
    /// Executable launched as the successor daemon.
    #[serde(default = "default_successor_path")]
    pub successor_path: PathBuf,

    /// Directory holding the handoff state and acknowledgement files.
    #[serde(default = "default_handoff_dir")]
    pub handoff_dir: PathBuf,

    /// Seconds to wait for the successor to accept the handoff state.
    #[serde(default = "default_ready_timeout_secs")]
    pub ready_timeout_secs: u64,

    /// Seconds to wait for the successor to reacquire the exclusive locks.
    #[serde(default = "default_complete_timeout_secs")]
    pub complete_timeout_secs: u64,

    /// Milliseconds between acknowledgement polls.
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,
}

impl RestartConfig {
    /// Path of the handoff state file.
    pub fn handoff_path(&self) -> PathBuf {
        self.handoff_dir.join(HANDOFF_FILE_NAME)
    }

    pub fn ready_timeout(&self) -> Duration {
        Duration::from_secs(self.ready_timeout_secs)
    }

    pub fn complete_timeout(&self) -> Duration {
        Duration::from_secs(self.complete_timeout_secs)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }
}

impl Default for RestartConfig {
    fn default() -> Self {
        Self {
            successor_path: default_successor_path(),
            handoff_dir: default_handoff_dir(),
            ready_timeout_secs: default_ready_timeout_secs(),
            complete_timeout_secs: default_complete_timeout_secs(),
            poll_interval_ms: default_poll_interval_ms(),
        }
    }
}

/// File name of the handoff state inside `handoff_dir`.
pub const HANDOFF_FILE_NAME: &str = "handoff.json";

pub(crate) fn default_true() -> bool {
    true
}

pub(crate) fn default_monitor_retries() -> u32 {
    10
}

pub(crate) fn default_monitor_retry_interval_ms() -> u64 {
    1000
}

pub(crate) fn default_monitor_timeout_secs() -> u32 {
    10
}

pub(crate) fn default_reply_buffer_size() -> usize {
    256
}

fn default_successor_path() -> PathBuf {
    PathBuf::from("/usr/sbin/volcoordd")
}

fn default_handoff_dir() -> PathBuf {
    PathBuf::from("/run/volcoord")
}

fn default_ready_timeout_secs() -> u64 {
    10
}

fn default_complete_timeout_secs() -> u64 {
    60
}

fn default_poll_interval_ms() -> u64 {
    100
}
