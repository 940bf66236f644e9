//! Configuration model for volcoord.
//!
//! This module defines the Config struct that holds the daemon's settings:
//! activation policy inputs (allow-list, host tags, partial activation),
//! event monitoring behavior, reply sizing and the restart handoff.
//! It supports forward-compatible YAML parsing (unknown fields are ignored),
//! sensible defaults for optional fields, and validation of config values.

mod model;
mod operations;
pub mod types;


// Re-export public API
pub use model::Config;
pub use types::{MonitoringMode, RestartConfig};
