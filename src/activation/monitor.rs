//! Event monitor seam and registration.
//!
//! Monitorable segments (mirrors, snapshots) are registered with an external
//! health daemon while active and unregistered before they change state.
//! Registration walks the dependency graph so stacked volumes, mirrored logs
//! and snapshots follow their parent.

use super::graph::Traversal;
use crate::config::{Config, MonitoringMode};
use crate::context::ProcessContext;
use crate::error::Result;
use crate::metadata::LvRef;
use std::time::Duration;
use tracing::{debug, info, warn};

/// Registration state reported by the event monitor for one device.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MonitorStatus {
    pub monitored: bool,
    /// A register or unregister request is still being processed.
    pub pending: bool,
}

/// A device and the plugin that watches it.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct MonitorTarget {
    pub uuid: String,
    pub dso: &'static str,
}

impl MonitorTarget {
    /// Target for `lv`; an origin is watched through its hidden real device.
    pub fn for_volume(lv: &LvRef<'_>, dso: &'static str) -> Self {
        let mut uuid = format!("LVM-{}", lv.id());
        if lv.is_origin() {
            uuid.push_str("-real");
        }
        Self { uuid, dso }
    }
}

/// External device health monitor.
pub trait EventMonitor: Send + Sync {
    fn registered(&self, target: &MonitorTarget) -> Result<MonitorStatus>;
    fn register(&self, target: &MonitorTarget, timeout_secs: u32) -> Result<()>;
    fn unregister(&self, target: &MonitorTarget) -> Result<()>;
}

/// Monitoring behavior taken from daemon settings.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MonitorPolicy {
    pub mode: MonitoringMode,
    pub retries: u32,
    pub retry_interval: Duration,
    pub timeout_secs: u32,
}

impl MonitorPolicy {
    pub fn from_config(config: &Config) -> Self {
        Self {
            mode: config.monitoring,
            retries: config.monitor_retries,
            retry_interval: config.monitor_retry_interval(),
            timeout_secs: config.monitor_timeout_secs,
        }
    }
}

impl Default for MonitorPolicy {
    fn default() -> Self {
        Self::from_config(&Config::default())
    }
}

/// Bring the monitoring state of `lv` and its dependents to `enable`.
///
/// Returns `Ok(true)` when every device settled in the requested state and
/// `Ok(false)` when some registration was still pending after the retry
/// budget (a soft failure, already logged). A register or unregister request
/// the monitor refuses outright is returned as `Err`.
pub fn set_monitoring(
    monitor: &dyn EventMonitor,
    policy: &MonitorPolicy,
    ctx: &ProcessContext,
    lv: LvRef<'_>,
    origin_only: bool,
    enable: bool,
) -> Result<bool> {
    if policy.mode == MonitoringMode::Ignore {
        return Ok(true);
    }
    if enable && (policy.mode == MonitoringMode::Disabled || !ctx.monitor_events()) {
        return Ok(true);
    }

    let mut settled = true;
    for visit in Traversal::new(lv, origin_only) {
        for segment in &visit.lv.lv.segments {
            if segment.pvmove {
                continue;
            }
            let Some(dso) = segment.kind.capabilities().and_then(|caps| caps.monitor_dso()) else {
                continue;
            };
            let target = MonitorTarget::for_volume(&visit.lv, dso);
            if !apply(monitor, policy, ctx, &visit.lv, &target, enable)? {
                settled = false;
            }
        }
    }
    Ok(settled)
}

fn query(monitor: &dyn EventMonitor, target: &MonitorTarget) -> MonitorStatus {
    match monitor.registered(target) {
        Ok(status) => status,
        Err(e) => {
            warn!(device = %target.uuid, error = %e, "event monitor status query failed");
            MonitorStatus::default()
        }
    }
}

fn apply(
    monitor: &dyn EventMonitor,
    policy: &MonitorPolicy,
    ctx: &ProcessContext,
    lv: &LvRef<'_>,
    target: &MonitorTarget,
    enable: bool,
) -> Result<bool> {
    let status = query(monitor, target);
    if !status.pending && status.monitored == enable {
        debug!(lv = %lv.full_name(), monitored = enable, "monitoring already in requested state");
        return Ok(true);
    }

    if ctx.test_mode() {
        debug!(
            lv = %lv.full_name(),
            "Skipping: {} of event monitoring in test mode",
            if enable { "registration" } else { "unregistration" }
        );
        return Ok(true);
    }

    if status.monitored != enable {
        if enable {
            info!(lv = %lv.full_name(), "monitoring");
            monitor.register(target, policy.timeout_secs)?;
        } else {
            info!(lv = %lv.full_name(), "not monitoring");
            monitor.unregister(target)?;
        }
    }

    for _ in 0..policy.retries {
        let status = query(monitor, target);
        if !status.pending && status.monitored == enable {
            return Ok(true);
        }
        std::thread::sleep(policy.retry_interval);
    }

    warn!(
        lv = %lv.full_name(),
        retries = policy.retries,
        "{} of event monitoring did not settle",
        if enable { "registration" } else { "unregistration" }
    );
    Ok(false)
}
