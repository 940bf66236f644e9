//! State-preserving restart.
//!
//! The running daemon (the predecessor) and the daemon replacing it (the
//! successor) meet through three files in the handoff directory:
//!
//! ```text
//! handoff.json   predecessor -> successor   HandoffState
//! handoff.ready  successor -> predecessor   state accepted or rejected
//! handoff.done   successor -> predecessor   exclusive locks reacquired
//! ```
//!
//! The predecessor releases its exclusive volume locks only after `ready`
//! and retires only after `done`. On any failure the successor is killed
//! and reaped; if the locks were already released the predecessor then
//! takes them back.

use super::plan::{ArgAllocator, HANDOFF_VERSION, HandoffState, HeapAllocator, RestartPlan};
use crate::config::RestartConfig;
use crate::context::ProcessContext;
use crate::error::{Result, VolcoordError};
use crate::fs::{atomic_write, remove_if_exists};
use crate::locks::{LockMode, LvLockTable};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, error, info, warn};

/// Acknowledgement written by the successor.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HandoffAck {
    pub accepted: bool,
    pub pid: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
    pub at: DateTime<Utc>,
}

impl HandoffAck {
    fn accepted() -> Self {
        Self {
            accepted: true,
            pid: std::process::id(),
            reason: None,
            at: Utc::now(),
        }
    }

    fn rejected(reason: String) -> Self {
        Self {
            accepted: false,
            pid: std::process::id(),
            reason: Some(reason),
            at: Utc::now(),
        }
    }
}

/// Path of the `ready` acknowledgement for a handoff state file.
pub fn ready_path(handoff: &Path) -> PathBuf {
    handoff.with_extension("ready")
}

/// Path of the `done` acknowledgement for a handoff state file.
pub fn done_path(handoff: &Path) -> PathBuf {
    handoff.with_extension("done")
}

/// Launches successor daemons.
pub trait Successor: Send + Sync {
    fn launch(&self, plan: &RestartPlan) -> Result<Box<dyn SuccessorHandle>>;
}

/// A launched successor.
pub trait SuccessorHandle: Send {
    /// `Some(description)` once the successor has exited.
    fn exited(&mut self) -> Option<String>;

    /// Stop the successor and wait for it to terminate.
    fn abort(&mut self);
}

/// Drives a restart from the predecessor's side.
pub struct Restarter {
    config: RestartConfig,
    successor: Arc<dyn Successor>,
    allocator: Arc<dyn ArgAllocator>,
}

impl Restarter {
    pub fn new(config: RestartConfig, successor: Arc<dyn Successor>) -> Self {
        Self {
            config,
            successor,
            allocator: Arc::new(HeapAllocator),
        }
    }

    pub fn with_allocator(mut self, allocator: Arc<dyn ArgAllocator>) -> Self {
        self.allocator = allocator;
        self
    }

    /// Hand every exclusive volume lock in `lv_locks` to a new daemon.
    ///
    /// On success the context is marked for retirement.
    pub fn restart(&self, ctx: &ProcessContext, lv_locks: &LvLockTable) -> Result<()> {
        let names = lv_locks.exclusive_names();
        let handoff = self.config.handoff_path();
        let plan = RestartPlan::build(
            &self.config.successor_path,
            &handoff,
            ctx.debug_level(),
            &names,
            std::process::id(),
            self.allocator.as_ref(),
        )?;
        info!(
            program = %plan.program.display(),
            locks = names.len(),
            "restarting daemon"
        );

        let state = plan.state.to_json()?;
        clear_acks(&handoff);
        atomic_write(&handoff, state.as_bytes())?;

        let result = self.run(&plan, lv_locks, &names);
        match &result {
            Ok(()) => {
                ctx.request_retirement();
                info!("successor took over; retiring");
            }
            Err(e) => {
                error!(error = %e, "restart abandoned; continuing to run");
            }
        }
        cleanup(&handoff);
        result
    }

    fn run(&self, plan: &RestartPlan, lv_locks: &LvLockTable, names: &[String]) -> Result<()> {
        let mut child = self.successor.launch(plan)?;
        let mut released = false;
        let result = self.supervise(plan, lv_locks, names, child.as_mut(), &mut released);
        if let Err(e) = &result {
            // the successor must be gone before the locks are taken back
            warn!(error = %e, "stopping successor");
            child.abort();
            if released {
                reacquire(lv_locks, names);
            }
        }
        result
    }

    /// Wait for both acknowledgements; `released` records whether the
    /// exclusive locks were handed over.
    fn supervise(
        &self,
        plan: &RestartPlan,
        lv_locks: &LvLockTable,
        names: &[String],
        child: &mut dyn SuccessorHandle,
        released: &mut bool,
    ) -> Result<()> {
        let poll = self.config.poll_interval();

        let ready = wait_for_ack(
            &ready_path(&plan.handoff_path),
            self.config.ready_timeout(),
            poll,
            child,
        )?;
        if !ready.accepted {
            return Err(VolcoordError::Handoff(format!(
                "successor {} rejected the handoff: {}",
                ready.pid,
                ready.reason.unwrap_or_default()
            )));
        }

        *released = true;
        for name in names {
            if let Err(e) = lv_locks.release(name) {
                warn!(lock = %name, error = %e, "cannot release lock for successor");
            }
        }
        debug!(count = names.len(), "exclusive locks released to successor");

        let done = wait_for_ack(
            &done_path(&plan.handoff_path),
            self.config.complete_timeout(),
            poll,
            child,
        )?;
        if !done.accepted {
            return Err(VolcoordError::Handoff(format!(
                "successor {} could not take over the locks: {}",
                done.pid,
                done.reason.unwrap_or_default()
            )));
        }
        Ok(())
    }
}

impl std::fmt::Debug for Restarter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Restarter")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

fn reacquire(lv_locks: &LvLockTable, names: &[String]) {
    for name in names {
        match lv_locks.hold(name, LockMode::EX, true) {
            Ok(_) => debug!(lock = %name, "exclusive lock reacquired"),
            Err(e) => error!(lock = %name, error = %e, "cannot reacquire exclusive lock"),
        }
    }
}

fn clear_acks(handoff: &Path) {
    for path in [ready_path(handoff), done_path(handoff)] {
        if let Err(e) = remove_if_exists(&path) {
            warn!(path = %path.display(), error = %e, "cannot remove stale acknowledgement");
        }
    }
}

fn cleanup(handoff: &Path) {
    clear_acks(handoff);
    if let Err(e) = remove_if_exists(handoff) {
        warn!(path = %handoff.display(), error = %e, "cannot remove handoff state");
    }
}

fn wait_for_ack(
    path: &Path,
    timeout: Duration,
    poll: Duration,
    child: &mut dyn SuccessorHandle,
) -> Result<HandoffAck> {
    let start = Instant::now();
    loop {
        if path.exists() {
            let text = std::fs::read_to_string(path).map_err(|e| {
                VolcoordError::Handoff(format!("cannot read {}: {}", path.display(), e))
            })?;
            return serde_json::from_str(&text).map_err(|e| {
                VolcoordError::Handoff(format!("malformed {}: {}", path.display(), e))
            });
        }
        if let Some(status) = child.exited() {
            return Err(VolcoordError::Handoff(format!(
                "successor exited before writing {}: {}",
                path.display(),
                status
            )));
        }
        if start.elapsed() >= timeout {
            return Err(VolcoordError::Handoff(format!(
                "timed out after {:?} waiting for {}",
                timeout,
                path.display()
            )));
        }
        std::thread::sleep(poll);
    }
}

fn write_ack(path: &Path, ack: &HandoffAck) -> Result<()> {
    let text = serde_json::to_string(ack)
        .map_err(|e| VolcoordError::Handoff(format!("cannot serialize acknowledgement: {}", e)))?;
    atomic_write(path, text.as_bytes())
}

/// Successor side: read and validate the handoff state, then acknowledge
/// `ready` (or its rejection).
pub fn accept_handoff(handoff: &Path) -> Result<HandoffState> {
    let text = std::fs::read_to_string(handoff).map_err(|e| {
        VolcoordError::Handoff(format!("cannot read {}: {}", handoff.display(), e))
    })?;
    let state = match HandoffState::from_json(&text) {
        Ok(state) => state,
        Err(e) => {
            write_ack(&ready_path(handoff), &HandoffAck::rejected(e.to_string()))?;
            return Err(e);
        }
    };
    if state.version != HANDOFF_VERSION {
        let reason = format!(
            "handoff version {} is not supported (expected {})",
            state.version, HANDOFF_VERSION
        );
        write_ack(&ready_path(handoff), &HandoffAck::rejected(reason.clone()))?;
        return Err(VolcoordError::Handoff(reason));
    }
    write_ack(&ready_path(handoff), &HandoffAck::accepted())?;
    info!(
        predecessor = state.predecessor_pid,
        locks = state.exclusive_locks.len(),
        "handoff accepted"
    );
    Ok(state)
}

/// Successor side: take over the exclusive locks and acknowledge `done`.
///
/// Blocks until the predecessor has released each lock. On failure every
/// lock taken so far is released again so the predecessor can reclaim them.
pub fn complete_handoff(
    handoff: &Path,
    state: &HandoffState,
    ctx: &ProcessContext,
    lv_locks: &LvLockTable,
) -> Result<()> {
    ctx.set_debug_level(state.debug_level);
    for (taken, name) in state.exclusive_locks.iter().enumerate() {
        if let Err(e) = lv_locks.hold(name, LockMode::EX, false) {
            for previous in &state.exclusive_locks[..taken] {
                if let Err(e) = lv_locks.release(previous) {
                    warn!(lock = %previous, error = %e, "cannot return lock to predecessor");
                }
            }
            write_ack(&done_path(handoff), &HandoffAck::rejected(e.to_string()))?;
            return Err(e);
        }
    }
    write_ack(&done_path(handoff), &HandoffAck::accepted())?;
    info!(locks = state.exclusive_locks.len(), "exclusive locks taken over");
    Ok(())
}
