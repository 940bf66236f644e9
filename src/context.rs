//! Process-wide state shared by the lock coordinator and the activation engine.
//!
//! Everything that used to be a global in a classic volume daemon lives on
//! [`ProcessContext`], which is threaded through every engine entry point:
//! - the activation-enabled switch
//! - the per-command modes: dry run ("test"), the partial-activation
//!   override, mirror in-sync loading and event monitoring
//! - the debug level, carried across restarts
//! - the reclaim guard counter
//! - the retirement request raised by a completed restart handoff
//!
//! The reclaim guard is handed out as an RAII [`ReclaimGuard`]: the counter
//! is incremented on acquisition and decremented when the guard is dropped,
//! so every exit path (including `?` propagation) releases it exactly once.

use crate::config::Config;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU8, AtomicUsize, Ordering};
use tracing::{info, warn};

/// Process-wide mutable state.
#[derive(Debug)]
pub struct ProcessContext {
    activation: AtomicBool,
    test_mode: AtomicBool,
    partial_activation: AtomicBool,
    mirror_in_sync: AtomicBool,
    monitor_events: AtomicBool,
    debug_level: AtomicU8,
    reclaim: Arc<AtomicUsize>,
    retire_requested: AtomicBool,
}

impl ProcessContext {
    /// Build a context from daemon settings.
    pub fn new(config: &Config) -> Self {
        Self {
            activation: AtomicBool::new(config.activation),
            test_mode: AtomicBool::new(false),
            partial_activation: AtomicBool::new(config.partial_activation),
            mirror_in_sync: AtomicBool::new(false),
            monitor_events: AtomicBool::new(true),
            debug_level: AtomicU8::new(config.debug_level),
            reclaim: Arc::new(AtomicUsize::new(0)),
            retire_requested: AtomicBool::new(false),
        }
    }

    /// Whether the device-mapping layer may be driven.
    pub fn activation(&self) -> bool {
        self.activation.load(Ordering::SeqCst)
    }

    pub fn set_activation(&self, enabled: bool) {
        if self.activation.swap(enabled, Ordering::SeqCst) == enabled {
            return;
        }
        if enabled {
            info!("activation enabled, device-mapper kernel driver will be used");
        } else {
            warn!("activation disabled, no device-mapper interaction will be attempted");
        }
    }

    /// Whether mutating operations are short-circuited (dry run).
    pub fn test_mode(&self) -> bool {
        self.test_mode.load(Ordering::SeqCst)
    }

    pub fn set_test_mode(&self, enabled: bool) {
        self.test_mode.store(enabled, Ordering::SeqCst);
    }

    /// Whether partial volumes may be activated.
    pub fn partial_activation(&self) -> bool {
        self.partial_activation.load(Ordering::SeqCst)
    }

    /// Whether mirrors loaded by the current command skip their initial resync.
    pub fn mirror_in_sync(&self) -> bool {
        self.mirror_in_sync.load(Ordering::SeqCst)
    }

    /// Whether volumes brought up by the current command get registered
    /// with the event monitor. Unregistration is not affected.
    pub fn monitor_events(&self) -> bool {
        self.monitor_events.load(Ordering::SeqCst)
    }

    pub fn debug_level(&self) -> u8 {
        self.debug_level.load(Ordering::SeqCst)
    }

    pub fn set_debug_level(&self, level: u8) {
        self.debug_level.store(level, Ordering::SeqCst);
    }

    /// Take the reclaim guard; it is released when the returned value drops.
    pub fn reclaim_guard(&self) -> ReclaimGuard {
        ReclaimGuard::acquire(Arc::clone(&self.reclaim))
    }

    /// Number of reclaim guards currently outstanding.
    pub fn reclaim_depth(&self) -> usize {
        self.reclaim.load(Ordering::SeqCst)
    }

    /// Apply per-command modes until the scope drops.
    ///
    /// Dry run and partial activation stay on when they already are; mirror
    /// in-sync loading and the monitoring switch take the command's values.
    /// Previous values are restored when the scope ends.
    pub fn command_modes(&self, modes: CommandModes) -> CommandModeScope<'_> {
        let previous_test = self.test_mode.fetch_or(modes.test_mode, Ordering::SeqCst);
        let previous_partial = self
            .partial_activation
            .fetch_or(modes.partial, Ordering::SeqCst);
        let previous_in_sync = self
            .mirror_in_sync
            .swap(modes.mirror_in_sync, Ordering::SeqCst);
        let previous_monitor = self.monitor_events.swap(modes.monitor, Ordering::SeqCst);
        CommandModeScope {
            ctx: self,
            previous_test,
            previous_partial,
            previous_in_sync,
            previous_monitor,
        }
    }

    /// Mark this process for retirement after a successful restart handoff.
    pub fn request_retirement(&self) {
        self.retire_requested.store(true, Ordering::SeqCst);
    }

    pub fn retire_requested(&self) -> bool {
        self.retire_requested.load(Ordering::SeqCst)
    }
}

impl Default for ProcessContext {
    fn default() -> Self {
        Self::new(&Config::default())
    }
}

/// RAII hold on the process-wide reclaim guard.
#[derive(Debug)]
pub struct ReclaimGuard {
    counter: Arc<AtomicUsize>,
}

impl ReclaimGuard {
    fn acquire(counter: Arc<AtomicUsize>) -> Self {
        counter.fetch_add(1, Ordering::SeqCst);
        Self { counter }
    }
}

impl Drop for ReclaimGuard {
    fn drop(&mut self) {
        self.counter.fetch_sub(1, Ordering::SeqCst);
    }
}

/// Modes carried by one command's flags.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CommandModes {
    pub test_mode: bool,
    pub partial: bool,
    pub mirror_in_sync: bool,
    pub monitor: bool,
}

impl Default for CommandModes {
    fn default() -> Self {
        Self {
            test_mode: false,
            partial: false,
            mirror_in_sync: false,
            monitor: true,
        }
    }
}

/// Restores the per-command modes on drop.
#[derive(Debug)]
pub struct CommandModeScope<'a> {
    ctx: &'a ProcessContext,
    previous_test: bool,
    previous_partial: bool,
    previous_in_sync: bool,
    previous_monitor: bool,
}

impl Drop for CommandModeScope<'_> {
    fn drop(&mut self) {
        self.ctx.test_mode.store(self.previous_test, Ordering::SeqCst);
        self.ctx
            .partial_activation
            .store(self.previous_partial, Ordering::SeqCst);
        self.ctx
            .mirror_in_sync
            .store(self.previous_in_sync, Ordering::SeqCst);
        self.ctx
            .monitor_events
            .store(self.previous_monitor, Ordering::SeqCst);
    }
}
