//! Local activation state machine.
//!
//! A volume is Inactive, Active-Live or Active-Suspended; the state is always
//! re-queried from the device layer and never stored here. What the engine
//! does keep is the set of in-flight transitions: a suspended volume owns a
//! [`ReclaimGuard`] and, when its filesystem was frozen, a [`FreezeGuard`],
//! both released by the matching resume or deactivate.

use super::devices::{
    DeviceHandle, DeviceManager, FilesystemFreezer, FreezeGuard, Layer, LvInfo, SuspendOptions,
    SyncProgress, TableOptions,
};
use super::filter::FilterPolicy;
use super::graph::{Traversal, required_modules};
use super::monitor::{EventMonitor, MonitorPolicy, set_monitoring};
use crate::config::Config;
use crate::context::{ProcessContext, ReclaimGuard};
use crate::error::{Result, VolcoordError};
use crate::locks::{LockManager, RemoteHold};
use crate::metadata::{LvId, LvRef, MetadataSource, VolumeGroup};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use tracing::{debug, error, info, warn};

/// External collaborators the engine drives.
#[derive(Clone)]
pub struct EngineDeps {
    pub metadata: Arc<dyn MetadataSource>,
    pub devices: Arc<dyn DeviceManager>,
    pub monitor: Arc<dyn EventMonitor>,
    pub freezer: Arc<dyn FilesystemFreezer>,
}

/// Guards held while a volume sits suspended between suspend and resume.
///
/// Fields drop in order: the reclaim guard is released before the thaw.
#[derive(Debug)]
struct TransitionHold {
    _reclaim: ReclaimGuard,
    _freeze: Option<FreezeGuard>,
}

pub struct ActivationEngine {
    deps: EngineDeps,
    locks: Option<Arc<dyn LockManager>>,
    filter: FilterPolicy,
    monitor_policy: MonitorPolicy,
    holds: Mutex<HashMap<LvId, TransitionHold>>,
    last_error: Mutex<Option<String>>,
}

impl ActivationEngine {
    pub fn new(config: &Config, deps: EngineDeps) -> Self {
        Self {
            deps,
            locks: None,
            filter: FilterPolicy::from_config(config),
            monitor_policy: MonitorPolicy::from_config(config),
            holds: Mutex::new(HashMap::new()),
            last_error: Mutex::new(None),
        }
    }

    /// Lock manager consulted by [`ActivationEngine::is_active`] for
    /// volumes of clustered groups.
    pub fn with_lock_manager(mut self, locks: Arc<dyn LockManager>) -> Self {
        self.locks = Some(locks);
        self
    }

    pub fn metadata(&self) -> &Arc<dyn MetadataSource> {
        &self.deps.metadata
    }

    /// Message of the last failed operation.
    pub fn last_error(&self) -> Option<String> {
        self.last_error
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .clone()
    }

    /// Number of volumes currently held mid-transition.
    pub fn held_transitions(&self) -> usize {
        self.holds.lock().unwrap_or_else(|p| p.into_inner()).len()
    }

    fn record<T>(&self, result: Result<T>) -> Result<T> {
        if let Err(e) = &result {
            error!(error = %e, "activation operation failed");
            *self.last_error.lock().unwrap_or_else(|p| p.into_inner()) = Some(e.to_string());
        }
        result
    }

    fn resolve(&self, lvid: &LvId, precommitted: bool) -> Result<Arc<VolumeGroup>> {
        let vg = self.deps.metadata.volume_group_for(lvid, precommitted)?;
        vg.require(lvid)?;
        Ok(vg)
    }

    fn store_hold(&self, lvid: &LvId, hold: TransitionHold) {
        self.holds
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .insert(lvid.clone(), hold);
    }

    fn ensure_hold(&self, ctx: &ProcessContext, lvid: &LvId) {
        self.holds
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .entry(lvid.clone())
            .or_insert_with(|| TransitionHold {
                _reclaim: ctx.reclaim_guard(),
                _freeze: None,
            });
    }

    fn drop_hold(&self, lvid: &LvId) {
        let hold = self
            .holds
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .remove(lvid);
        drop(hold);
    }

    fn monitor(&self, ctx: &ProcessContext, lv: LvRef<'_>, origin_only: bool, enable: bool) {
        match set_monitoring(
            self.deps.monitor.as_ref(),
            &self.monitor_policy,
            ctx,
            lv,
            origin_only,
            enable,
        ) {
            Ok(true) => {}
            Ok(false) => warn!(lv = %lv.full_name(), "event monitoring did not settle"),
            Err(e) => warn!(lv = %lv.full_name(), error = %e, "event monitoring request failed"),
        }
    }

    /// Activate a volume.
    ///
    /// With `filter` set the activation filter is consulted and a veto is
    /// reported as [`VolcoordError::PolicyDenied`].
    pub fn activate(
        &self,
        ctx: &ProcessContext,
        lvid: &LvId,
        exclusive: bool,
        filter: bool,
    ) -> Result<()> {
        let result = self.activate_inner(ctx, lvid, exclusive, filter);
        self.record(result)
    }

    fn activate_inner(
        &self,
        ctx: &ProcessContext,
        lvid: &LvId,
        exclusive: bool,
        filter: bool,
    ) -> Result<()> {
        if !ctx.activation() {
            return Ok(());
        }

        let vg = self.resolve(lvid, false)?;
        let lv = vg.require(lvid)?;

        if filter && !self.filter.passes(&lv) {
            return Err(VolcoordError::PolicyDenied(format!(
                "Not activating {} since it does not pass activation filter.",
                lv.full_name()
            )));
        }
        if lv.is_partial() && !ctx.partial_activation() {
            return Err(VolcoordError::PolicyDenied(format!(
                "Refusing activation of partial LV {}. Use --partial to override.",
                lv.full_name()
            )));
        }
        if lv.has_unknown_segments() {
            return Err(VolcoordError::UnsupportedSegment(format!(
                "Refusing activation of LV {} containing an unrecognised segment.",
                lv.full_name()
            )));
        }
        if ctx.test_mode() {
            debug!(lv = %lv.full_name(), "Skipping: activating");
            return Ok(());
        }

        let mut dev = self.deps.devices.open(&vg.name)?;
        let info = dev.info(&lv, Layer::Top, false)?;
        if info.exists && !info.suspended && info.live_table {
            debug!(lv = %lv.full_name(), "already active");
            return Ok(());
        }

        let options = TableOptions {
            origin_only: false,
            exclusive,
            read_ahead: lv.calculate_read_ahead(),
            mirror_in_sync: ctx.mirror_in_sync(),
        };
        {
            let _reclaim = ctx.reclaim_guard();
            dev.activate(&lv, options)?;
        }
        // a suspended device is live again
        self.drop_hold(lvid);
        info!(lv = %lv.full_name(), exclusive, "activated");

        self.monitor(ctx, lv, false, true);
        Ok(())
    }

    /// Deactivate a volume, refusing while it (or a snapshot of it) is open.
    pub fn deactivate(&self, ctx: &ProcessContext, lvid: &LvId) -> Result<()> {
        let result = self.deactivate_inner(ctx, lvid);
        self.record(result)
    }

    fn deactivate_inner(&self, ctx: &ProcessContext, lvid: &LvId) -> Result<()> {
        if !ctx.activation() {
            return Ok(());
        }

        let vg = self.resolve(lvid, false)?;
        let lv = vg.require(lvid)?;

        if ctx.test_mode() {
            debug!(lv = %lv.full_name(), "Skipping: deactivating");
            return Ok(());
        }

        let mut dev = self.deps.devices.open(&vg.name)?;
        let info = dev.info(&lv, Layer::Top, true)?;
        if !info.exists {
            return Ok(());
        }

        if lv.is_visible() {
            if info.open_count > 0 {
                return Err(VolcoordError::DeviceBusy(format!(
                    "LV {} in use: not deactivating",
                    lv.full_name()
                )));
            }
            if lv.is_origin() {
                for snapshot in lv.snapshots() {
                    let snap_info = dev.info(&snapshot, Layer::Top, true)?;
                    if snap_info.exists && snap_info.open_count > 0 {
                        return Err(VolcoordError::DeviceBusy(format!(
                            "Snapshot volume {} of origin {} is open",
                            snapshot.full_name(),
                            lv.full_name()
                        )));
                    }
                }
            }
        }

        self.monitor(ctx, lv, false, false);

        let removed = {
            let _reclaim = ctx.reclaim_guard();
            dev.deactivate(&lv)
        };
        self.drop_hold(lvid);
        removed?;

        if dev.info(&lv, Layer::Top, false)?.exists {
            return Err(VolcoordError::DeviceLayer(format!(
                "{} still exists after deactivation",
                lv.full_name()
            )));
        }
        info!(lv = %lv.full_name(), "deactivated");
        Ok(())
    }

    /// Suspend a volume and its dependents, preloading pending tables first.
    ///
    /// A missing or already suspended device is a success unless
    /// `error_if_not_suspended` is set.
    pub fn suspend(
        &self,
        ctx: &ProcessContext,
        lvid: &LvId,
        origin_only: bool,
        error_if_not_suspended: bool,
    ) -> Result<()> {
        let result = self.suspend_inner(ctx, lvid, origin_only, error_if_not_suspended);
        self.record(result)
    }

    fn suspend_inner(
        &self,
        ctx: &ProcessContext,
        lvid: &LvId,
        origin_only: bool,
        error_if_not_suspended: bool,
    ) -> Result<()> {
        if !ctx.activation() {
            return Ok(());
        }

        let vg = self.resolve(lvid, false)?;
        let vg_pre = self.resolve(lvid, true)?;
        let lv = vg.require(lvid)?;
        let lv_pre = vg_pre.require(lvid)?;

        // origin-only scoping needs both metadata versions to agree
        let origin_only = origin_only && lv.is_origin() && lv_pre.is_origin();

        if ctx.test_mode() {
            debug!(lv = %lv.full_name(), origin_only, "Skipping: suspending");
            return Ok(());
        }

        let mut dev = self.deps.devices.open(&vg.name)?;
        let info = dev.info(&lv, layer_for(origin_only), false)?;
        if !info.exists || info.suspended {
            if error_if_not_suspended {
                return Err(VolcoordError::DeviceLayer(format!(
                    "{} is not active",
                    lv.full_name()
                )));
            }
            if info.suspended {
                self.ensure_hold(ctx, lvid);
            }
            return Ok(());
        }

        let read_ahead = lv.calculate_read_ahead();
        let mut flush_required = false;
        if vg_pre.precommitted {
            let options = TableOptions {
                origin_only,
                exclusive: false,
                read_ahead: lv_pre.calculate_read_ahead(),
                mirror_in_sync: ctx.mirror_in_sync(),
            };
            flush_required = dev.preload(&lv_pre, options)?;
            debug!(lv = %lv.full_name(), flush_required, "preloaded precommitted tables");
        }

        self.monitor(ctx, lv, origin_only, false);

        let reclaim = ctx.reclaim_guard();
        let lockfs = !origin_only && (lv_pre.is_origin() || lv_pre.is_cow());
        let freeze = if lockfs {
            Some(FreezeGuard::freeze(Arc::clone(&self.deps.freezer), &lv)?)
        } else {
            None
        };

        suspend_tree(
            dev.as_mut(),
            lv,
            origin_only,
            SuspendOptions {
                origin_only,
                lockfs,
                flush_required,
            },
            read_ahead,
        )?;

        self.store_hold(
            lvid,
            TransitionHold {
                _reclaim: reclaim,
                _freeze: freeze,
            },
        );
        info!(lv = %lv.full_name(), origin_only, lockfs, "suspended");
        Ok(())
    }

    /// Resume a suspended volume and its dependents.
    ///
    /// A missing or not suspended device is a success unless
    /// `error_if_not_active` is set.
    pub fn resume(
        &self,
        ctx: &ProcessContext,
        lvid: &LvId,
        origin_only: bool,
        error_if_not_active: bool,
    ) -> Result<()> {
        let result = self.resume_inner(ctx, lvid, origin_only, error_if_not_active);
        self.record(result)
    }

    fn resume_inner(
        &self,
        ctx: &ProcessContext,
        lvid: &LvId,
        origin_only: bool,
        error_if_not_active: bool,
    ) -> Result<()> {
        if !ctx.activation() {
            return Ok(());
        }

        let vg = self.resolve(lvid, false)?;
        let lv = vg.require(lvid)?;
        let origin_only = origin_only && lv.is_origin();

        if ctx.test_mode() {
            debug!(lv = %lv.full_name(), origin_only, "Skipping: resuming");
            return Ok(());
        }

        let mut dev = self.deps.devices.open(&vg.name)?;
        let info = dev.info(&lv, layer_for(origin_only), false)?;
        if !info.exists || !info.suspended {
            if error_if_not_active {
                return Err(VolcoordError::DeviceLayer(format!(
                    "{} is not suspended",
                    lv.full_name()
                )));
            }
            return Ok(());
        }

        let resumed = resume_tree(dev.as_mut(), lv, origin_only);
        // the transition is over either way
        self.drop_hold(lvid);
        resumed?;
        info!(lv = %lv.full_name(), origin_only, "resumed");

        self.monitor(ctx, lv, origin_only, true);
        Ok(())
    }

    /// Register or unregister event monitoring for a volume and its dependents.
    ///
    /// Returns `Ok(false)` on a soft failure (registration still pending).
    pub fn set_monitoring(&self, ctx: &ProcessContext, lvid: &LvId, enable: bool) -> Result<bool> {
        let result = self.resolve(lvid, false).and_then(|vg| {
            let lv = vg.require(lvid)?;
            set_monitoring(
                self.deps.monitor.as_ref(),
                &self.monitor_policy,
                ctx,
                lv,
                false,
                enable,
            )
        });
        self.record(result)
    }

    /// Activation snapshot of a volume; origin-only queries an origin's real layer.
    pub fn info(&self, ctx: &ProcessContext, lvid: &LvId, origin_only: bool) -> Result<LvInfo> {
        if !ctx.activation() {
            return Ok(LvInfo::default());
        }
        let result = self.resolve(lvid, false).and_then(|vg| {
            let lv = vg.require(lvid)?;
            let layer = layer_for(origin_only && lv.is_origin());
            self.deps.devices.open(&vg.name)?.info(&lv, layer, true)
        });
        self.record(result)
    }

    /// Whether a volume is active anywhere in the cluster.
    pub fn is_active(&self, ctx: &ProcessContext, lvid: &LvId) -> Result<bool> {
        if self.info(ctx, lvid, false)?.exists {
            return Ok(true);
        }

        let vg = self.resolve(lvid, false)?;
        if !vg.clustered {
            return Ok(false);
        }

        let answer = self
            .locks
            .as_ref()
            .map_or(RemoteHold::Unknown, |locks| locks.query_remote_held(lvid.as_str()));
        match answer {
            RemoteHold::NotHeld => Ok(false),
            RemoteHold::HeldElsewhere => Ok(true),
            RemoteHold::Unknown => {
                // probe: a local exclusive activation only succeeds when nobody else has it
                if self.activate(ctx, lvid, true, false).is_ok() {
                    if let Err(e) = self.deactivate(ctx, lvid) {
                        warn!(lv = %lvid, error = %e, "failed to deactivate probe activation");
                    }
                    return Ok(false);
                }
                Ok(true)
            }
        }
    }

    /// Number of visible volumes of `vg` with a device present.
    pub fn lvs_in_vg_activated(&self, ctx: &ProcessContext, vg: &str) -> Result<usize> {
        self.count_visible(ctx, vg, |info| info.exists)
    }

    /// Number of visible volumes of `vg` whose device is open.
    pub fn lvs_in_vg_opened(&self, ctx: &ProcessContext, vg: &str) -> Result<usize> {
        self.count_visible(ctx, vg, |info| info.exists && info.open_count > 0)
    }

    fn count_visible(
        &self,
        ctx: &ProcessContext,
        vg_name: &str,
        predicate: impl Fn(&LvInfo) -> bool,
    ) -> Result<usize> {
        if !ctx.activation() {
            return Ok(0);
        }
        let result = self.deps.metadata.volume_group(vg_name).and_then(|vg| {
            let mut dev = self.deps.devices.open(&vg.name)?;
            let mut count = 0;
            for lv in vg.lvs().filter(|lv| lv.is_visible()) {
                if predicate(&dev.info(&lv, Layer::Top, true)?) {
                    count += 1;
                }
            }
            Ok(count)
        });
        self.record(result)
    }

    /// Fill level of a snapshot delta, in percent.
    pub fn snapshot_percent(&self, ctx: &ProcessContext, lvid: &LvId) -> Result<f64> {
        let result = self.with_active_device(ctx, lvid, |dev, lv| dev.snapshot_percent(lv));
        self.record(result)
    }

    /// Synchronization progress of a mirror.
    pub fn mirror_percent(&self, ctx: &ProcessContext, lvid: &LvId, wait: bool) -> Result<SyncProgress> {
        let result = self.resolve(lvid, false).and_then(|vg| {
            let lv = vg.require(lvid)?;
            // a mirror reduced to a single linear area is in sync by definition
            if lv.is_single_linear_area() {
                return Ok(SyncProgress {
                    percent: 100.0,
                    event_nr: 0,
                });
            }
            self.with_active_device(ctx, lvid, |dev, lv| dev.mirror_percent(lv, wait))
        });
        self.record(result)
    }

    fn with_active_device<T>(
        &self,
        ctx: &ProcessContext,
        lvid: &LvId,
        op: impl FnOnce(&mut dyn DeviceHandle, &LvRef<'_>) -> Result<T>,
    ) -> Result<T> {
        if !ctx.activation() {
            return Err(VolcoordError::DeviceLayer(
                "activation is disabled".to_string(),
            ));
        }
        let vg = self.resolve(lvid, false)?;
        let lv = vg.require(lvid)?;
        let mut dev = self.deps.devices.open(&vg.name)?;
        if !dev.info(&lv, Layer::Top, false)?.exists {
            return Err(VolcoordError::DeviceLayer(format!(
                "{} is not active",
                lv.full_name()
            )));
        }
        op(dev.as_mut(), &lv)
    }

    /// Create the device nodes of an active volume.
    pub fn make_device_nodes(&self, ctx: &ProcessContext, lvid: &LvId) -> Result<()> {
        if !ctx.activation() {
            return Ok(());
        }
        let result = self.resolve(lvid, false).and_then(|vg| {
            let lv = vg.require(lvid)?;
            self.deps.devices.open(&vg.name)?.make_nodes(&lv)
        });
        self.record(result)
    }

    /// Kernel target modules a volume and its dependents need.
    pub fn list_lv_modules(&self, lvid: &LvId) -> Result<Vec<&'static str>> {
        let vg = self.resolve(lvid, false)?;
        Ok(required_modules(vg.require(lvid)?))
    }

    /// Activation filter decision for a volume, without activating it.
    pub fn activation_filter(&self, ctx: &ProcessContext, lvid: &LvId) -> Result<bool> {
        if !ctx.activation() {
            return Ok(true);
        }
        let vg = self.resolve(lvid, false)?;
        Ok(self.filter.passes(&vg.require(lvid)?))
    }
}

impl std::fmt::Debug for ActivationEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ActivationEngine")
            .field("filter", &self.filter)
            .field("monitor_policy", &self.monitor_policy)
            .field("held_transitions", &self.held_transitions())
            .finish()
    }
}

fn layer_for(origin_only: bool) -> Layer {
    if origin_only { Layer::Real } else { Layer::Top }
}

/// Suspend `root` and then each live dependent, parents first.
///
/// When a dependent fails, the volumes already suspended are resumed again
/// in reverse order before the error is returned.
fn suspend_tree(
    dev: &mut dyn DeviceHandle,
    root: LvRef<'_>,
    origin_only: bool,
    options: SuspendOptions,
    read_ahead: u32,
) -> Result<()> {
    let mut suspended: Vec<LvRef<'_>> = Vec::new();
    for visit in Traversal::new(root, origin_only) {
        let is_root = visit.lv.id() == root.id();
        if !is_root {
            let info = dev.info(&visit.lv, Layer::Top, false)?;
            if !info.exists || info.suspended {
                continue;
            }
        }
        let step = if is_root {
            options
        } else {
            SuspendOptions {
                origin_only: false,
                lockfs: false,
                flush_required: options.flush_required,
            }
        };
        if let Err(e) = dev.suspend(&visit.lv, step) {
            for lv in suspended.iter().rev() {
                let undo = TableOptions {
                    origin_only: lv.id() == root.id() && origin_only,
                    read_ahead,
                    ..TableOptions::default()
                };
                if let Err(undo_err) = dev.activate(lv, undo) {
                    warn!(lv = %lv.full_name(), error = %undo_err, "failed to resume after aborted suspend");
                }
            }
            return Err(e);
        }
        suspended.push(visit.lv);
    }
    Ok(())
}

/// Resume every suspended volume of the tree, dependents first.
fn resume_tree(dev: &mut dyn DeviceHandle, root: LvRef<'_>, origin_only: bool) -> Result<()> {
    let visits: Vec<_> = Traversal::new(root, origin_only).collect();
    for visit in visits.iter().rev() {
        let is_root = visit.lv.id() == root.id();
        if !is_root {
            let info = dev.info(&visit.lv, Layer::Top, false)?;
            if !info.exists || !info.suspended {
                continue;
            }
        }
        dev.activate(
            &visit.lv,
            TableOptions {
                origin_only: visit.origin_only,
                read_ahead: visit.lv.calculate_read_ahead(),
                ..TableOptions::default()
            },
        )?;
    }
    Ok(())
}
