//! Device-mapping layer and filesystem seams.
//!
//! The concrete ioctl layer lives outside this crate. A [`DeviceManager`]
//! opens a per-volume-group [`DeviceHandle`]; dropping the handle destroys
//! it. Suspends that need a consistent filesystem go through a
//! [`FilesystemFreezer`], whose freeze is held as a [`FreezeGuard`].

use crate::error::Result;
use crate::metadata::{LvId, LvRef};
use std::sync::Arc;
use tracing::debug;

/// Activation snapshot of one volume, as reported by the kernel.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct LvInfo {
    pub exists: bool,
    pub suspended: bool,
    pub open_count: u32,
    pub major: i32,
    pub minor: i32,
    pub read_only: bool,
    pub live_table: bool,
    pub inactive_table: bool,
    pub read_ahead: u32,
}

/// Which device of a volume to address.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Layer {
    /// The volume's visible device.
    Top,
    /// The hidden "real" device under a snapshot origin.
    Real,
}

/// Options for loading mapping tables.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TableOptions {
    /// Touch only the origin, leaving its snapshots alone.
    pub origin_only: bool,
    /// Activate for exclusive use on this node.
    pub exclusive: bool,
    /// Read-ahead to program, in sectors.
    pub read_ahead: u32,
    /// Load mirrors as already in sync, skipping the initial resync.
    pub mirror_in_sync: bool,
}

/// Options for a suspend.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SuspendOptions {
    pub origin_only: bool,
    /// The filesystem on top was frozen for this suspend.
    pub lockfs: bool,
    /// Outstanding I/O must be flushed (preloaded tables changed size).
    pub flush_required: bool,
}

/// Mirror synchronization progress.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SyncProgress {
    pub percent: f64,
    pub event_nr: u32,
}

/// Factory for per-volume-group device handles.
pub trait DeviceManager: Send + Sync {
    /// Open a handle for the devices of `vg`.
    fn open(&self, vg: &str) -> Result<Box<dyn DeviceHandle>>;
}

/// Operations on the kernel mapping layer for one volume group.
pub trait DeviceHandle {
    fn info(&mut self, lv: &LvRef<'_>, layer: Layer, with_open_count: bool) -> Result<LvInfo>;

    /// Load and resume the tables of `lv` (activation and resume).
    fn activate(&mut self, lv: &LvRef<'_>, options: TableOptions) -> Result<()>;

    /// Load tables into the inactive slot without switching to them.
    ///
    /// Returns whether the later suspend must flush outstanding I/O.
    fn preload(&mut self, lv: &LvRef<'_>, options: TableOptions) -> Result<bool>;

    fn suspend(&mut self, lv: &LvRef<'_>, options: SuspendOptions) -> Result<()>;

    fn deactivate(&mut self, lv: &LvRef<'_>) -> Result<()>;

    fn snapshot_percent(&mut self, lv: &LvRef<'_>) -> Result<f64>;

    fn mirror_percent(&mut self, lv: &LvRef<'_>, wait: bool) -> Result<SyncProgress>;

    fn make_nodes(&mut self, lv: &LvRef<'_>) -> Result<()>;
}

/// Filesystem freeze/thaw around suspends of origins and snapshot deltas.
pub trait FilesystemFreezer: Send + Sync {
    fn freeze(&self, lv: &LvRef<'_>) -> Result<()>;
    fn thaw(&self, lv: &LvId);
}

/// Held filesystem freeze; thawed when dropped.
pub struct FreezeGuard {
    freezer: Arc<dyn FilesystemFreezer>,
    lv: LvId,
}

impl FreezeGuard {
    pub fn freeze(freezer: Arc<dyn FilesystemFreezer>, lv: &LvRef<'_>) -> Result<Self> {
        freezer.freeze(lv)?;
        debug!(lv = %lv.full_name(), "filesystem frozen");
        Ok(Self {
            freezer,
            lv: lv.id().clone(),
        })
    }
}

impl Drop for FreezeGuard {
    fn drop(&mut self) {
        self.freezer.thaw(&self.lv);
        debug!(lv = %self.lv, "filesystem thawed");
    }
}

impl std::fmt::Debug for FreezeGuard {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FreezeGuard").field("lv", &self.lv).finish()
    }
}
