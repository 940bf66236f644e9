//! Volume metadata seam.
//!
//! Parsing on-disk metadata and the extent allocator live outside this
//! crate. What the coordinator needs is a read-only view of a volume group
//! (committed and precommitted versions), cache invalidation and backups,
//! which [`MetadataSource`] provides. The data model here is the minimum
//! the activation engine walks: volumes, their segments, and the
//! origin/snapshot, mirror/log and stacked-area relations between them.

mod model;
mod segtype;


pub use model::{Area, LogicalVolume, LvId, LvRef, ReadAhead, Segment, VolumeGroup};
pub use segtype::{SegmentCapabilities, SegmentKind};

use crate::error::Result;
use std::sync::Arc;

/// Read access to volume group metadata.
pub trait MetadataSource: Send + Sync {
    /// Resolve the volume group holding `lv`.
    ///
    /// With `precommitted` set, the pending metadata version is returned when
    /// one exists, otherwise the committed one.
    fn volume_group_for(&self, lv: &LvId, precommitted: bool) -> Result<Arc<VolumeGroup>>;

    /// Resolve a volume group by name from committed metadata.
    fn volume_group(&self, name: &str) -> Result<Arc<VolumeGroup>>;

    /// Drop cached metadata for one volume group, or for all of them.
    fn drop_cached(&self, vg: Option<&str>);

    /// Write a metadata backup for a volume group.
    fn backup(&self, vg: &str) -> Result<()>;
}
