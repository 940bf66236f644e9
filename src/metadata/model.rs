//! Volume group and logical volume data model.

use super::segtype::SegmentKind;
use crate::error::{Result, VolcoordError};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Read-ahead used when a volume asks for automatic sizing and no segment
/// suggests anything larger, in 512-byte sectors.
const DEFAULT_READ_AHEAD_SECTORS: u32 = 256;

/// Stable identity of a logical volume (its uuid).
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct LvId(String);

impl LvId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for LvId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for LvId {
    fn from(id: &str) -> Self {
        Self::new(id)
    }
}

/// Read-ahead setting of a volume.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReadAhead {
    #[default]
    Auto,
    Sectors(u32),
}

/// One area of a segment.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Area {
    /// Extents on a physical volume.
    Physical { pv: String },
    /// Extents of another logical volume (stacked mapping).
    Volume { lv: LvId },
    /// Not yet allocated.
    Unassigned,
}

/// A contiguous range of a volume bound to one mapping target.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Segment {
    pub kind: SegmentKind,
    pub areas: Vec<Area>,
    /// Mirror log volume, for mirrored segments.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub log: Option<LvId>,
    /// Stripe size in sectors (striped segments).
    #[serde(default)]
    pub stripe_size: u32,
    /// Segment is a temporary mirror used to move extents.
    #[serde(default)]
    pub pvmove: bool,
}

impl Segment {
    pub fn new(kind: SegmentKind, areas: Vec<Area>) -> Self {
        Self {
            kind,
            areas,
            log: None,
            stripe_size: 0,
            pvmove: false,
        }
    }

    /// A single-area linear segment on `pv`.
    pub fn linear(pv: &str) -> Self {
        Self::new(
            SegmentKind::Linear,
            vec![Area::Physical { pv: pv.to_string() }],
        )
    }

    pub fn with_log(mut self, log: LvId) -> Self {
        self.log = Some(log);
        self
    }

    pub fn with_stripe_size(mut self, sectors: u32) -> Self {
        self.stripe_size = sectors;
        self
    }

    /// Volumes mapped by this segment's areas.
    pub fn area_volumes(&self) -> impl Iterator<Item = &LvId> {
        self.areas.iter().filter_map(|area| match area {
            Area::Volume { lv } => Some(lv),
            _ => None,
        })
    }
}

/// A logical volume as recorded in metadata.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LogicalVolume {
    pub id: LvId,
    pub name: String,
    #[serde(default)]
    pub tags: Vec<String>,
    /// Hidden sub-volumes (mirror legs, logs, snapshot deltas) are not visible.
    #[serde(default = "default_visible")]
    pub visible: bool,
    /// Some underlying device is missing.
    #[serde(default)]
    pub partial: bool,
    #[serde(default)]
    pub read_ahead: ReadAhead,
    pub segments: Vec<Segment>,
    /// Snapshot delta volumes of this origin.
    #[serde(default)]
    pub snapshots: Vec<LvId>,
    /// Origin, when this volume is a snapshot delta.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub origin: Option<LvId>,
}

fn default_visible() -> bool {
    true
}

impl LogicalVolume {
    pub fn new(id: impl Into<LvId>, name: &str) -> Self {
        Self {
            id: id.into(),
            name: name.to_string(),
            tags: Vec::new(),
            visible: true,
            partial: false,
            read_ahead: ReadAhead::Auto,
            segments: Vec::new(),
            snapshots: Vec::new(),
            origin: None,
        }
    }

    pub fn with_segment(mut self, segment: Segment) -> Self {
        self.segments.push(segment);
        self
    }

    pub fn with_tag(mut self, tag: &str) -> Self {
        self.tags.push(tag.to_string());
        self
    }

    pub fn hidden(mut self) -> Self {
        self.visible = false;
        self
    }

    pub fn partial(mut self) -> Self {
        self.partial = true;
        self
    }

    pub fn with_snapshot(mut self, cow: impl Into<LvId>) -> Self {
        self.snapshots.push(cow.into());
        self
    }

    pub fn snapshot_of(mut self, origin: impl Into<LvId>) -> Self {
        self.origin = Some(origin.into());
        self
    }
}

/// A volume group: a named pool hosting logical volumes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VolumeGroup {
    pub name: String,
    #[serde(default)]
    pub tags: Vec<String>,
    /// Shared across the cluster (locks are cluster-wide).
    #[serde(default)]
    pub clustered: bool,
    /// This is a pending, not yet committed, metadata version.
    #[serde(default)]
    pub precommitted: bool,
    lvs: BTreeMap<LvId, LogicalVolume>,
}

impl VolumeGroup {
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            tags: Vec::new(),
            clustered: false,
            precommitted: false,
            lvs: BTreeMap::new(),
        }
    }

    pub fn with_tag(mut self, tag: &str) -> Self {
        self.tags.push(tag.to_string());
        self
    }

    pub fn clustered(mut self) -> Self {
        self.clustered = true;
        self
    }

    pub fn precommitted(mut self) -> Self {
        self.precommitted = true;
        self
    }

    pub fn with_lv(mut self, lv: LogicalVolume) -> Self {
        self.lvs.insert(lv.id.clone(), lv);
        self
    }

    pub fn lv(&self, id: &LvId) -> Option<LvRef<'_>> {
        self.lvs.get(id).map(|lv| LvRef { vg: self, lv })
    }

    /// Like [`VolumeGroup::lv`], failing with a metadata error when absent.
    pub fn require(&self, id: &LvId) -> Result<LvRef<'_>> {
        self.lv(id).ok_or_else(|| {
            VolcoordError::Metadata(format!(
                "logical volume {} not found in volume group {}",
                id, self.name
            ))
        })
    }

    pub fn lvs(&self) -> impl Iterator<Item = LvRef<'_>> {
        self.lvs.values().map(|lv| LvRef { vg: self, lv })
    }

    pub fn contains(&self, id: &LvId) -> bool {
        self.lvs.contains_key(id)
    }
}

/// A logical volume together with the group it lives in.
#[derive(Debug, Clone, Copy)]
pub struct LvRef<'a> {
    pub vg: &'a VolumeGroup,
    pub lv: &'a LogicalVolume,
}

impl<'a> LvRef<'a> {
    pub fn id(&self) -> &'a LvId {
        &self.lv.id
    }

    pub fn name(&self) -> &'a str {
        &self.lv.name
    }

    /// `group/volume` display name.
    pub fn full_name(&self) -> String {
        format!("{}/{}", self.vg.name, self.lv.name)
    }

    pub fn is_origin(&self) -> bool {
        !self.lv.snapshots.is_empty()
    }

    pub fn is_cow(&self) -> bool {
        self.lv.origin.is_some()
    }

    pub fn is_visible(&self) -> bool {
        self.lv.visible
    }

    pub fn is_partial(&self) -> bool {
        self.lv.partial
    }

    pub fn first_segment(&self) -> Option<&'a Segment> {
        self.lv.segments.first()
    }

    pub fn has_unknown_segments(&self) -> bool {
        self.lv.segments.iter().any(|seg| !seg.kind.is_known())
    }

    /// Snapshot delta volumes of this origin that exist in the group.
    pub fn snapshots(&self) -> impl Iterator<Item = LvRef<'a>> + use<'a> {
        let vg = self.vg;
        self.lv.snapshots.iter().filter_map(move |id| vg.lv(id))
    }

    /// The mirror log of the first segment, if any.
    pub fn mirror_log(&self) -> Option<LvRef<'a>> {
        self.first_segment()
            .and_then(|seg| seg.log.as_ref())
            .and_then(|log| self.vg.lv(log))
    }

    /// Whether this volume is currently a single linear area (a mirror
    /// temporarily reduced to one leg).
    pub fn is_single_linear_area(&self) -> bool {
        self.lv.segments.len() == 1 && self.lv.segments[0].areas.len() == 1
    }

    /// Read-ahead to program into the device, in sectors.
    pub fn calculate_read_ahead(&self) -> u32 {
        match self.lv.read_ahead {
            ReadAhead::Sectors(sectors) => sectors,
            ReadAhead::Auto => self
                .lv
                .segments
                .iter()
                .filter(|seg| seg.kind == SegmentKind::Striped)
                .map(|seg| seg.stripe_size.saturating_mul(seg.areas.len() as u32))
                .max()
                .unwrap_or(0)
                .max(DEFAULT_READ_AHEAD_SECTORS),
        }
    }
}
