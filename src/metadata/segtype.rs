//! Segment types and their capabilities.
//!
//! The set of segment kinds is closed. Each known kind carries a static
//! capability object; an unrecognised kind (metadata written by a newer
//! tool) has none and cannot be activated.

use serde::{Deserialize, Serialize};

/// Per-kind behavior consulted by the activation engine.
pub trait SegmentCapabilities: Send + Sync {
    /// Kernel mapping target name.
    fn target_name(&self) -> &'static str;

    /// Kernel modules the target needs beyond the built-in ones.
    fn modules_needed(&self) -> &'static [&'static str] {
        &[]
    }

    /// Event monitor plugin for this kind; `None` when the kind is not monitorable.
    fn monitor_dso(&self) -> Option<&'static str> {
        None
    }

    /// Whether the kind keeps several copies of the data in sync.
    fn mirrored(&self) -> bool {
        false
    }
}

struct LinearOps;
struct StripedOps;
struct MirrorOps;
struct SnapshotOps;
struct ZeroOps;
struct ErrorOps;

impl SegmentCapabilities for LinearOps {
    fn target_name(&self) -> &'static str {
        "linear"
    }
}

impl SegmentCapabilities for StripedOps {
    fn target_name(&self) -> &'static str {
        "striped"
    }
}

impl SegmentCapabilities for MirrorOps {
    fn target_name(&self) -> &'static str {
        "mirror"
    }

    fn modules_needed(&self) -> &'static [&'static str] {
        &["mirror"]
    }

    fn monitor_dso(&self) -> Option<&'static str> {
        Some("libdevmapper-event-lvm2mirror.so")
    }

    fn mirrored(&self) -> bool {
        true
    }
}

impl SegmentCapabilities for SnapshotOps {
    fn target_name(&self) -> &'static str {
        "snapshot"
    }

    fn modules_needed(&self) -> &'static [&'static str] {
        &["snapshot"]
    }

    fn monitor_dso(&self) -> Option<&'static str> {
        Some("libdevmapper-event-lvm2snapshot.so")
    }
}

impl SegmentCapabilities for ZeroOps {
    fn target_name(&self) -> &'static str {
        "zero"
    }

    fn modules_needed(&self) -> &'static [&'static str] {
        &["zero"]
    }
}

impl SegmentCapabilities for ErrorOps {
    fn target_name(&self) -> &'static str {
        "error"
    }
}

/// Mapping target of a segment.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SegmentKind {
    Linear,
    Striped,
    Mirror,
    Snapshot,
    Zero,
    Error,
    /// A segment type this host does not recognise.
    Unknown(String),
}

impl SegmentKind {
    /// Capabilities of a known kind; `None` for [`SegmentKind::Unknown`].
    pub fn capabilities(&self) -> Option<&'static dyn SegmentCapabilities> {
        match self {
            SegmentKind::Linear => Some(&LinearOps),
            SegmentKind::Striped => Some(&StripedOps),
            SegmentKind::Mirror => Some(&MirrorOps),
            SegmentKind::Snapshot => Some(&SnapshotOps),
            SegmentKind::Zero => Some(&ZeroOps),
            SegmentKind::Error => Some(&ErrorOps),
            SegmentKind::Unknown(_) => None,
        }
    }

    pub fn is_known(&self) -> bool {
        self.capabilities().is_some()
    }

    pub fn is_mirrored(&self) -> bool {
        self.capabilities().is_some_and(|caps| caps.mirrored())
    }

    pub fn name(&self) -> &str {
        match self {
            SegmentKind::Unknown(name) => name,
            known => known
                .capabilities()
                .map(|caps| caps.target_name())
                .unwrap_or("unknown"),
        }
    }
}

impl std::fmt::Display for SegmentKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}
