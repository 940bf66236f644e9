//! Worklist traversal of the volume dependency graph.
//!
//! Starting from one volume, the traversal yields that volume and every
//! dependent that state changes must propagate to:
//! - each snapshot delta of an origin, unless the root is scoped origin-only
//! - a mirror's log volume when the log is itself mirrored
//! - every volume mapped by a segment area (stacked mappings)
//!
//! Volumes are yielded parents first, each at most once.

use crate::metadata::{LvId, LvRef};
use std::collections::{HashSet, VecDeque};

/// One step of a traversal.
#[derive(Debug, Clone, Copy)]
pub struct Visit<'a> {
    pub lv: LvRef<'a>,
    /// Only the root may be scoped origin-only; dependents never are.
    pub origin_only: bool,
}

/// Breadth-first traversal with a visited set keyed by volume identity.
pub struct Traversal<'a> {
    queue: VecDeque<Visit<'a>>,
    visited: HashSet<&'a LvId>,
}

impl<'a> Traversal<'a> {
    pub fn new(root: LvRef<'a>, origin_only: bool) -> Self {
        let mut visited = HashSet::new();
        visited.insert(root.id());
        let mut queue = VecDeque::new();
        queue.push_back(Visit {
            lv: root,
            origin_only,
        });
        Self { queue, visited }
    }

    fn enqueue(&mut self, lv: LvRef<'a>) {
        if self.visited.insert(lv.id()) {
            self.queue.push_back(Visit {
                lv,
                origin_only: false,
            });
        }
    }
}

impl<'a> Iterator for Traversal<'a> {
    type Item = Visit<'a>;

    fn next(&mut self) -> Option<Self::Item> {
        let visit = self.queue.pop_front()?;
        let lv = visit.lv;

        if !visit.origin_only && lv.is_origin() {
            for snapshot in lv.snapshots() {
                self.enqueue(snapshot);
            }
        }

        if let Some(log) = lv.mirror_log()
            && log
                .first_segment()
                .is_some_and(|seg| seg.kind.is_mirrored())
        {
            self.enqueue(log);
        }

        for segment in &lv.lv.segments {
            for id in segment.area_volumes() {
                if let Some(stacked) = lv.vg.lv(id) {
                    self.enqueue(stacked);
                }
            }
        }

        Some(visit)
    }
}

/// Kernel modules needed by `lv` and everything it depends on, deduplicated
/// in first-seen order.
pub fn required_modules(lv: LvRef<'_>) -> Vec<&'static str> {
    let mut modules = Vec::new();
    for visit in Traversal::new(lv, false) {
        for segment in &visit.lv.lv.segments {
            let Some(caps) = segment.kind.capabilities() else {
                continue;
            };
            for module in caps.modules_needed() {
                if !modules.contains(module) {
                    modules.push(*module);
                }
            }
        }
        if visit.lv.is_origin() && !modules.contains(&"snapshot") {
            modules.push("snapshot");
        }
    }
    modules
}
