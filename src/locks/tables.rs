//! Bookkeeping of the locks a session or the daemon holds.
//!
//! These tables record what this process opened; they never cache the
//! global lock state. Mutual exclusion between nodes comes from the lock
//! manager alone.

use super::manager::LockManager;
use super::types::{LockId, LockMode, LockRequest};
use crate::error::{Result, VolcoordError};
use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, Mutex, MutexGuard};
use tracing::{debug, warn};

/// Volume-group locks opened by one client session.
///
/// Every remaining entry is force-released when the table is dropped.
pub struct VgLockTable {
    manager: Arc<dyn LockManager>,
    entries: BTreeMap<String, LockId>,
}

impl VgLockTable {
    pub fn new(manager: Arc<dyn LockManager>) -> Self {
        Self {
            manager,
            entries: BTreeMap::new(),
        }
    }

    /// Apply a volume-group lock request: unlock, or acquire/convert.
    pub fn apply(&mut self, name: &str, request: LockRequest) -> Result<()> {
        let mode = match request.lock_type.lock_mode() {
            None => return self.unlock(name),
            // plain read locks are not supported by the lock manager
            Some(LockMode::CR) => LockMode::PR,
            Some(mode) => mode,
        };
        self.lock(name, mode, request.nonblock)
    }

    /// Take `name` in `mode`, converting it when this session already holds it.
    pub fn lock(&mut self, name: &str, mode: LockMode, noqueue: bool) -> Result<()> {
        if let Some(id) = self.entries.get(name) {
            self.manager.convert(name, *id, mode, noqueue)?;
            debug!(lock = name, %mode, "volume group lock converted");
            return Ok(());
        }
        let id = self.manager.acquire(name, mode, noqueue)?;
        self.entries.insert(name.to_string(), id);
        debug!(lock = name, %mode, %id, "volume group lock taken");
        Ok(())
    }

    /// Release `name`; the entry is dropped only once the release succeeded.
    pub fn unlock(&mut self, name: &str) -> Result<()> {
        let Some(id) = self.entries.get(name).copied() else {
            return Err(VolcoordError::InvalidArgument(format!(
                "volume group lock {} is not held by this session",
                name
            )));
        };
        self.manager.release(name, id)?;
        self.entries.remove(name);
        debug!(lock = name, %id, "volume group lock released");
        Ok(())
    }

    pub fn contains(&self, name: &str) -> bool {
        self.entries.contains_key(name)
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.entries.keys().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Release every remaining entry.
    pub fn release_all(&mut self) {
        for (name, id) in std::mem::take(&mut self.entries) {
            debug!(lock = %name, %id, "cleanup: releasing volume group lock");
            if let Err(e) = self.manager.release(&name, id) {
                warn!(lock = %name, error = %e, "failed to release volume group lock");
            }
        }
    }
}

impl Drop for VgLockTable {
    fn drop(&mut self) {
        self.release_all();
    }
}

impl std::fmt::Debug for VgLockTable {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("VgLockTable")
            .field("entries", &self.entries)
            .finish()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct HeldLock {
    mode: LockMode,
    id: LockId,
}

/// Volume locks held by the daemon, keyed by volume identifier.
///
/// `hold` and `release` run one at a time: the lookup, the lock manager
/// call and the table update form a single step, so two callers can never
/// both acquire the same name.
pub struct LvLockTable {
    manager: Arc<dyn LockManager>,
    entries: Mutex<HashMap<String, HeldLock>>,
    ops: Mutex<()>,
}

impl LvLockTable {
    pub fn new(manager: Arc<dyn LockManager>) -> Self {
        Self {
            manager,
            entries: Mutex::new(HashMap::new()),
            ops: Mutex::new(()),
        }
    }

    pub fn manager(&self) -> &Arc<dyn LockManager> {
        &self.manager
    }

    fn entries(&self) -> MutexGuard<'_, HashMap<String, HeldLock>> {
        self.entries.lock().unwrap_or_else(|p| p.into_inner())
    }

    /// Mode `name` is held in locally, if any.
    pub fn mode(&self, name: &str) -> Option<LockMode> {
        self.entries().get(name).map(|held| held.mode)
    }

    /// Hold `name` in `mode`, converting an existing hold.
    ///
    /// Returns `true` when a new lock was taken (as opposed to converted).
    pub fn hold(&self, name: &str, mode: LockMode, noqueue: bool) -> Result<bool> {
        let _op = self.ops.lock().unwrap_or_else(|p| p.into_inner());
        let existing = self.entries().get(name).copied();
        if let Some(held) = existing {
            if held.mode != mode {
                self.manager.convert(name, held.id, mode, noqueue)?;
                self.entries()
                    .insert(name.to_string(), HeldLock { mode, id: held.id });
            }
            return Ok(false);
        }

        let id = self.manager.acquire(name, mode, noqueue)?;
        self.entries().insert(name.to_string(), HeldLock { mode, id });
        Ok(true)
    }

    /// Release `name` if held locally.
    pub fn release(&self, name: &str) -> Result<()> {
        let _op = self.ops.lock().unwrap_or_else(|p| p.into_inner());
        let existing = self.entries().get(name).copied();
        let Some(held) = existing else {
            return Ok(());
        };
        self.manager.release(name, held.id)?;
        self.entries().remove(name);
        Ok(())
    }

    /// Names of every volume held in exclusive mode, sorted.
    pub fn exclusive_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self
            .entries()
            .iter()
            .filter(|(_, held)| held.mode == LockMode::EX)
            .map(|(name, _)| name.clone())
            .collect();
        names.sort();
        names
    }

    pub fn len(&self) -> usize {
        self.entries().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries().is_empty()
    }
}

impl Drop for LvLockTable {
    fn drop(&mut self) {
        let entries = std::mem::take(&mut *self.entries());
        for (name, held) in entries {
            if let Err(e) = self.manager.release(&name, held.id) {
                warn!(lock = %name, error = %e, "failed to release volume lock");
            }
        }
    }
}

impl std::fmt::Debug for LvLockTable {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LvLockTable")
            .field("entries", &*self.entries())
            .finish()
    }
}

