//! Lock manager seam and the in-process implementation.

use super::types::{LockId, LockMode, RemoteHold};
use crate::error::{Result, VolcoordError};
use std::collections::{HashMap, HashSet};
use std::sync::{Condvar, Mutex, MutexGuard};
use tracing::debug;

/// A cluster-wide named lock service.
pub trait LockManager: Send + Sync {
    /// Take `name` in `mode`.
    ///
    /// With `noqueue` set, a conflicting request fails with
    /// [`VolcoordError::WouldBlock`] instead of waiting.
    fn acquire(&self, name: &str, mode: LockMode, noqueue: bool) -> Result<LockId>;

    /// Change the mode of a held lock in place.
    fn convert(&self, name: &str, id: LockId, mode: LockMode, noqueue: bool) -> Result<()>;

    fn release(&self, name: &str, id: LockId) -> Result<()>;

    /// Whether another node holds `name`.
    fn query_remote_held(&self, name: &str) -> RemoteHold;
}

#[derive(Debug, Default)]
struct Table {
    next_id: u64,
    holders: HashMap<String, Vec<(LockId, LockMode)>>,
}

impl Table {
    fn conflicts(&self, name: &str, mode: LockMode, except: Option<LockId>) -> bool {
        self.holders.get(name).is_some_and(|held| {
            held.iter()
                .filter(|(id, _)| Some(*id) != except)
                .any(|(_, other)| !mode.compatible_with(*other))
        })
    }
}

/// Single-node lock manager with the classic six-mode compatibility rules.
///
/// Blocking requests wait on a condition variable until every conflicting
/// holder has released or converted down. "Remote" holders are simulated
/// by a set of names; with remote queries disabled every query answers
/// [`RemoteHold::Unknown`].
#[derive(Debug)]
pub struct LocalLockManager {
    table: Mutex<Table>,
    changed: Condvar,
    remote: Mutex<Option<HashSet<String>>>,
}

impl LocalLockManager {
    pub fn new() -> Self {
        Self {
            table: Mutex::new(Table::default()),
            changed: Condvar::new(),
            remote: Mutex::new(Some(HashSet::new())),
        }
    }

    /// A manager that cannot answer remote-hold queries.
    pub fn without_remote_queries() -> Self {
        let manager = Self::new();
        *manager.remote.lock().unwrap_or_else(|p| p.into_inner()) = None;
        manager
    }

    /// Report `name` as held by another node from now on.
    pub fn mark_held_elsewhere(&self, name: &str) {
        if let Some(names) = self
            .remote
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .as_mut()
        {
            names.insert(name.to_string());
        }
    }

    /// Modes currently granted on `name`.
    pub fn holders(&self, name: &str) -> Vec<LockMode> {
        self.lock_table()
            .holders
            .get(name)
            .map(|held| held.iter().map(|(_, mode)| *mode).collect())
            .unwrap_or_default()
    }

    /// Total number of granted locks.
    pub fn granted(&self) -> usize {
        self.lock_table().holders.values().map(Vec::len).sum()
    }

    fn lock_table(&self) -> MutexGuard<'_, Table> {
        self.table.lock().unwrap_or_else(|p| p.into_inner())
    }

    fn wait_until_free<'a>(
        &self,
        mut table: MutexGuard<'a, Table>,
        name: &str,
        mode: LockMode,
        except: Option<LockId>,
        noqueue: bool,
    ) -> Result<MutexGuard<'a, Table>> {
        while table.conflicts(name, mode, except) {
            if noqueue {
                return Err(VolcoordError::WouldBlock(format!(
                    "{} cannot be granted in {} mode",
                    name, mode
                )));
            }
            table = self
                .changed
                .wait(table)
                .unwrap_or_else(|p| p.into_inner());
        }
        Ok(table)
    }
}

impl Default for LocalLockManager {
    fn default() -> Self {
        Self::new()
    }
}

impl LockManager for LocalLockManager {
    fn acquire(&self, name: &str, mode: LockMode, noqueue: bool) -> Result<LockId> {
        let table = self.lock_table();
        let mut table = self.wait_until_free(table, name, mode, None, noqueue)?;
        table.next_id += 1;
        let id = LockId(table.next_id);
        table
            .holders
            .entry(name.to_string())
            .or_default()
            .push((id, mode));
        debug!(lock = name, %mode, %id, "lock granted");
        Ok(id)
    }

    fn convert(&self, name: &str, id: LockId, mode: LockMode, noqueue: bool) -> Result<()> {
        let table = self.lock_table();
        let known = table
            .holders
            .get(name)
            .is_some_and(|held| held.iter().any(|(held_id, _)| *held_id == id));
        if !known {
            return Err(VolcoordError::InvalidArgument(format!(
                "lock {} is not held on {}",
                id, name
            )));
        }

        let mut table = self.wait_until_free(table, name, mode, Some(id), noqueue)?;
        if let Some(entry) = table
            .holders
            .get_mut(name)
            .and_then(|held| held.iter_mut().find(|(held_id, _)| *held_id == id))
        {
            entry.1 = mode;
        }
        debug!(lock = name, %mode, %id, "lock converted");
        self.changed.notify_all();
        Ok(())
    }

    fn release(&self, name: &str, id: LockId) -> Result<()> {
        let mut table = self.lock_table();
        let Some(held) = table.holders.get_mut(name) else {
            return Err(VolcoordError::InvalidArgument(format!(
                "lock {} is not held on {}",
                id, name
            )));
        };
        let Some(pos) = held.iter().position(|(held_id, _)| *held_id == id) else {
            return Err(VolcoordError::InvalidArgument(format!(
                "lock {} is not held on {}",
                id, name
            )));
        };
        held.remove(pos);
        if held.is_empty() {
            table.holders.remove(name);
        }
        debug!(lock = name, %id, "lock released");
        self.changed.notify_all();
        Ok(())
    }

    fn query_remote_held(&self, name: &str) -> RemoteHold {
        match self
            .remote
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .as_ref()
        {
            None => RemoteHold::Unknown,
            Some(names) if names.contains(name) => RemoteHold::HeldElsewhere,
            Some(_) => RemoteHold::NotHeld,
        }
    }
}
