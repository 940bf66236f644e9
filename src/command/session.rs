//! Per-client session state.

use crate::error::{Result, VolcoordError};
use crate::locks::{LockGuard, LockManager, VgLockTable};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::debug;

/// Which extension slot a value lives in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ExtensionKind {
    VgLocks,
    TestLock,
}

/// Typed per-session state attached by command handlers.
#[derive(Debug)]
pub enum SessionExtension {
    VgLocks(VgLockTable),
    TestLock(LockGuard),
}

impl SessionExtension {
    pub fn kind(&self) -> ExtensionKind {
        match self {
            SessionExtension::VgLocks(_) => ExtensionKind::VgLocks,
            SessionExtension::TestLock(_) => ExtensionKind::TestLock,
        }
    }
}

/// One connected client.
///
/// Locks recorded in the session's extensions are released when the
/// session is torn down or dropped.
#[derive(Debug)]
pub struct ClientSession {
    id: u64,
    extensions: HashMap<ExtensionKind, SessionExtension>,
}

impl ClientSession {
    pub fn new(id: u64) -> Self {
        Self {
            id,
            extensions: HashMap::new(),
        }
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    /// The session's volume-group lock table, created on first use.
    pub fn vg_locks_mut(&mut self, manager: &Arc<dyn LockManager>) -> Result<&mut VgLockTable> {
        let slot = self
            .extensions
            .entry(ExtensionKind::VgLocks)
            .or_insert_with(|| SessionExtension::VgLocks(VgLockTable::new(manager.clone())));
        match slot {
            SessionExtension::VgLocks(table) => Ok(table),
            other => Err(VolcoordError::InvalidArgument(format!(
                "session {} has {:?} state in its lock table slot",
                self.id,
                other.kind()
            ))),
        }
    }

    pub fn vg_locks(&self) -> Option<&VgLockTable> {
        match self.extensions.get(&ExtensionKind::VgLocks) {
            Some(SessionExtension::VgLocks(table)) => Some(table),
            _ => None,
        }
    }

    pub fn set_test_lock(&mut self, guard: LockGuard) {
        if let Some(previous) = self
            .extensions
            .insert(ExtensionKind::TestLock, SessionExtension::TestLock(guard))
        {
            debug!(session = self.id, "replacing test lock");
            drop(previous);
        }
    }

    pub fn take_test_lock(&mut self) -> Option<LockGuard> {
        match self.extensions.remove(&ExtensionKind::TestLock)? {
            SessionExtension::TestLock(guard) => Some(guard),
            other => {
                self.extensions.insert(other.kind(), other);
                None
            }
        }
    }

    pub fn has_test_lock(&self) -> bool {
        matches!(
            self.extensions.get(&ExtensionKind::TestLock),
            Some(SessionExtension::TestLock(_))
        )
    }

    /// Release everything the session holds.
    pub fn teardown(&mut self) {
        if let Some(SessionExtension::VgLocks(table)) =
            self.extensions.get_mut(&ExtensionKind::VgLocks)
            && !table.is_empty()
        {
            debug!(session = self.id, count = table.len(), "releasing session volume-group locks");
            table.release_all();
        }
        self.extensions.clear();
    }
}

impl Drop for ClientSession {
    fn drop(&mut self) {
        self.teardown();
    }
}
