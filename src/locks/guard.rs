//! RAII lock guard implementation.

use super::manager::LockManager;
use super::types::{LockId, LockMode};
use crate::error::Result;
use std::sync::Arc;
use tracing::{debug, warn};

/// RAII guard for a lock held through a [`LockManager`].
///
/// When dropped, the lock is released. If the release fails, a warning is
/// logged but no panic occurs.
pub struct LockGuard {
    manager: Arc<dyn LockManager>,

    /// Name of the lock.
    name: String,

    id: LockId,

    /// Whether the lock has been released manually.
    released: bool,
}

impl LockGuard {
    /// Acquire `name` in `mode` and wrap it in a guard.
    pub fn acquire(
        manager: Arc<dyn LockManager>,
        name: &str,
        mode: LockMode,
        noqueue: bool,
    ) -> Result<Self> {
        let id = manager.acquire(name, mode, noqueue)?;
        debug!(lock = name, %mode, %id, "guarded lock taken");
        Ok(Self {
            manager,
            name: name.to_string(),
            id,
            released: false,
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn id(&self) -> LockId {
        self.id
    }

    /// Manually release the lock.
    ///
    /// This is useful when the caller wants to report a release failure
    /// instead of only logging it.
    pub fn release(mut self) -> Result<()> {
        self.released = true;
        self.manager.release(&self.name, self.id)
    }
}

impl Drop for LockGuard {
    fn drop(&mut self) {
        if !self.released
            && let Err(e) = self.manager.release(&self.name, self.id)
        {
            warn!(lock = %self.name, error = %e, "failed to release lock");
        }
    }
}

impl std::fmt::Debug for LockGuard {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LockGuard")
            .field("name", &self.name)
            .field("id", &self.id)
            .field("released", &self.released)
            .finish()
    }
}
