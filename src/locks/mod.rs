//! Locking subsystem for volcoord.
//!
//! This module implements the lock model used by the command coordinator:
//! - the lock-mode and lock-flags bytes carried by lock commands
//! - the [`LockManager`] seam to the cluster lock service, plus
//!   [`LocalLockManager`] for single-node use
//! - per-session volume-group lock tables ([`VgLockTable`])
//! - the daemon-wide volume lock table ([`LvLockTable`])
//!
//! # Lock Modes
//!
//! The six classic modes (NL, CR, CW, PR, PW, EX) with the usual
//! compatibility rules. A plain read request on a volume group is promoted
//! to protected read before it reaches the lock manager.
//!
//! # RAII Guards
//!
//! Short-lived locks are held through [`LockGuard`], which releases the lock
//! when dropped. Volume-group tables release every remaining entry when the
//! owning session is torn down.

mod guard;
mod manager;
mod tables;
mod types;

#[cfg(test)]
mod tests;

// Re-export public API
pub use guard::LockGuard;
pub use manager::{LocalLockManager, LockManager};
pub use tables::{LvLockTable, VgLockTable};
pub use types::{LockFlags, LockId, LockMode, LockRequest, LockScope, LockType, RemoteHold, bits};
