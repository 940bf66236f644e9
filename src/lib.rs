//! volcoord: cluster volume activation coordinator.
//!
//! Serializes cluster-wide volume operations behind a distributed lock
//! manager ([`command`], [`locks`]) and drives local logical volumes through
//! activate / suspend / resume / deactivate transitions against the kernel
//! device-mapping layer ([`activation`]). A running daemon can hand its
//! exclusive locks to a fresh copy of itself ([`restart`]).
//!
//! The device layer, event monitor, lock manager, metadata and cluster
//! transport are traits; embedding daemons supply the implementations.

pub mod activation;
pub mod command;
pub mod config;
pub mod context;
pub mod error;
pub mod fs;
pub mod locks;
pub mod metadata;
pub mod restart;
pub mod status;

#[cfg(test)]
mod test_support;

pub use error::{Result, VolcoordError};
