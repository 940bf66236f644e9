//! Filesystem helpers for the restart handoff.
//!
//! The handoff state and its acknowledgements are small JSON files that a
//! second process polls for, so they must never be observed half-written.

pub mod atomic;

pub use atomic::{atomic_write, remove_if_exists};
