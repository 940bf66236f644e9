//! Successor argument list and handoff state.

use crate::error::{Result, VolcoordError};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Version written into every handoff state file.
pub const HANDOFF_VERSION: u32 = 1;

/// State passed from the running daemon to its successor.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HandoffState {
    pub version: u32,
    pub debug_level: u8,
    /// Volume locks the successor must take over in exclusive mode.
    pub exclusive_locks: Vec<String>,
    pub predecessor_pid: u32,
    pub created_at: DateTime<Utc>,
}

impl HandoffState {
    pub fn to_json(&self) -> Result<String> {
        serde_json::to_string_pretty(self)
            .map_err(|e| VolcoordError::Handoff(format!("cannot serialize handoff state: {}", e)))
    }

    pub fn from_json(text: &str) -> Result<Self> {
        serde_json::from_str(text)
            .map_err(|e| VolcoordError::Handoff(format!("cannot parse handoff state: {}", e)))
    }
}

/// Source of the allocations a restart plan needs.
///
/// Building the plan must be able to fail cleanly, so every allocation goes
/// through this seam instead of the infallible collection methods.
pub trait ArgAllocator: Send + Sync {
    /// Reserve room for `additional` more entries in `list`.
    fn reserve(&self, list: &mut Vec<String>, additional: usize) -> Result<()>;

    /// Copy `text` into a new string.
    fn copy(&self, text: &str) -> Result<String>;
}

/// Allocates from the heap with `try_reserve`.
#[derive(Debug, Default, Clone, Copy)]
pub struct HeapAllocator;

impl ArgAllocator for HeapAllocator {
    fn reserve(&self, list: &mut Vec<String>, additional: usize) -> Result<()> {
        list.try_reserve_exact(additional).map_err(|e| {
            VolcoordError::ResourceExhaustion(format!("restart argument list: {}", e))
        })
    }

    fn copy(&self, text: &str) -> Result<String> {
        let mut copy = String::new();
        copy.try_reserve_exact(text.len()).map_err(|e| {
            VolcoordError::ResourceExhaustion(format!("restart argument: {}", e))
        })?;
        copy.push_str(text);
        Ok(copy)
    }
}

/// How to launch the successor and what to hand it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RestartPlan {
    pub program: PathBuf,
    /// Full argument vector, program first.
    pub args: Vec<String>,
    pub handoff_path: PathBuf,
    pub state: HandoffState,
}

impl RestartPlan {
    /// Build the plan for handing `exclusive_locks` over.
    ///
    /// Nothing outside the returned value is touched, so a failure leaves
    /// the caller's state as it was.
    pub fn build(
        program: &Path,
        handoff_path: &Path,
        debug_level: u8,
        exclusive_locks: &[String],
        predecessor_pid: u32,
        alloc: &dyn ArgAllocator,
    ) -> Result<Self> {
        let program_text = program.to_string_lossy();
        let handoff_text = handoff_path.to_string_lossy();

        let count = 1 + usize::from(debug_level > 0) + 2 * exclusive_locks.len() + 2;
        let mut args = Vec::new();
        alloc.reserve(&mut args, count)?;
        args.push(alloc.copy(&program_text)?);
        if debug_level > 0 {
            args.push(alloc.copy(&format!("-d{}", debug_level))?);
        }
        for name in exclusive_locks {
            args.push(alloc.copy("-E")?);
            args.push(alloc.copy(name)?);
        }
        args.push(alloc.copy("--handoff")?);
        args.push(alloc.copy(&handoff_text)?);

        let mut locks = Vec::new();
        alloc.reserve(&mut locks, exclusive_locks.len())?;
        for name in exclusive_locks {
            locks.push(alloc.copy(name)?);
        }

        Ok(Self {
            program: program.to_path_buf(),
            args,
            handoff_path: handoff_path.to_path_buf(),
            state: HandoffState {
                version: HANDOFF_VERSION,
                debug_level,
                exclusive_locks: locks,
                predecessor_pid,
                created_at: Utc::now(),
            },
        })
    }

    /// Lock names passed with `-E`.
    pub fn exclusive_lock_args(&self) -> Vec<&str> {
        self.args
            .windows(2)
            .filter(|pair| pair[0] == "-E")
            .map(|pair| pair[1].as_str())
            .collect()
    }
}
