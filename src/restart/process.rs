//! Successor launched as a child process.

use super::handoff::{Successor, SuccessorHandle};
use super::plan::RestartPlan;
use crate::error::{Result, VolcoordError};
use std::process::{Child, Command};
use tracing::{debug, warn};

/// Spawns the plan's program with the plan's arguments.
#[derive(Debug, Default, Clone, Copy)]
pub struct ProcessSuccessor;

impl Successor for ProcessSuccessor {
    fn launch(&self, plan: &RestartPlan) -> Result<Box<dyn SuccessorHandle>> {
        let child = Command::new(&plan.program)
            .args(plan.args.iter().skip(1))
            .spawn()
            .map_err(|e| {
                VolcoordError::Handoff(format!(
                    "cannot launch {}: {}",
                    plan.program.display(),
                    e
                ))
            })?;
        debug!(pid = child.id(), program = %plan.program.display(), "successor launched");
        Ok(Box::new(ChildHandle(child)))
    }
}

struct ChildHandle(Child);

impl SuccessorHandle for ChildHandle {
    fn exited(&mut self) -> Option<String> {
        match self.0.try_wait() {
            Ok(Some(status)) => Some(status.to_string()),
            Ok(None) => None,
            Err(e) => Some(e.to_string()),
        }
    }

    fn abort(&mut self) {
        let pid = self.0.id();
        // an already exited child makes kill fail; the wait still reaps it
        if let Err(e) = self.0.kill() {
            debug!(pid, error = %e, "successor kill");
        }
        match self.0.wait() {
            Ok(status) => debug!(pid, %status, "successor stopped"),
            Err(e) => warn!(pid, error = %e, "cannot reap successor"),
        }
    }
}
