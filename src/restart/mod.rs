//! Daemon restart without dropping exclusive volume locks.
//!
//! - [`plan`]: the successor's argument list and the serialized handoff state
//! - [`handoff`]: the predecessor/successor acknowledgement protocol
//! - [`process`]: launching the successor as a child process

pub mod handoff;
pub mod plan;
pub mod process;


pub use handoff::{
    HandoffAck, Restarter, Successor, SuccessorHandle, accept_handoff, complete_handoff,
    done_path, ready_path,
};
pub use plan::{ArgAllocator, HANDOFF_VERSION, HandoffState, HeapAllocator, RestartPlan};
pub use process::ProcessSuccessor;
