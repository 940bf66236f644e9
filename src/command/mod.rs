//! Client command handling.
//!
//! Commands arrive as [`CommandMessage`]s, run through the
//! [`LockCoordinator`]'s pre/do/post phases and answer through a
//! [`ReplyBuffer`]. Per-client state lives in a [`ClientSession`], usually
//! owned by a [`SessionWorker`].

mod coordinator;
mod message;
mod reply;
mod session;
mod worker;


pub use coordinator::{
    ClusterOps, CommandOutcome, CoordinatorDeps, LockCoordinator, TEST_LOCK_NAME,
};
pub use message::{CommandCode, CommandMessage, LockArgs, NodeReply};
pub use reply::ReplyBuffer;
pub use session::{ClientSession, ExtensionKind, SessionExtension};
pub use worker::SessionWorker;
