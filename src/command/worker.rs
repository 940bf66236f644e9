//! One thread per client session.

use super::coordinator::{CommandOutcome, LockCoordinator};
use super::message::CommandMessage;
use super::session::ClientSession;
use crate::error::{Result, VolcoordError};
use std::sync::Arc;
use std::sync::mpsc::{self, Receiver, Sender};
use std::thread::JoinHandle;
use tracing::{debug, warn};

struct Job {
    msg: CommandMessage,
    reply: Sender<CommandOutcome>,
}

/// Runs a client's commands in submission order on a dedicated thread.
///
/// The worker owns the client's [`ClientSession`]; dropping the worker
/// tears the session down, releasing its volume-group locks.
pub struct SessionWorker {
    id: u64,
    jobs: Option<Sender<Job>>,
    thread: Option<JoinHandle<()>>,
}

impl SessionWorker {
    pub fn spawn(coordinator: Arc<LockCoordinator>, id: u64) -> Result<Self> {
        let (jobs, queue) = mpsc::channel::<Job>();
        let thread = std::thread::Builder::new()
            .name(format!("session-{}", id))
            .spawn(move || run(coordinator, id, queue))
            .map_err(|e| {
                VolcoordError::ResourceExhaustion(format!("cannot start session {}: {}", id, e))
            })?;
        debug!(session = id, "session worker started");
        Ok(Self {
            id,
            jobs: Some(jobs),
            thread: Some(thread),
        })
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    /// Queue a command; the outcome arrives on the returned channel.
    pub fn submit(&self, msg: CommandMessage) -> Result<Receiver<CommandOutcome>> {
        let (reply, outcome) = mpsc::channel();
        self.jobs
            .as_ref()
            .ok_or_else(|| self.gone())?
            .send(Job { msg, reply })
            .map_err(|_| self.gone())?;
        Ok(outcome)
    }

    /// Queue a command and wait for its outcome.
    pub fn execute(&self, msg: CommandMessage) -> Result<CommandOutcome> {
        self.submit(msg)?.recv().map_err(|_| self.gone())
    }

    fn gone(&self) -> VolcoordError {
        VolcoordError::InvalidArgument(format!("session {} has shut down", self.id))
    }
}

fn run(coordinator: Arc<LockCoordinator>, id: u64, queue: Receiver<Job>) {
    let mut session = ClientSession::new(id);
    for job in queue {
        let outcome = coordinator.process(&mut session, &job.msg);
        if job.reply.send(outcome).is_err() {
            debug!(session = id, "client stopped waiting for a reply");
        }
    }
    session.teardown();
    debug!(session = id, "session worker stopped");
}

impl Drop for SessionWorker {
    fn drop(&mut self) {
        self.jobs.take();
        if let Some(thread) = self.thread.take()
            && thread.join().is_err()
        {
            warn!(session = self.id, "session worker panicked");
        }
    }
}

impl std::fmt::Debug for SessionWorker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionWorker")
            .field("id", &self.id)
            .finish_non_exhaustive()
    }
}
