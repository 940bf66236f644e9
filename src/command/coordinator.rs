//! Three-phase command execution.
//!
//! Every command runs as:
//! 1. `pre_command` on the session thread: cluster locks that must be held
//!    before the command reaches other nodes.
//! 2. `do_command` on every node (locally here, remotely via
//!    [`ClusterOps::broadcast`]): the actual work, serialized through one
//!    dispatch path. RESTART is the exception: a handoff can wait on its
//!    successor for a long time, so it only excludes other restarts.
//! 3. `post_command` on the session thread: release or convert what the
//!    pre-phase took.
//!
//! Volume-group locks taken in the pre-phase live in the client's session;
//! volume locks live in the coordinator's [`LvLockTable`] and span
//! commands.

use super::message::{CommandCode, CommandMessage, LockArgs, NodeReply};
use super::reply::ReplyBuffer;
use super::session::ClientSession;
use crate::activation::ActivationEngine;
use crate::config::Config;
use crate::context::{CommandModes, ProcessContext};
use crate::error::{Result, VolcoordError};
use crate::locks::{LockGuard, LockManager, LockMode, LvLockTable, bits};
use crate::metadata::LvId;
use crate::restart::{Restarter, Successor};
use crate::status;
use std::sync::{Arc, Mutex};
use tracing::{debug, error, info, warn};

/// Lock taken by TEST commands.
pub const TEST_LOCK_NAME: &str = "CLVMD_TEST";

/// Cluster membership and messaging.
pub trait ClusterOps: Send + Sync {
    /// Name of the cluster this node belongs to.
    fn cluster_name(&self) -> Result<String>;

    /// Send `message` to every other node and collect their replies.
    fn broadcast(&self, message: &CommandMessage) -> Result<Vec<NodeReply>>;
}

/// Collaborators of a [`LockCoordinator`].
#[derive(Clone)]
pub struct CoordinatorDeps {
    pub ctx: Arc<ProcessContext>,
    pub engine: Arc<ActivationEngine>,
    pub locks: Arc<dyn LockManager>,
    pub cluster: Arc<dyn ClusterOps>,
    pub successor: Arc<dyn Successor>,
}

/// What a command produced on this node and on the others.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandOutcome {
    pub node: String,
    /// Pre-phase failure status, or the local do-phase status.
    pub status: i32,
    pub payload: String,
    pub remote: Vec<NodeReply>,
    pub post_status: i32,
}

impl CommandOutcome {
    /// Local reply followed by every remote reply.
    pub fn replies(&self) -> Vec<NodeReply> {
        let mut replies = Vec::with_capacity(self.remote.len() + 1);
        replies.push(NodeReply {
            node: self.node.clone(),
            status: self.status,
            payload: self.payload.clone(),
        });
        replies.extend(self.remote.iter().cloned());
        replies
    }

    pub fn succeeded(&self) -> bool {
        self.status == status::SUCCESS
            && self.post_status == status::SUCCESS
            && self.remote.iter().all(|r| r.status == status::SUCCESS)
    }
}

pub struct LockCoordinator {
    ctx: Arc<ProcessContext>,
    engine: Arc<ActivationEngine>,
    locks: Arc<dyn LockManager>,
    lv_locks: LvLockTable,
    cluster: Arc<dyn ClusterOps>,
    restarter: Restarter,
    node: String,
    reply_buffer_size: usize,
    dispatch: Mutex<()>,
    restarting: Mutex<()>,
}

impl LockCoordinator {
    pub fn new(config: &Config, deps: CoordinatorDeps) -> Self {
        let node = hostname::get()
            .map(|h| h.to_string_lossy().to_string())
            .unwrap_or_else(|_| "unknown".to_string());
        Self {
            lv_locks: LvLockTable::new(deps.locks.clone()),
            restarter: Restarter::new(config.restart.clone(), deps.successor),
            ctx: deps.ctx,
            engine: deps.engine,
            locks: deps.locks,
            cluster: deps.cluster,
            node,
            reply_buffer_size: config.reply_buffer_size,
            dispatch: Mutex::new(()),
            restarting: Mutex::new(()),
        }
    }

    pub fn with_restarter(mut self, restarter: Restarter) -> Self {
        self.restarter = restarter;
        self
    }

    pub fn node_name(&self) -> &str {
        &self.node
    }

    pub fn context(&self) -> &Arc<ProcessContext> {
        &self.ctx
    }

    pub fn engine(&self) -> &Arc<ActivationEngine> {
        &self.engine
    }

    pub fn lock_manager(&self) -> &Arc<dyn LockManager> {
        &self.locks
    }

    pub fn lv_locks(&self) -> &LvLockTable {
        &self.lv_locks
    }

    /// Run a client command through all three phases.
    ///
    /// The post-phase runs exactly once, whether or not the earlier phases
    /// succeeded.
    pub fn process(&self, session: &mut ClientSession, msg: &CommandMessage) -> CommandOutcome {
        let mut reply = ReplyBuffer::with_capacity(self.reply_buffer_size);

        let (status, remote) = match self.pre_command(session, msg) {
            Ok(()) => {
                let status = self.do_command(Some(&*session), msg, &mut reply);
                let remote = match self.cluster.broadcast(msg) {
                    Ok(replies) => replies,
                    Err(e) => {
                        warn!(command = msg.code, error = %e, "broadcast failed");
                        Vec::new()
                    }
                };
                (status, remote)
            }
            Err(e) => {
                warn!(session = session.id(), command = msg.code, error = %e, "pre-command failed");
                reply.write_str(status::describe(e.status()));
                (e.status(), Vec::new())
            }
        };

        let post_status = match self.post_command(session, msg) {
            Ok(()) => status::SUCCESS,
            Err(e) => {
                warn!(session = session.id(), command = msg.code, error = %e, "post-command failed");
                e.status()
            }
        };

        CommandOutcome {
            node: self.node.clone(),
            status,
            payload: reply.text().unwrap_or_default().to_string(),
            remote,
            post_status,
        }
    }

    /// Take the cluster locks a command needs before it is broadcast.
    pub fn pre_command(&self, session: &mut ClientSession, msg: &CommandMessage) -> Result<()> {
        let code = msg.command().ok_or_else(|| {
            VolcoordError::InvalidArgument(format!("unknown command {}", msg.code))
        })?;
        debug!(session = session.id(), command = %code, "pre-command");

        match code {
            CommandCode::Test => {
                let guard =
                    LockGuard::acquire(self.locks.clone(), TEST_LOCK_NAME, LockMode::EX, false)?;
                session.set_test_lock(guard);
                Ok(())
            }
            CommandCode::LockVg => {
                let args = msg.lock_args()?;
                if is_vg_lock_name(&args.name) {
                    let request = args.request()?;
                    session.vg_locks_mut(&self.locks)?.apply(&args.name, request)?;
                }
                Ok(())
            }
            CommandCode::LockLv => {
                let args = msg.lock_args()?;
                self.pre_lock_lv(&args)
            }
            CommandCode::Refresh
            | CommandCode::GetClusterName
            | CommandCode::SetDebug
            | CommandCode::VgBackup
            | CommandCode::Restart
            | CommandCode::LockQuery => Ok(()),
        }
    }

    /// Execute a command on this node.
    ///
    /// `session` is `None` for commands relayed from another node. The
    /// returned status is 0 on success; on failure the reply holds the
    /// error text.
    pub fn do_command(
        &self,
        session: Option<&ClientSession>,
        msg: &CommandMessage,
        reply: &mut ReplyBuffer,
    ) -> i32 {
        let Some(code) = msg.command() else {
            reply.write_str(status::describe(status::EINVAL));
            return status::EINVAL;
        };
        let _dispatch = (code != CommandCode::Restart)
            .then(|| self.dispatch.lock().unwrap_or_else(|p| p.into_inner()));
        debug!(node = %msg.node, command = %code, local = session.is_some(), "do-command");

        if code == CommandCode::LockQuery && reply.capacity() < 3 {
            return status::EIO;
        }

        match self.execute(code, session, msg, reply) {
            Ok(()) => status::SUCCESS,
            Err(e) => {
                let code_status = e.status();
                let text = match (code, code_status) {
                    (CommandCode::LockLv, status::EIO) => {
                        self.engine.last_error().unwrap_or_else(|| e.to_string())
                    }
                    _ => status::describe(code_status).to_string(),
                };
                warn!(command = %code, status = code_status, error = %e, "command failed");
                reply.write_str(&text);
                code_status
            }
        }
    }

    /// Release or convert what the pre-phase took.
    pub fn post_command(&self, session: &mut ClientSession, msg: &CommandMessage) -> Result<()> {
        let Some(code) = msg.command() else {
            return Ok(());
        };
        match code {
            CommandCode::Test => match session.take_test_lock() {
                Some(guard) => guard.release(),
                None => Ok(()),
            },
            CommandCode::LockLv => {
                let args = msg.lock_args()?;
                self.post_lock_lv(&args)
            }
            _ => Ok(()),
        }
    }

    fn execute(
        &self,
        code: CommandCode,
        session: Option<&ClientSession>,
        msg: &CommandMessage,
        reply: &mut ReplyBuffer,
    ) -> Result<()> {
        match code {
            CommandCode::Test => {
                if msg.args.len() > reply.capacity() {
                    reply.grow(msg.args.len() + 200)?;
                }
                reply.write_str(&format!(
                    "TEST from {}: {} v{}",
                    self.node,
                    msg.args_text(),
                    env!("CARGO_PKG_VERSION")
                ));
                Ok(())
            }
            CommandCode::LockVg => {
                let args = msg.lock_args()?;
                self.do_lock_vg(&args);
                Ok(())
            }
            CommandCode::LockLv => {
                let args = msg.lock_args()?;
                self.do_lock_lv(&args)
            }
            CommandCode::LockQuery => {
                let args = msg.lock_args()?;
                match self.lv_locks.mode(&args.name) {
                    Some(mode) => reply.write_str(mode.as_str()),
                    None => reply.write_str(""),
                };
                Ok(())
            }
            CommandCode::Refresh => {
                self.engine.metadata().drop_cached(None);
                Ok(())
            }
            CommandCode::SetDebug => {
                let level = *msg.args.first().ok_or_else(|| {
                    VolcoordError::InvalidArgument("SET_DEBUG without a level".to_string())
                })?;
                self.ctx.set_debug_level(level);
                info!(level, "debug level changed");
                Ok(())
            }
            CommandCode::GetClusterName => {
                let name = self.cluster.cluster_name()?;
                reply.write_str(&name);
                Ok(())
            }
            CommandCode::VgBackup => {
                // the originating node has already written its own backup
                if session.is_none() {
                    let args = msg.lock_args()?;
                    self.engine.metadata().backup(vg_name(&args.name))?;
                }
                Ok(())
            }
            CommandCode::Restart => {
                let _restarting = self.restarting.lock().unwrap_or_else(|p| p.into_inner());
                if let Err(e) = self.restarter.restart(&self.ctx, &self.lv_locks) {
                    error!(error = %e, "restart failed");
                }
                Ok(())
            }
        }
    }

    fn do_lock_vg(&self, args: &LockArgs) {
        if args.name.starts_with("P_#") {
            self.engine.metadata().drop_cached(None);
        } else if let Some(vg) = args
            .name
            .strip_prefix("V_")
            .or_else(|| args.name.strip_prefix("P_"))
        {
            self.engine.metadata().drop_cached(Some(vg));
        } else {
            debug!(lock = %args.name, "no cached metadata behind lock");
        }
    }

    fn pre_lock_lv(&self, args: &LockArgs) -> Result<()> {
        if volume_op(args.mode) == bits::LV_SUSPEND && !args.flags.test_mode() {
            self.lv_locks.hold(&args.name, LockMode::PW, true)?;
            debug!(lv = %args.name, "volume locked for suspend");
        }
        Ok(())
    }

    fn do_lock_lv(&self, args: &LockArgs) -> Result<()> {
        let _modes = self.ctx.command_modes(CommandModes {
            test_mode: args.flags.test_mode(),
            partial: args.flags.partial(),
            mirror_in_sync: args.flags.mirror_nosync(),
            monitor: args.flags.monitor(),
        });
        let lvid = LvId::new(args.name.as_str());
        let nonblock = args.mode & bits::NONBLOCK != 0;
        let origin_only = args.flags.origin_only();

        match volume_op(args.mode) {
            bits::LV_EXCLUSIVE => self.activate_lv(&lvid, LockMode::EX, nonblock),
            bits::LV_ACTIVATE => self.activate_lv(&lvid, LockMode::CR, nonblock),
            bits::LV_SUSPEND => self.engine.suspend(&self.ctx, &lvid, origin_only, false),
            bits::LV_RESUME | bits::UNLOCK => {
                self.engine.resume(&self.ctx, &lvid, origin_only, false)
            }
            bits::LV_DEACTIVATE => self.deactivate_lv(&lvid),
            other => Err(VolcoordError::InvalidArgument(format!(
                "invalid volume lock command {:#04x}",
                other
            ))),
        }
    }

    fn activate_lv(&self, lvid: &LvId, mode: LockMode, nonblock: bool) -> Result<()> {
        let name = lvid.as_str();
        if self.lv_locks.mode(name) == Some(mode) {
            debug!(lv = name, %mode, "volume lock already held");
            return Ok(());
        }

        let newly_taken = self.lv_locks.hold(name, mode, nonblock)?;

        let allowed = match self.engine.activation_filter(&self.ctx, lvid) {
            Ok(allowed) => allowed,
            Err(e) => {
                self.drop_new_lock(name, newly_taken);
                return Err(e);
            }
        };
        if !allowed {
            info!(lv = name, "not activating: volume does not pass the activation filter");
            self.drop_new_lock(name, newly_taken);
            return Ok(());
        }

        if let Err(e) = self
            .engine
            .activate(&self.ctx, lvid, mode == LockMode::EX, false)
        {
            self.drop_new_lock(name, newly_taken);
            return Err(e);
        }
        Ok(())
    }

    fn drop_new_lock(&self, name: &str, newly_taken: bool) {
        if newly_taken && let Err(e) = self.lv_locks.release(name) {
            warn!(lv = name, error = %e, "cannot drop volume lock");
        }
    }

    fn deactivate_lv(&self, lvid: &LvId) -> Result<()> {
        let name = lvid.as_str();
        if self.lv_locks.mode(name).is_none() && !self.ctx.test_mode() {
            debug!(lv = name, "volume not locked here; nothing to deactivate");
            return Ok(());
        }
        self.engine.deactivate(&self.ctx, lvid)?;
        self.lv_locks.release(name)
    }

    fn post_lock_lv(&self, args: &LockArgs) -> Result<()> {
        if volume_op(args.mode) != bits::LV_RESUME
            || self.lv_locks.mode(&args.name) != Some(LockMode::PW)
        {
            return Ok(());
        }
        let lvid = LvId::new(args.name.as_str());
        let info = self.engine.info(&self.ctx, &lvid, false)?;
        if info.exists {
            self.lv_locks.hold(&args.name, LockMode::CR, false)?;
            debug!(lv = %args.name, "volume lock back to CR after resume");
            Ok(())
        } else {
            self.lv_locks.release(&args.name)
        }
    }
}

impl std::fmt::Debug for LockCoordinator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LockCoordinator")
            .field("node", &self.node)
            .field("volume_locks", &self.lv_locks.len())
            .finish_non_exhaustive()
    }
}

/// Names that take a real volume-group lock; everything else is cache-only.
fn is_vg_lock_name(name: &str) -> bool {
    name.starts_with("V_") || name.starts_with("P_#")
}

fn vg_name(lock: &str) -> &str {
    lock.strip_prefix("V_")
        .or_else(|| lock.strip_prefix("P_"))
        .unwrap_or(lock)
}

fn volume_op(mode: u8) -> u8 {
    mode & (bits::SCOPE_MASK | bits::TYPE_MASK)
}
