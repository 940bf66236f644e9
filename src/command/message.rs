//! Command message layout.
//!
//! `{origin node, NUL-terminated} {command code: 1 byte} {arguments}`. Lock
//! commands carry `{lock-mode byte} {flags byte} {lock name, NUL-terminated}`
//! as their arguments.

use crate::error::{Result, VolcoordError};
use crate::locks::{LockFlags, LockRequest};

/// Commands understood by the coordinator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CommandCode {
    Test,
    LockVg,
    Refresh,
    GetClusterName,
    SetDebug,
    VgBackup,
    Restart,
    LockLv,
    LockQuery,
}

impl CommandCode {
    pub fn from_byte(byte: u8) -> Option<Self> {
        match byte {
            4 => Some(CommandCode::Test),
            33 => Some(CommandCode::LockVg),
            40 => Some(CommandCode::Refresh),
            41 => Some(CommandCode::GetClusterName),
            42 => Some(CommandCode::SetDebug),
            43 => Some(CommandCode::VgBackup),
            44 => Some(CommandCode::Restart),
            50 => Some(CommandCode::LockLv),
            51 => Some(CommandCode::LockQuery),
            _ => None,
        }
    }

    pub fn as_byte(&self) -> u8 {
        match self {
            CommandCode::Test => 4,
            CommandCode::LockVg => 33,
            CommandCode::Refresh => 40,
            CommandCode::GetClusterName => 41,
            CommandCode::SetDebug => 42,
            CommandCode::VgBackup => 43,
            CommandCode::Restart => 44,
            CommandCode::LockLv => 50,
            CommandCode::LockQuery => 51,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            CommandCode::Test => "TEST",
            CommandCode::LockVg => "LOCK_VG",
            CommandCode::Refresh => "REFRESH",
            CommandCode::GetClusterName => "GET_CLUSTERNAME",
            CommandCode::SetDebug => "SET_DEBUG",
            CommandCode::VgBackup => "VG_BACKUP",
            CommandCode::Restart => "RESTART",
            CommandCode::LockLv => "LOCK_LV",
            CommandCode::LockQuery => "LOCK_QUERY",
        }
    }
}

impl std::fmt::Display for CommandCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

/// One command as received from a client or a peer node.
///
/// The code stays a raw byte so that unknown commands can be rejected by the
/// pre-phase rather than by the decoder.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandMessage {
    pub node: String,
    pub code: u8,
    pub args: Vec<u8>,
}

impl CommandMessage {
    pub fn new(node: &str, code: CommandCode, args: Vec<u8>) -> Self {
        Self {
            node: node.to_string(),
            code: code.as_byte(),
            args,
        }
    }

    /// A lock command: mode byte, flags byte and NUL-terminated lock name.
    pub fn lock(node: &str, code: CommandCode, mode: u8, flags: u8, name: &str) -> Self {
        let mut args = Vec::with_capacity(name.len() + 3);
        args.push(mode);
        args.push(flags);
        args.extend_from_slice(name.as_bytes());
        args.push(0);
        Self::new(node, code, args)
    }

    pub fn command(&self) -> Option<CommandCode> {
        CommandCode::from_byte(self.code)
    }

    pub fn decode(bytes: &[u8]) -> Result<Self> {
        let nul = bytes.iter().position(|b| *b == 0).ok_or_else(|| {
            VolcoordError::InvalidArgument("command message has no node terminator".to_string())
        })?;
        let node = std::str::from_utf8(&bytes[..nul])
            .map_err(|_| VolcoordError::InvalidArgument("node name is not UTF-8".to_string()))?;
        let code = *bytes.get(nul + 1).ok_or_else(|| {
            VolcoordError::InvalidArgument("command message has no command code".to_string())
        })?;
        Ok(Self {
            node: node.to_string(),
            code,
            args: bytes[nul + 2..].to_vec(),
        })
    }

    pub fn encode(&self) -> Vec<u8> {
        let mut bytes = Vec::with_capacity(self.node.len() + 2 + self.args.len());
        bytes.extend_from_slice(self.node.as_bytes());
        bytes.push(0);
        bytes.push(self.code);
        bytes.extend_from_slice(&self.args);
        bytes
    }

    /// Arguments read as text, up to the first NUL.
    pub fn args_text(&self) -> String {
        let end = self
            .args
            .iter()
            .position(|b| *b == 0)
            .unwrap_or(self.args.len());
        String::from_utf8_lossy(&self.args[..end]).into_owned()
    }

    pub fn lock_args(&self) -> Result<LockArgs> {
        if self.args.len() < 2 {
            return Err(VolcoordError::InvalidArgument(format!(
                "lock command carries {} argument bytes",
                self.args.len()
            )));
        }
        let rest = &self.args[2..];
        let end = rest.iter().position(|b| *b == 0).unwrap_or(rest.len());
        let name = std::str::from_utf8(&rest[..end])
            .map_err(|_| VolcoordError::InvalidArgument("lock name is not UTF-8".to_string()))?;
        if name.is_empty() {
            return Err(VolcoordError::InvalidArgument("empty lock name".to_string()));
        }
        Ok(LockArgs {
            mode: self.args[0],
            flags: LockFlags::from_bits(self.args[1]),
            name: name.to_string(),
        })
    }
}

/// Arguments of a lock command.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LockArgs {
    /// Raw lock-mode byte.
    pub mode: u8,
    pub flags: LockFlags,
    pub name: String,
}

impl LockArgs {
    pub fn request(&self) -> Result<LockRequest> {
        LockRequest::decode(self.mode)
    }
}

/// Reply from one node.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NodeReply {
    pub node: String,
    pub status: i32,
    pub payload: String,
}
