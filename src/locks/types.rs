//! Lock modes, request bitfields and identifiers.

use crate::error::{Result, VolcoordError};

/// Bits of the lock-mode byte carried by lock commands.
pub mod bits {
    pub const TYPE_MASK: u8 = 0x07;
    pub const NULL: u8 = 0x00;
    pub const READ: u8 = 0x01;
    pub const PREAD: u8 = 0x03;
    pub const WRITE: u8 = 0x04;
    pub const EXCL: u8 = 0x05;
    pub const UNLOCK: u8 = 0x06;

    pub const SCOPE_MASK: u8 = 0x08;
    pub const VG: u8 = 0x00;
    pub const LV: u8 = 0x08;

    pub const NONBLOCK: u8 = 0x10;
    pub const HOLD: u8 = 0x20;

    // Volume operations
    pub const LV_EXCLUSIVE: u8 = LV | EXCL;
    pub const LV_SUSPEND: u8 = LV | WRITE;
    pub const LV_RESUME: u8 = LV | UNLOCK;
    pub const LV_ACTIVATE: u8 = LV | READ;
    pub const LV_DEACTIVATE: u8 = LV | NULL;
}

/// Lock manager modes, weakest first.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum LockMode {
    /// Null: holds a place, grants nothing.
    NL,
    /// Concurrent read.
    CR,
    /// Concurrent write.
    CW,
    /// Protected read.
    PR,
    /// Protected write.
    PW,
    /// Exclusive.
    EX,
}

impl LockMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            LockMode::NL => "NL",
            LockMode::CR => "CR",
            LockMode::CW => "CW",
            LockMode::PR => "PR",
            LockMode::PW => "PW",
            LockMode::EX => "EX",
        }
    }

    /// Whether a lock in `self` may be granted while `other` is held.
    pub fn compatible_with(self, other: LockMode) -> bool {
        use LockMode::*;
        match (self, other) {
            (NL, _) | (_, NL) => true,
            (CR, EX) | (EX, CR) => false,
            (CR, _) | (_, CR) => true,
            (CW, CW) | (PR, PR) => true,
            _ => false,
        }
    }
}

impl std::fmt::Display for LockMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The type bits of a lock-mode byte.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LockType {
    Null,
    Read,
    PRead,
    Write,
    Exclusive,
    Unlock,
}

impl LockType {
    pub fn from_bits(byte: u8) -> Option<Self> {
        match byte & bits::TYPE_MASK {
            bits::NULL => Some(LockType::Null),
            bits::READ => Some(LockType::Read),
            bits::PREAD => Some(LockType::PRead),
            bits::WRITE => Some(LockType::Write),
            bits::EXCL => Some(LockType::Exclusive),
            bits::UNLOCK => Some(LockType::Unlock),
            _ => None,
        }
    }

    pub fn bits(&self) -> u8 {
        match self {
            LockType::Null => bits::NULL,
            LockType::Read => bits::READ,
            LockType::PRead => bits::PREAD,
            LockType::Write => bits::WRITE,
            LockType::Exclusive => bits::EXCL,
            LockType::Unlock => bits::UNLOCK,
        }
    }

    /// Lock manager mode for an acquiring type; `None` for [`LockType::Unlock`].
    pub fn lock_mode(&self) -> Option<LockMode> {
        match self {
            LockType::Null => Some(LockMode::NL),
            LockType::Read => Some(LockMode::CR),
            LockType::PRead => Some(LockMode::PR),
            LockType::Write => Some(LockMode::PW),
            LockType::Exclusive => Some(LockMode::EX),
            LockType::Unlock => None,
        }
    }
}

/// What a lock command applies to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LockScope {
    VolumeGroup,
    Volume,
}

/// Decoded lock-mode byte.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LockRequest {
    pub scope: LockScope,
    pub lock_type: LockType,
    /// Fail immediately instead of queueing behind a conflicting holder.
    pub nonblock: bool,
    pub hold: bool,
}

impl LockRequest {
    pub fn new(scope: LockScope, lock_type: LockType) -> Self {
        Self {
            scope,
            lock_type,
            nonblock: false,
            hold: false,
        }
    }

    pub fn nonblocking(mut self) -> Self {
        self.nonblock = true;
        self
    }

    pub fn decode(byte: u8) -> Result<Self> {
        let lock_type = LockType::from_bits(byte).ok_or_else(|| {
            VolcoordError::InvalidArgument(format!("invalid lock type in mode byte {:#04x}", byte))
        })?;
        let scope = if byte & bits::SCOPE_MASK == bits::LV {
            LockScope::Volume
        } else {
            LockScope::VolumeGroup
        };
        Ok(Self {
            scope,
            lock_type,
            nonblock: byte & bits::NONBLOCK != 0,
            hold: byte & bits::HOLD != 0,
        })
    }

    pub fn encode(&self) -> u8 {
        let mut byte = self.lock_type.bits();
        if self.scope == LockScope::Volume {
            byte |= bits::LV;
        }
        if self.nonblock {
            byte |= bits::NONBLOCK;
        }
        if self.hold {
            byte |= bits::HOLD;
        }
        byte
    }
}

/// Flags byte of a lock command.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct LockFlags(u8);

impl LockFlags {
    pub const PARTIAL: u8 = 0x01;
    pub const MIRROR_NOSYNC: u8 = 0x02;
    pub const DMEVENTD_MONITOR: u8 = 0x04;
    pub const ORIGIN_ONLY: u8 = 0x08;
    pub const TEST: u8 = 0x10;

    pub fn from_bits(bits: u8) -> Self {
        Self(bits)
    }

    pub fn bits(&self) -> u8 {
        self.0
    }

    pub fn contains(&self, flag: u8) -> bool {
        self.0 & flag != 0
    }

    pub fn partial(&self) -> bool {
        self.contains(Self::PARTIAL)
    }

    pub fn origin_only(&self) -> bool {
        self.contains(Self::ORIGIN_ONLY)
    }

    pub fn test_mode(&self) -> bool {
        self.contains(Self::TEST)
    }

    pub fn monitor(&self) -> bool {
        self.contains(Self::DMEVENTD_MONITOR)
    }

    pub fn mirror_nosync(&self) -> bool {
        self.contains(Self::MIRROR_NOSYNC)
    }
}

/// Opaque lock identifier handed out by a lock manager.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct LockId(pub u64);

impl std::fmt::Display for LockId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:#x}", self.0)
    }
}

/// Answer to "is this lock held by another node?".
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RemoteHold {
    NotHeld,
    HeldElsewhere,
    /// The lock manager cannot tell.
    Unknown,
}
