//! Reply status codes.
//!
//! Statuses are errno-compatible so a reply can be negated and relayed to
//! the originating node unchanged:
//! - 0: Success
//! - 1: Operation not permitted (activation filter veto)
//! - 5: I/O error (device layer, lock manager, metadata)
//! - 11: Try again (non-blocking lock conflict)
//! - 12: Out of memory
//! - 16: Device busy
//! - 22: Invalid argument
//! - 95: Operation not supported (unknown segment type)

/// Successful execution.
pub const SUCCESS: i32 = 0;

/// Operation not permitted.
pub const EPERM: i32 = 1;

/// I/O error.
pub const EIO: i32 = 5;

/// Resource temporarily unavailable.
pub const EAGAIN: i32 = 11;

/// Cannot allocate memory.
pub const ENOMEM: i32 = 12;

/// Device or resource busy.
pub const EBUSY: i32 = 16;

/// Invalid argument.
pub const EINVAL: i32 = 22;

/// Operation not supported.
pub const EOPNOTSUPP: i32 = 95;

/// Plain system-error text for a status, used as the reply payload.
pub fn describe(status: i32) -> &'static str {
    match status {
        SUCCESS => "Success",
        EPERM => "Operation not permitted",
        EIO => "Input/output error",
        EAGAIN => "Resource temporarily unavailable",
        ENOMEM => "Cannot allocate memory",
        EBUSY => "Device or resource busy",
        EINVAL => "Invalid argument",
        EOPNOTSUPP => "Operation not supported",
        _ => "Unknown error",
    }
}
