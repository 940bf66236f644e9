//! Error types for volcoord.
//!
//! Uses thiserror for derive macros. Every variant maps onto a numeric reply
//! status so failures can cross the command boundary as plain status codes.

use crate::status;
use thiserror::Error;

/// Main error type for volcoord operations.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum VolcoordError {
    /// An allocation (reply buffer growth, restart argument list) failed.
    #[error("out of memory: {0}")]
    ResourceExhaustion(String),

    /// Unknown lock id, malformed command, or an unsupported request.
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    /// A non-blocking request could not be granted immediately.
    #[error("lock request would block: {0}")]
    WouldBlock(String),

    /// The device is open and cannot be removed.
    #[error("{0}")]
    DeviceBusy(String),

    /// The volume contains a segment type this host cannot map.
    #[error("{0}")]
    UnsupportedSegment(String),

    /// The activation filter or an activation guard refused the volume.
    #[error("{0}")]
    PolicyDenied(String),

    /// Opaque failure reported by the device-mapping layer.
    #[error("device-mapper operation failed: {0}")]
    DeviceLayer(String),

    /// Opaque failure reported by the distributed lock manager.
    #[error("lock manager failure: {0}")]
    LockManager(String),

    /// A volume or volume group could not be resolved from metadata.
    #[error("metadata lookup failed: {0}")]
    Metadata(String),

    /// Invalid daemon settings.
    #[error("configuration error: {0}")]
    Config(String),

    /// The restart handoff could not be completed.
    #[error("restart handoff failed: {0}")]
    Handoff(String),
}

impl VolcoordError {
    /// Returns the reply status for this error.
    pub fn status(&self) -> i32 {
        match self {
            VolcoordError::ResourceExhaustion(_) => status::ENOMEM,
            VolcoordError::InvalidArgument(_) => status::EINVAL,
            VolcoordError::WouldBlock(_) => status::EAGAIN,
            VolcoordError::DeviceBusy(_) => status::EBUSY,
            VolcoordError::UnsupportedSegment(_) => status::EOPNOTSUPP,
            VolcoordError::PolicyDenied(_) => status::EPERM,
            VolcoordError::DeviceLayer(_) => status::EIO,
            VolcoordError::LockManager(_) => status::EIO,
            VolcoordError::Metadata(_) => status::EIO,
            VolcoordError::Config(_) => status::EINVAL,
            VolcoordError::Handoff(_) => status::EIO,
        }
    }
}

/// Result type alias for volcoord operations.
pub type Result<T> = std::result::Result<T, VolcoordError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_resource_exhaustion_maps_to_enomem() {
        let err = VolcoordError::ResourceExhaustion("reply buffer".to_string());
        assert_eq!(err.status(), status::ENOMEM);
    }

    #[test]
    fn test_invalid_argument_maps_to_einval() {
        let err = VolcoordError::InvalidArgument("unknown lock".to_string());
        assert_eq!(err.status(), status::EINVAL);
    }

    #[test]
    fn test_would_block_maps_to_eagain() {
        let err = VolcoordError::WouldBlock("V_vg0".to_string());
        assert_eq!(err.status(), status::EAGAIN);
    }

    #[test]
    fn test_device_failures_map_to_distinct_statuses() {
        assert_eq!(
            VolcoordError::DeviceBusy("in use".to_string()).status(),
            status::EBUSY
        );
        assert_eq!(
            VolcoordError::UnsupportedSegment("raid9".to_string()).status(),
            status::EOPNOTSUPP
        );
        assert_eq!(
            VolcoordError::PolicyDenied("filtered".to_string()).status(),
            status::EPERM
        );
        assert_eq!(
            VolcoordError::DeviceLayer("suspend".to_string()).status(),
            status::EIO
        );
    }

    #[test]
    fn test_error_messages_are_descriptive() {
        let err = VolcoordError::WouldBlock("V_vg0".to_string());
        assert_eq!(err.to_string(), "lock request would block: V_vg0");

        let err = VolcoordError::DeviceBusy("LV vg0/lv0 in use: not deactivating".to_string());
        assert_eq!(err.to_string(), "LV vg0/lv0 in use: not deactivating");
    }
}
