//! Local volume activation.
//!
//! This module drives the kernel mapping layer through safe state
//! transitions for one logical volume at a time:
//! - [`filter`]: whether a volume may be activated on this host
//! - [`devices`]: the device-mapping and filesystem seams
//! - [`graph`]: traversal of the dependencies a transition must follow
//! - [`monitor`]: event monitor registration
//! - [`engine`]: the activate / deactivate / suspend / resume state machine

pub mod devices;
pub mod engine;
pub mod filter;
pub mod graph;
pub mod monitor;


pub use devices::{
    DeviceHandle, DeviceManager, FilesystemFreezer, FreezeGuard, Layer, LvInfo, SuspendOptions,
    SyncProgress, TableOptions,
};
pub use engine::{ActivationEngine, EngineDeps};
pub use filter::{FilterPolicy, passes_activation_filter};
pub use monitor::{EventMonitor, MonitorPolicy, MonitorStatus, MonitorTarget};
