//! In-memory collaborators for tests.
//!
//! Every fake counts the calls it receives so tests can assert on how often
//! the device layer, the event monitor or the freezer was driven.

use crate::activation::{
    DeviceHandle, DeviceManager, EventMonitor, FilesystemFreezer, Layer, LvInfo, MonitorStatus,
    MonitorTarget, SuspendOptions, SyncProgress, TableOptions,
};
use crate::command::{ClusterOps, CommandMessage, NodeReply};
use crate::error::{Result, VolcoordError};
use crate::metadata::{LvId, LvRef, MetadataSource, VolumeGroup};
use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex};

// =============================================================================
// Metadata
// =============================================================================

#[derive(Debug, Default)]
struct MetadataState {
    committed: HashMap<String, Arc<VolumeGroup>>,
    precommitted: HashMap<String, Arc<VolumeGroup>>,
    dropped: Vec<Option<String>>,
    backups: Vec<String>,
}

#[derive(Debug, Default)]
pub(crate) struct FakeMetadata {
    state: Mutex<MetadataState>,
}

impl FakeMetadata {
    pub(crate) fn with_group(vg: VolumeGroup) -> Arc<Self> {
        let metadata = Arc::new(Self::default());
        metadata.add_group(vg);
        metadata
    }

    pub(crate) fn add_group(&self, vg: VolumeGroup) {
        self.state
            .lock()
            .unwrap()
            .committed
            .insert(vg.name.clone(), Arc::new(vg));
    }

    pub(crate) fn set_precommitted(&self, vg: VolumeGroup) {
        self.state
            .lock()
            .unwrap()
            .precommitted
            .insert(vg.name.clone(), Arc::new(vg.precommitted()));
    }

    pub(crate) fn dropped(&self) -> Vec<Option<String>> {
        self.state.lock().unwrap().dropped.clone()
    }

    pub(crate) fn backups(&self) -> Vec<String> {
        self.state.lock().unwrap().backups.clone()
    }
}

impl MetadataSource for FakeMetadata {
    fn volume_group_for(&self, lv: &LvId, precommitted: bool) -> Result<Arc<VolumeGroup>> {
        let state = self.state.lock().unwrap();
        if precommitted
            && let Some(vg) = state.precommitted.values().find(|vg| vg.contains(lv))
        {
            return Ok(Arc::clone(vg));
        }
        state
            .committed
            .values()
            .find(|vg| vg.contains(lv))
            .cloned()
            .ok_or_else(|| VolcoordError::Metadata(format!("no volume group holds {}", lv)))
    }

    fn volume_group(&self, name: &str) -> Result<Arc<VolumeGroup>> {
        self.state
            .lock()
            .unwrap()
            .committed
            .get(name)
            .cloned()
            .ok_or_else(|| VolcoordError::Metadata(format!("volume group {} not found", name)))
    }

    fn drop_cached(&self, vg: Option<&str>) {
        self.state
            .lock()
            .unwrap()
            .dropped
            .push(vg.map(str::to_string));
    }

    fn backup(&self, vg: &str) -> Result<()> {
        self.state.lock().unwrap().backups.push(vg.to_string());
        Ok(())
    }
}

// =============================================================================
// Device layer
// =============================================================================

#[derive(Debug, Clone, Copy, Default)]
pub(crate) struct FakeDevice {
    pub(crate) suspended: bool,
    pub(crate) open_count: u32,
}

#[derive(Debug, Default)]
struct DeviceState {
    devices: HashMap<LvId, FakeDevice>,
    log: Vec<String>,
    opens: usize,
    fail_suspend: HashSet<LvId>,
    fail_activate: bool,
    fail_deactivate: bool,
    keep_after_deactivate: bool,
    flush_on_preload: bool,
    snapshot_percent: f64,
    table_options: Vec<TableOptions>,
}

/// Kernel mapping layer simulated as a map of live devices.
#[derive(Debug, Clone, Default)]
pub(crate) struct FakeDeviceManager {
    state: Arc<Mutex<DeviceState>>,
}

impl FakeDeviceManager {
    pub(crate) fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Pretend `lv` is already active.
    pub(crate) fn insert_active(&self, lv: &str) {
        self.state
            .lock()
            .unwrap()
            .devices
            .insert(LvId::new(lv), FakeDevice::default());
    }

    pub(crate) fn set_open_count(&self, lv: &str, open_count: u32) {
        if let Some(device) = self.state.lock().unwrap().devices.get_mut(&LvId::new(lv)) {
            device.open_count = open_count;
        }
    }

    pub(crate) fn device(&self, lv: &str) -> Option<FakeDevice> {
        self.state.lock().unwrap().devices.get(&LvId::new(lv)).copied()
    }

    pub(crate) fn fail_suspend_of(&self, lv: &str) {
        self.state.lock().unwrap().fail_suspend.insert(LvId::new(lv));
    }

    pub(crate) fn fail_activate(&self, fail: bool) {
        self.state.lock().unwrap().fail_activate = fail;
    }

    pub(crate) fn fail_deactivate(&self, fail: bool) {
        self.state.lock().unwrap().fail_deactivate = fail;
    }

    pub(crate) fn keep_after_deactivate(&self, keep: bool) {
        self.state.lock().unwrap().keep_after_deactivate = keep;
    }

    pub(crate) fn flush_on_preload(&self, flush: bool) {
        self.state.lock().unwrap().flush_on_preload = flush;
    }

    pub(crate) fn set_snapshot_percent(&self, percent: f64) {
        self.state.lock().unwrap().snapshot_percent = percent;
    }

    /// Options of every `activate` call, in order.
    pub(crate) fn table_options(&self) -> Vec<TableOptions> {
        self.state.lock().unwrap().table_options.clone()
    }

    /// Mutating calls in order, as `op:lv` strings.
    pub(crate) fn log(&self) -> Vec<String> {
        self.state.lock().unwrap().log.clone()
    }

    pub(crate) fn calls(&self, op: &str) -> usize {
        let prefix = format!("{}:", op);
        self.state
            .lock()
            .unwrap()
            .log
            .iter()
            .filter(|entry| entry.starts_with(&prefix))
            .count()
    }

    pub(crate) fn opens(&self) -> usize {
        self.state.lock().unwrap().opens
    }
}

impl DeviceManager for FakeDeviceManager {
    fn open(&self, _vg: &str) -> Result<Box<dyn DeviceHandle>> {
        self.state.lock().unwrap().opens += 1;
        Ok(Box::new(self.clone()))
    }
}

impl DeviceHandle for FakeDeviceManager {
    fn info(&mut self, lv: &LvRef<'_>, _layer: Layer, _with_open_count: bool) -> Result<LvInfo> {
        let state = self.state.lock().unwrap();
        Ok(match state.devices.get(lv.id()) {
            Some(device) => LvInfo {
                exists: true,
                suspended: device.suspended,
                open_count: device.open_count,
                major: 253,
                minor: 0,
                read_only: false,
                live_table: true,
                inactive_table: false,
                read_ahead: lv.calculate_read_ahead(),
            },
            None => LvInfo::default(),
        })
    }

    fn activate(&mut self, lv: &LvRef<'_>, options: TableOptions) -> Result<()> {
        let mut state = self.state.lock().unwrap();
        state.log.push(format!("activate:{}", lv.id()));
        state.table_options.push(options);
        if state.fail_activate {
            return Err(VolcoordError::DeviceLayer(format!("cannot load table for {}", lv.id())));
        }
        let device = state.devices.entry(lv.id().clone()).or_default();
        device.suspended = false;
        Ok(())
    }

    fn preload(&mut self, lv: &LvRef<'_>, _options: TableOptions) -> Result<bool> {
        let mut state = self.state.lock().unwrap();
        state.log.push(format!("preload:{}", lv.id()));
        Ok(state.flush_on_preload)
    }

    fn suspend(&mut self, lv: &LvRef<'_>, _options: SuspendOptions) -> Result<()> {
        let mut state = self.state.lock().unwrap();
        state.log.push(format!("suspend:{}", lv.id()));
        if state.fail_suspend.contains(lv.id()) {
            return Err(VolcoordError::DeviceLayer(format!("cannot suspend {}", lv.id())));
        }
        match state.devices.get_mut(lv.id()) {
            Some(device) => {
                device.suspended = true;
                Ok(())
            }
            None => Err(VolcoordError::DeviceLayer(format!("{} does not exist", lv.id()))),
        }
    }

    fn deactivate(&mut self, lv: &LvRef<'_>) -> Result<()> {
        let mut state = self.state.lock().unwrap();
        state.log.push(format!("deactivate:{}", lv.id()));
        if state.fail_deactivate {
            return Err(VolcoordError::DeviceLayer(format!("cannot remove {}", lv.id())));
        }
        if !state.keep_after_deactivate {
            state.devices.remove(lv.id());
        }
        Ok(())
    }

    fn snapshot_percent(&mut self, _lv: &LvRef<'_>) -> Result<f64> {
        Ok(self.state.lock().unwrap().snapshot_percent)
    }

    fn mirror_percent(&mut self, _lv: &LvRef<'_>, _wait: bool) -> Result<SyncProgress> {
        Ok(SyncProgress {
            percent: 42.0,
            event_nr: 7,
        })
    }

    fn make_nodes(&mut self, lv: &LvRef<'_>) -> Result<()> {
        self.state.lock().unwrap().log.push(format!("mknodes:{}", lv.id()));
        Ok(())
    }
}

// =============================================================================
// Event monitor
// =============================================================================

#[derive(Debug, Default)]
struct MonitorState {
    registered: HashSet<String>,
    stay_pending: bool,
    refuse: bool,
    queries: usize,
    registers: usize,
    unregisters: usize,
}

#[derive(Debug, Default)]
pub(crate) struct FakeEventMonitor {
    state: Mutex<MonitorState>,
}

impl FakeEventMonitor {
    pub(crate) fn preregister(&self, uuid: &str) {
        self.state.lock().unwrap().registered.insert(uuid.to_string());
    }

    pub(crate) fn is_registered(&self, uuid: &str) -> bool {
        self.state.lock().unwrap().registered.contains(uuid)
    }

    pub(crate) fn stay_pending(&self, pending: bool) {
        self.state.lock().unwrap().stay_pending = pending;
    }

    pub(crate) fn refuse_requests(&self, refuse: bool) {
        self.state.lock().unwrap().refuse = refuse;
    }

    pub(crate) fn query_calls(&self) -> usize {
        self.state.lock().unwrap().queries
    }

    pub(crate) fn register_calls(&self) -> usize {
        self.state.lock().unwrap().registers
    }

    pub(crate) fn unregister_calls(&self) -> usize {
        self.state.lock().unwrap().unregisters
    }
}

impl EventMonitor for FakeEventMonitor {
    fn registered(&self, target: &MonitorTarget) -> Result<MonitorStatus> {
        let mut state = self.state.lock().unwrap();
        state.queries += 1;
        Ok(MonitorStatus {
            monitored: state.registered.contains(&target.uuid),
            pending: state.stay_pending,
        })
    }

    fn register(&self, target: &MonitorTarget, _timeout_secs: u32) -> Result<()> {
        let mut state = self.state.lock().unwrap();
        state.registers += 1;
        if state.refuse {
            return Err(VolcoordError::DeviceLayer(format!(
                "monitor refused {}",
                target.uuid
            )));
        }
        state.registered.insert(target.uuid.clone());
        Ok(())
    }

    fn unregister(&self, target: &MonitorTarget) -> Result<()> {
        let mut state = self.state.lock().unwrap();
        state.unregisters += 1;
        if state.refuse {
            return Err(VolcoordError::DeviceLayer(format!(
                "monitor refused {}",
                target.uuid
            )));
        }
        state.registered.remove(&target.uuid);
        Ok(())
    }
}

// =============================================================================
// Filesystem freezer
// =============================================================================

#[derive(Debug, Default)]
struct FreezerState {
    frozen: HashSet<LvId>,
    freezes: usize,
    thaws: usize,
}

#[derive(Debug, Default)]
pub(crate) struct FakeFreezer {
    state: Mutex<FreezerState>,
}

impl FakeFreezer {
    pub(crate) fn is_frozen(&self, lv: &str) -> bool {
        self.state.lock().unwrap().frozen.contains(&LvId::new(lv))
    }

    pub(crate) fn freezes(&self) -> usize {
        self.state.lock().unwrap().freezes
    }

    pub(crate) fn thaws(&self) -> usize {
        self.state.lock().unwrap().thaws
    }
}

impl FilesystemFreezer for FakeFreezer {
    fn freeze(&self, lv: &LvRef<'_>) -> Result<()> {
        let mut state = self.state.lock().unwrap();
        state.freezes += 1;
        state.frozen.insert(lv.id().clone());
        Ok(())
    }

    fn thaw(&self, lv: &LvId) {
        let mut state = self.state.lock().unwrap();
        state.thaws += 1;
        state.frozen.remove(lv);
    }
}

// =============================================================================
// Cluster
// =============================================================================

#[derive(Debug, Default)]
pub(crate) struct FakeCluster {
    name: Option<String>,
    broadcasts: Mutex<Vec<CommandMessage>>,
}

impl FakeCluster {
    pub(crate) fn named(name: &str) -> Arc<Self> {
        Arc::new(Self {
            name: Some(name.to_string()),
            broadcasts: Mutex::new(Vec::new()),
        })
    }

    pub(crate) fn broadcasts(&self) -> Vec<CommandMessage> {
        self.broadcasts.lock().unwrap().clone()
    }
}

impl ClusterOps for FakeCluster {
    fn cluster_name(&self) -> Result<String> {
        self.name
            .clone()
            .ok_or_else(|| VolcoordError::LockManager("not part of a cluster".to_string()))
    }

    fn broadcast(&self, message: &CommandMessage) -> Result<Vec<NodeReply>> {
        self.broadcasts.lock().unwrap().push(message.clone());
        Ok(vec![NodeReply {
            node: "node-b".to_string(),
            status: 0,
            payload: String::new(),
        }])
    }
}

// =============================================================================
// Fixtures
// =============================================================================

/// Engine collaborators wired to fakes, kept around for assertions.
pub(crate) struct Fixture {
    pub(crate) metadata: Arc<FakeMetadata>,
    pub(crate) devices: Arc<FakeDeviceManager>,
    pub(crate) monitor: Arc<FakeEventMonitor>,
    pub(crate) freezer: Arc<FakeFreezer>,
}

impl Fixture {
    pub(crate) fn new(vg: VolumeGroup) -> Self {
        Self {
            metadata: FakeMetadata::with_group(vg),
            devices: FakeDeviceManager::new(),
            monitor: Arc::new(FakeEventMonitor::default()),
            freezer: Arc::new(FakeFreezer::default()),
        }
    }

    pub(crate) fn deps(&self) -> crate::activation::EngineDeps {
        crate::activation::EngineDeps {
            metadata: self.metadata.clone(),
            devices: self.devices.clone(),
            monitor: self.monitor.clone(),
            freezer: self.freezer.clone(),
        }
    }
}
