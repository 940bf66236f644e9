//! Tests for the locks subsystem.

use super::*;
use crate::error::VolcoordError;
use std::sync::Arc;
use std::sync::mpsc;
use std::thread;
use std::time::Duration;

fn local() -> Arc<LocalLockManager> {
    Arc::new(LocalLockManager::new())
}

#[test]
fn test_lock_mode_compatibility_matrix() {
    use LockMode::*;
    let modes = [NL, CR, CW, PR, PW, EX];
    let expected = [
        [true, true, true, true, true, true],
        [true, true, true, true, true, false],
        [true, true, true, false, false, false],
        [true, true, false, true, false, false],
        [true, true, false, false, false, false],
        [true, false, false, false, false, false],
    ];
    for (i, a) in modes.iter().enumerate() {
        for (j, b) in modes.iter().enumerate() {
            assert_eq!(a.compatible_with(*b), expected[i][j], "{} vs {}", a, b);
        }
    }
}

#[test]
fn test_lock_request_decode() {
    let request = LockRequest::decode(bits::LV_SUSPEND | bits::NONBLOCK).unwrap();
    assert_eq!(request.scope, LockScope::Volume);
    assert_eq!(request.lock_type, LockType::Write);
    assert!(request.nonblock);
    assert!(!request.hold);

    let request = LockRequest::decode(bits::VG | bits::READ | bits::HOLD).unwrap();
    assert_eq!(request.scope, LockScope::VolumeGroup);
    assert_eq!(request.lock_type, LockType::Read);
    assert!(request.hold);
    assert_eq!(request.encode(), bits::READ | bits::HOLD);
}

#[test]
fn test_lock_request_rejects_unused_type_bits() {
    let err = LockRequest::decode(0x02).unwrap_err();
    assert!(matches!(err, VolcoordError::InvalidArgument(_)));
    assert!(LockRequest::decode(0x07).is_err());
}

#[test]
fn test_lock_type_modes() {
    assert_eq!(LockType::Read.lock_mode(), Some(LockMode::CR));
    assert_eq!(LockType::PRead.lock_mode(), Some(LockMode::PR));
    assert_eq!(LockType::Write.lock_mode(), Some(LockMode::PW));
    assert_eq!(LockType::Exclusive.lock_mode(), Some(LockMode::EX));
    assert_eq!(LockType::Null.lock_mode(), Some(LockMode::NL));
    assert_eq!(LockType::Unlock.lock_mode(), None);
}

#[test]
fn test_lock_flags() {
    let flags = LockFlags::from_bits(LockFlags::PARTIAL | LockFlags::TEST);
    assert!(flags.partial());
    assert!(flags.test_mode());
    assert!(!flags.origin_only());
    assert!(!flags.monitor());
}

#[test]
fn test_local_manager_grants_compatible_locks() {
    let manager = local();
    let a = manager.acquire("V_vg0", LockMode::PR, false).unwrap();
    let b = manager.acquire("V_vg0", LockMode::PR, false).unwrap();
    assert_ne!(a, b);
    assert_eq!(manager.holders("V_vg0"), vec![LockMode::PR, LockMode::PR]);
}

#[test]
fn test_nonblocking_conflict_returns_would_block() {
    let manager = local();
    manager.acquire("V_vg0", LockMode::EX, false).unwrap();

    let err = manager.acquire("V_vg0", LockMode::PR, true).unwrap_err();
    assert!(matches!(err, VolcoordError::WouldBlock(_)));
    assert_eq!(err.status(), crate::status::EAGAIN);
    assert_eq!(manager.granted(), 1);
}

#[test]
fn test_blocking_acquire_waits_for_release() {
    let manager = local();
    let id = manager.acquire("V_vg0", LockMode::EX, false).unwrap();

    let (tx, rx) = mpsc::channel();
    let waiter = {
        let manager = Arc::clone(&manager);
        thread::spawn(move || {
            let id = manager.acquire("V_vg0", LockMode::EX, false).unwrap();
            tx.send(id).unwrap();
        })
    };

    assert!(rx.recv_timeout(Duration::from_millis(50)).is_err());
    manager.release("V_vg0", id).unwrap();
    let second = rx.recv_timeout(Duration::from_secs(5)).unwrap();
    waiter.join().unwrap();
    assert_ne!(second, id);
}

#[test]
fn test_release_unknown_id_is_invalid_argument() {
    let manager = local();
    let id = manager.acquire("V_vg0", LockMode::PR, false).unwrap();

    let err = manager.release("V_vg0", LockId(999)).unwrap_err();
    assert!(matches!(err, VolcoordError::InvalidArgument(_)));

    manager.release("V_vg0", id).unwrap();
    assert!(manager.release("V_vg0", id).is_err());
}

#[test]
fn test_convert_respects_other_holders() {
    let manager = local();
    let mine = manager.acquire("lv", LockMode::CR, false).unwrap();
    let other = manager.acquire("lv", LockMode::CR, false).unwrap();

    let err = manager.convert("lv", mine, LockMode::EX, true).unwrap_err();
    assert!(matches!(err, VolcoordError::WouldBlock(_)));

    manager.release("lv", other).unwrap();
    manager.convert("lv", mine, LockMode::EX, true).unwrap();
    assert_eq!(manager.holders("lv"), vec![LockMode::EX]);
}

#[test]
fn test_remote_hold_queries() {
    let manager = LocalLockManager::new();
    assert_eq!(manager.query_remote_held("lv"), RemoteHold::NotHeld);
    manager.mark_held_elsewhere("lv");
    assert_eq!(manager.query_remote_held("lv"), RemoteHold::HeldElsewhere);

    let blind = LocalLockManager::without_remote_queries();
    blind.mark_held_elsewhere("lv");
    assert_eq!(blind.query_remote_held("lv"), RemoteHold::Unknown);
}

#[test]
fn test_vg_table_promotes_read_to_protected_read() {
    let manager = local();
    let mut table = VgLockTable::new(manager.clone());

    table
        .apply("V_vg0", LockRequest::new(LockScope::VolumeGroup, LockType::Read))
        .unwrap();

    assert!(table.contains("V_vg0"));
    assert_eq!(manager.holders("V_vg0"), vec![LockMode::PR]);
}

#[test]
fn test_vg_table_unlock_missing_is_invalid_argument() {
    let mut table = VgLockTable::new(local());
    let err = table
        .apply("V_vg0", LockRequest::new(LockScope::VolumeGroup, LockType::Unlock))
        .unwrap_err();
    assert!(matches!(err, VolcoordError::InvalidArgument(_)));
}

#[test]
fn test_vg_table_unlock_releases_once() {
    let manager = local();
    let mut table = VgLockTable::new(manager.clone());
    table.lock("V_vg0", LockMode::EX, false).unwrap();

    table.unlock("V_vg0").unwrap();
    assert!(table.is_empty());
    assert_eq!(manager.granted(), 0);

    // a second unlock finds nothing to release
    assert!(table.unlock("V_vg0").is_err());
}

#[test]
fn test_vg_table_relock_converts_existing_entry() {
    let manager = local();
    let mut table = VgLockTable::new(manager.clone());
    table.lock("V_vg0", LockMode::PR, false).unwrap();
    table.lock("V_vg0", LockMode::EX, false).unwrap();

    assert_eq!(table.len(), 1);
    assert_eq!(manager.holders("V_vg0"), vec![LockMode::EX]);
}

#[test]
fn test_vg_table_nonblocking_conflict() {
    let manager = local();
    manager.acquire("V_vg0", LockMode::EX, false).unwrap();
    let mut table = VgLockTable::new(manager.clone());

    let err = table
        .apply(
            "V_vg0",
            LockRequest::new(LockScope::VolumeGroup, LockType::Write).nonblocking(),
        )
        .unwrap_err();

    assert!(matches!(err, VolcoordError::WouldBlock(_)));
    assert!(table.is_empty());
}

#[test]
fn test_vg_table_drop_releases_everything() {
    let manager = local();
    {
        let mut table = VgLockTable::new(manager.clone());
        table.lock("V_vg0", LockMode::EX, false).unwrap();
        table.lock("V_vg1", LockMode::PR, false).unwrap();
        table.lock("P_#global", LockMode::PR, false).unwrap();
        assert_eq!(manager.granted(), 3);
        assert_eq!(
            table.names().collect::<Vec<_>>(),
            vec!["P_#global", "V_vg0", "V_vg1"]
        );
    }
    assert_eq!(manager.granted(), 0);
}

#[test]
fn test_lv_table_hold_and_convert() {
    let manager = local();
    let table = LvLockTable::new(manager.clone());

    assert!(table.hold("lv-a", LockMode::CR, false).unwrap());
    assert!(!table.hold("lv-a", LockMode::CR, false).unwrap());
    assert!(!table.hold("lv-a", LockMode::EX, false).unwrap());

    assert_eq!(table.mode("lv-a"), Some(LockMode::EX));
    assert_eq!(manager.holders("lv-a"), vec![LockMode::EX]);
}

#[test]
fn test_lv_table_exclusive_names() {
    let table = LvLockTable::new(local());
    table.hold("lv-b", LockMode::EX, false).unwrap();
    table.hold("lv-a", LockMode::EX, false).unwrap();
    table.hold("lv-c", LockMode::CR, false).unwrap();

    assert_eq!(table.exclusive_names(), vec!["lv-a", "lv-b"]);
}

#[test]
fn test_lv_table_release_is_idempotent() {
    let manager = local();
    let table = LvLockTable::new(manager.clone());
    table.hold("lv-a", LockMode::EX, false).unwrap();

    table.release("lv-a").unwrap();
    table.release("lv-a").unwrap();

    assert_eq!(table.mode("lv-a"), None);
    assert_eq!(manager.granted(), 0);
}

/// Lock manager that takes a while to grant new locks.
struct SlowManager {
    inner: Arc<LocalLockManager>,
    delay: Duration,
}

impl LockManager for SlowManager {
    fn acquire(&self, name: &str, mode: LockMode, noqueue: bool) -> crate::Result<LockId> {
        thread::sleep(self.delay);
        self.inner.acquire(name, mode, noqueue)
    }

    fn convert(&self, name: &str, id: LockId, mode: LockMode, noqueue: bool) -> crate::Result<()> {
        self.inner.convert(name, id, mode, noqueue)
    }

    fn release(&self, name: &str, id: LockId) -> crate::Result<()> {
        self.inner.release(name, id)
    }

    fn query_remote_held(&self, name: &str) -> RemoteHold {
        self.inner.query_remote_held(name)
    }
}

#[test]
fn test_lv_table_concurrent_holds_take_one_lock() {
    let manager = local();
    let table = Arc::new(LvLockTable::new(Arc::new(SlowManager {
        inner: manager.clone(),
        delay: Duration::from_millis(20),
    })));
    let barrier = Arc::new(std::sync::Barrier::new(2));

    let handles: Vec<_> = [(LockMode::PW, true), (LockMode::CR, false)]
        .into_iter()
        .map(|(mode, noqueue)| {
            let table = Arc::clone(&table);
            let barrier = Arc::clone(&barrier);
            thread::spawn(move || {
                barrier.wait();
                table.hold("lv-x", mode, noqueue)
            })
        })
        .collect();
    let taken: Vec<bool> = handles
        .into_iter()
        .map(|h| h.join().unwrap().unwrap())
        .collect();

    assert_eq!(taken.iter().filter(|new| **new).count(), 1);
    assert_eq!(manager.holders("lv-x").len(), 1);
    assert_eq!(manager.granted(), 1);

    table.release("lv-x").unwrap();
    assert_eq!(table.mode("lv-x"), None);
    assert_eq!(manager.granted(), 0);
}

#[test]
fn test_lock_guard_releases_on_drop() {
    let manager = local();
    {
        let guard = LockGuard::acquire(manager.clone(), "CLVMD_TEST", LockMode::EX, false).unwrap();
        assert_eq!(guard.name(), "CLVMD_TEST");
        assert_eq!(manager.granted(), 1);
    }
    assert_eq!(manager.granted(), 0);
}

#[test]
fn test_lock_guard_manual_release() {
    let manager = local();
    let guard = LockGuard::acquire(manager.clone(), "CLVMD_TEST", LockMode::EX, false).unwrap();

    guard.release().unwrap();

    assert_eq!(manager.granted(), 0);
}
