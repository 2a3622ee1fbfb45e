//! Failure handling: every failure degrades, none reaches the caller.

use docsafe::{
    DocumentGuard, DurableStore, ErrorKind, InitReport, MemoryPrimaryStore, PrimaryBackend,
    RecoveryOutcome, SafeConfig, SafeError, SnapshotOutcome, SnapshotReason, Timestamp,
};
use std::fs::{self, OpenOptions};
use std::io::Write;
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;

fn guard_with(dir: &TempDir, primary: Arc<MemoryPrimaryStore>) -> DocumentGuard {
    DocumentGuard::builder(SafeConfig::at(dir.path()))
        .primary_backend(primary)
        .build()
        .unwrap()
}

#[test]
fn test_locked_durable_store_degrades_to_no_backups() {
    let dir = TempDir::new().unwrap();
    let config = SafeConfig::at(dir.path());
    let _holder = DurableStore::open(config.durable_path()).unwrap();

    let guard = guard_with(&dir, Arc::new(MemoryPrimaryStore::new()));
    match guard.init() {
        InitReport::Initialized {
            recovery,
            initial_snapshot,
        } => {
            assert_eq!(recovery, RecoveryOutcome::StoreUnavailable);
            assert_eq!(
                initial_snapshot,
                SnapshotOutcome::Failed(ErrorKind::StoreUnavailable)
            );
        }
        other => panic!("unexpected {other:?}"),
    }

    assert!(guard.save_document("[\"still editable\"]"));
    assert_eq!(guard.document(), "[\"still editable\"]");
    assert_eq!(
        guard.snapshot_now(None),
        SnapshotOutcome::Failed(ErrorKind::StoreUnavailable)
    );
    assert!(guard.snapshots().is_empty());
}

#[test]
fn test_store_becomes_available_on_later_attempt() {
    let dir = TempDir::new().unwrap();
    let config = SafeConfig::at(dir.path());
    let holder = DurableStore::open(config.durable_path()).unwrap();

    let guard = guard_with(&dir, Arc::new(MemoryPrimaryStore::new()));
    assert!(matches!(
        guard.snapshot_with_data("[1]", None),
        SnapshotOutcome::Failed(_)
    ));

    drop(holder);
    assert!(guard.snapshot_with_data("[1]", None).is_written());
    assert_eq!(guard.snapshots().len(), 1);
}

#[test]
fn test_newer_store_format_is_treated_as_unavailable() {
    let dir = TempDir::new().unwrap();
    let config = SafeConfig::at(dir.path());
    fs::create_dir_all(config.durable_path()).unwrap();
    fs::write(config.durable_path().join("MANIFEST"), b"DSF\0\x09").unwrap();

    assert!(matches!(
        DurableStore::open(config.durable_path()),
        Err(SafeError::VersionConflict { found: 9, .. })
    ));

    let guard = guard_with(&dir, Arc::new(MemoryPrimaryStore::new()));
    assert_eq!(
        guard.snapshot_with_data("[1]", None),
        SnapshotOutcome::Failed(ErrorKind::StoreUnavailable)
    );
}

#[test]
fn test_torn_snapshot_write_keeps_earlier_history() {
    let dir = TempDir::new().unwrap();
    let config = SafeConfig::at(dir.path());

    {
        let store = DurableStore::open(config.durable_path()).unwrap();
        store
            .append_snapshot(Timestamp(1_000), SnapshotReason::Periodic, "[\"first\"]")
            .unwrap();
        store
            .append_snapshot(Timestamp(2_000), SnapshotReason::Periodic, "[\"second\"]")
            .unwrap();
    }

    // half a frame: a length prefix promising more than follows
    let mut log = OpenOptions::new()
        .append(true)
        .open(config.durable_path().join("snapshots.log"))
        .unwrap();
    log.write_all(&[0xff, 0x00, 0x00, 0x00, 0x93, 0x01]).unwrap();
    drop(log);

    let guard = guard_with(&dir, Arc::new(MemoryPrimaryStore::new()));
    guard.init();
    assert_eq!(guard.document(), "[\"second\"]");
    assert_eq!(guard.snapshots().len(), 2);

    // the repaired log accepts new records
    assert!(guard.snapshot_with_data("[\"third\"]", None).is_written());
    assert_eq!(guard.snapshots().len(), 3);
}

#[test]
fn test_damaged_early_snapshot_keeps_newer_history() {
    let dir = TempDir::new().unwrap();
    let config = SafeConfig::at(dir.path());

    {
        let store = DurableStore::open(config.durable_path()).unwrap();
        for (ts, item) in [(1_000, "first"), (2_000, "second"), (3_000, "third")] {
            let data = format!("[\"{item}\"]");
            store
                .append_snapshot(Timestamp(ts), SnapshotReason::Periodic, &data)
                .unwrap();
        }
    }

    // one flipped bit inside the oldest record's payload
    let log_path = config.durable_path().join("snapshots.log");
    let mut bytes = fs::read(&log_path).unwrap();
    let size = bytes.len() as u64;
    let at = bytes.windows(5).position(|w| w == b"first").unwrap();
    bytes[at] ^= 0x01;
    fs::write(&log_path, &bytes).unwrap();

    let guard = guard_with(&dir, Arc::new(MemoryPrimaryStore::new()));
    match guard.init() {
        InitReport::Initialized { recovery, .. } => assert!(recovery.restored()),
        other => panic!("unexpected {other:?}"),
    }
    assert_eq!(guard.document(), "[\"third\"]");
    assert_eq!(guard.snapshots().len(), 2);
    assert_eq!(fs::metadata(&log_path).unwrap().len(), size);
}

fn slow_debounce_guard(dir: &TempDir, primary: Arc<MemoryPrimaryStore>) -> DocumentGuard {
    let config = SafeConfig {
        debounce: Duration::from_secs(3_600),
        ..SafeConfig::at(dir.path())
    };
    DocumentGuard::builder(config)
        .primary_backend(primary)
        .build()
        .unwrap()
}

#[test]
fn test_disabled_primary_store_never_panics() {
    let dir = TempDir::new().unwrap();
    let primary = Arc::new(MemoryPrimaryStore::new());
    primary.set_available(false);
    let guard = slow_debounce_guard(&dir, primary.clone());

    guard.init();
    assert_eq!(guard.document(), "[]");
    assert!(!guard.save_document("[\"in memory only\"]"));

    let listed = guard.snapshots();
    assert_eq!(listed.len(), 1);
    assert_eq!(listed[0].reason, SnapshotReason::PrimaryWriteFailed);

    // storage comes back before the pending save snapshot fires
    primary.set_available(true);
    assert!(guard.recover_if_needed());
    assert_eq!(guard.document(), "[\"in memory only\"]");

    guard.shutdown();
    let store = guard.context().durable.get().unwrap();
    assert_eq!(
        store.latest_snapshot().unwrap().unwrap().data,
        "[\"in memory only\"]"
    );
}

#[test]
fn test_pending_save_of_empty_document_shadows_fallback() {
    let dir = TempDir::new().unwrap();
    let primary = Arc::new(MemoryPrimaryStore::new());
    primary.set_available(false);

    {
        let guard = slow_debounce_guard(&dir, primary.clone());
        guard.init();
        assert!(!guard.save_document("[\"in memory only\"]"));
        // the flushed save snapshot reads the empty fallback Document
        guard.shutdown();

        let listed = guard.snapshots();
        assert_eq!(listed.len(), 2);
        assert_eq!(listed[0].reason, SnapshotReason::Save);
        assert_eq!(listed[1].reason, SnapshotReason::PrimaryWriteFailed);
    }

    primary.set_available(true);
    let guard = slow_debounce_guard(&dir, primary);
    match guard.init() {
        InitReport::Initialized { recovery, .. } => {
            assert_eq!(recovery, RecoveryOutcome::NoUsableSnapshot)
        }
        other => panic!("unexpected {other:?}"),
    }
    assert_eq!(guard.document(), "[]");
}

#[test]
fn test_error_kinds() {
    assert_eq!(
        SafeError::QuotaExceeded {
            key: "songs".into(),
            needed: 10,
            quota: 5
        }
        .kind(),
        ErrorKind::QuotaExceeded
    );
    assert_eq!(SafeError::Locked.kind(), ErrorKind::StoreUnavailable);
    assert_eq!(
        SafeError::ChecksumMismatch {
            expected: 1,
            got: 2
        }
        .kind(),
        ErrorKind::CorruptOrMissingSnapshot
    );
}
