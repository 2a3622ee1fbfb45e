//! Lifecycle tests: init, timers, hooks and background storage checks.

use docsafe::{
    DocumentGuard, InitReport, LocalEnvironment, ManualClock, MemoryPrimaryStore,
    NotificationKind, PrimaryBackend, SafeConfig, SnapshotOutcome, SnapshotReason, Timestamp,
    Visibility,
};
use std::sync::Arc;
use std::thread;
use std::time::Duration;
use tempfile::TempDir;

fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_max_level(tracing::Level::DEBUG)
        .with_test_writer()
        .try_init();
}

fn fast_config(dir: &TempDir) -> SafeConfig {
    SafeConfig {
        debounce: Duration::from_millis(50),
        periodic_interval: Duration::from_secs(3_600),
        ..SafeConfig::at(dir.path())
    }
}

#[test]
fn test_burst_of_edits_yields_one_snapshot() {
    init_tracing();
    let dir = TempDir::new().unwrap();
    let guard = DocumentGuard::builder(fast_config(&dir))
        .primary_backend(Arc::new(MemoryPrimaryStore::new()))
        .build()
        .unwrap();
    guard.init();

    for i in 0..20 {
        assert!(guard.save_document(&format!("[{i}]")));
    }
    thread::sleep(Duration::from_millis(500));

    let listed = guard.snapshots();
    assert_eq!(listed.len(), 1);
    assert_eq!(listed[0].reason, SnapshotReason::Save);
    assert_eq!(listed[0].bytes, 4);
}

#[test]
fn test_concurrent_identical_requests_write_once() {
    init_tracing();
    let dir = TempDir::new().unwrap();
    let primary = Arc::new(MemoryPrimaryStore::new());
    primary.set_item("songs", "[\"shared\"]").unwrap();
    let guard = Arc::new(
        DocumentGuard::builder(SafeConfig::at(dir.path()))
            .primary_backend(primary)
            .clock(Arc::new(ManualClock::new(Timestamp(50_000))))
            .build()
            .unwrap(),
    );

    let handles: Vec<_> = (0..8)
        .map(|_| {
            let guard = Arc::clone(&guard);
            thread::spawn(move || guard.snapshot_now(None))
        })
        .collect();
    let outcomes: Vec<SnapshotOutcome> = handles.into_iter().map(|h| h.join().unwrap()).collect();

    assert_eq!(outcomes.iter().filter(|o| o.is_written()).count(), 1);
    assert_eq!(guard.snapshots().len(), 1);
}

#[test]
fn test_hidden_and_unload_hooks_tag_snapshots() {
    let dir = TempDir::new().unwrap();
    let primary = Arc::new(MemoryPrimaryStore::new());
    let clock = Arc::new(ManualClock::new(Timestamp(0)));
    let guard = DocumentGuard::builder(SafeConfig::at(dir.path()))
        .primary_backend(primary.clone())
        .clock(clock.clone())
        .build()
        .unwrap();
    guard.init();

    primary.set_item("songs", "[\"a\"]").unwrap();
    assert!(guard.on_visibility_change(Visibility::Hidden).unwrap().is_written());

    // unchanged and recent
    assert_eq!(guard.on_unload(), Some(SnapshotOutcome::Skipped));

    primary.set_item("songs", "[\"b\"]").unwrap();
    assert!(guard.on_unload().unwrap().is_written());

    let reasons: Vec<_> = guard.snapshots().into_iter().map(|m| m.reason).collect();
    assert_eq!(reasons, vec![SnapshotReason::Unload, SnapshotReason::Hidden]);
}

#[test]
fn test_periodic_timer_starts_with_init() {
    let dir = TempDir::new().unwrap();
    let primary = Arc::new(MemoryPrimaryStore::new());
    let config = SafeConfig {
        periodic_interval: Duration::from_millis(50),
        ..SafeConfig::at(dir.path())
    };
    let guard = DocumentGuard::builder(config)
        .primary_backend(primary.clone())
        .build()
        .unwrap();

    primary.set_item("songs", "[\"before\"]").unwrap();
    thread::sleep(Duration::from_millis(200));
    assert!(guard.snapshots().is_empty());

    guard.init();
    primary.set_item("songs", "[\"after\"]").unwrap();
    thread::sleep(Duration::from_millis(300));
    guard.shutdown();

    let listed = guard.snapshots();
    assert_eq!(listed.len(), 1);
    assert_eq!(listed[0].reason, SnapshotReason::Periodic);
}

#[test]
fn test_shutdown_flushes_pending_save() {
    let dir = TempDir::new().unwrap();
    let config = SafeConfig {
        debounce: Duration::from_secs(60),
        ..SafeConfig::at(dir.path())
    };
    let guard = DocumentGuard::builder(config)
        .primary_backend(Arc::new(MemoryPrimaryStore::new()))
        .build()
        .unwrap();
    guard.init();

    guard.save_document("[\"unsaved\"]");
    assert!(guard.snapshots().is_empty());
    guard.shutdown();

    assert_eq!(guard.snapshots()[0].reason, SnapshotReason::Save);
}

#[test]
fn test_storage_checks_notify_and_record_grant() {
    init_tracing();
    let dir = TempDir::new().unwrap();
    let guard = DocumentGuard::builder(SafeConfig::at(dir.path()))
        .primary_backend(Arc::new(MemoryPrimaryStore::new()))
        .environment(Arc::new(LocalEnvironment::new(dir.path(), Some(1))))
        .build()
        .unwrap();
    let notes = guard.subscribe();

    guard.init();
    // joins the background checks
    guard.shutdown();

    let kinds: Vec<_> = notes.drain().into_iter().map(|n| n.kind).collect();
    assert!(kinds.contains(&NotificationKind::PersistenceGranted));
    assert!(kinds
        .iter()
        .any(|k| matches!(k, NotificationKind::QuotaWarning { quota: 1, .. })));

    let store = guard.context().durable.get().unwrap();
    assert_eq!(store.kv_get::<bool>("persisted"), Some(true));
}

#[test]
fn test_second_session_does_not_renotify_persistence() {
    let dir = TempDir::new().unwrap();
    let config = SafeConfig::at(dir.path());

    {
        let guard = DocumentGuard::builder(config.clone())
            .primary_backend(Arc::new(MemoryPrimaryStore::new()))
            .build()
            .unwrap();
        guard.init();
    }

    let guard = DocumentGuard::builder(config)
        .primary_backend(Arc::new(MemoryPrimaryStore::new()))
        .build()
        .unwrap();
    let notes = guard.subscribe();
    guard.init();
    guard.shutdown();

    assert!(notes
        .drain()
        .iter()
        .all(|n| n.kind != NotificationKind::PersistenceGranted));
}

#[test]
fn test_init_is_idempotent_across_threads() {
    let dir = TempDir::new().unwrap();
    let guard = Arc::new(
        DocumentGuard::builder(SafeConfig::at(dir.path()))
            .primary_backend(Arc::new(MemoryPrimaryStore::new()))
            .build()
            .unwrap(),
    );

    let reports: Vec<InitReport> = (0..4)
        .map(|_| {
            let guard = Arc::clone(&guard);
            thread::spawn(move || guard.init())
        })
        .collect::<Vec<_>>()
        .into_iter()
        .map(|h| h.join().unwrap())
        .collect();

    let initialized = reports
        .iter()
        .filter(|r| matches!(r, InitReport::Initialized { .. }))
        .count();
    assert_eq!(initialized, 1);
    assert!(guard.is_initialized());
}
