//! Background timers: the periodic snapshot and the single-slot debounce.

use crate::engine::SnapshotEngine;
use crate::error::Result;
use crate::types::SnapshotReason;
use crossbeam_channel::{after, never, select, tick, unbounded, Receiver, Sender};
use parking_lot::Mutex;
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

enum Command {
    SnapshotSoon(SnapshotReason),
    StartPeriodic,
    Shutdown,
}

/// Owns the timer thread.
///
/// Only one debounced snapshot is ever pending; a new request replaces the
/// reason and restarts the quiet period. A pending snapshot is taken on
/// shutdown.
pub struct Scheduler {
    commands: Sender<Command>,
    thread: Mutex<Option<JoinHandle<()>>>,
}

impl Scheduler {
    pub fn start(
        engine: Arc<SnapshotEngine>,
        periodic_interval: Duration,
        debounce: Duration,
    ) -> Result<Self> {
        let (commands, inbox) = unbounded();
        let thread = thread::Builder::new()
            .name("docsafe-scheduler".into())
            .spawn(move || run(engine, inbox, periodic_interval, debounce))?;

        Ok(Self {
            commands,
            thread: Mutex::new(Some(thread)),
        })
    }

    /// Arm the repeating timer. Later calls are ignored.
    pub fn start_periodic(&self) {
        self.send(Command::StartPeriodic);
    }

    /// (Re)arm the debounce timer.
    pub fn snapshot_soon(&self, reason: SnapshotReason) {
        self.send(Command::SnapshotSoon(reason));
    }

    pub fn is_running(&self) -> bool {
        self.thread.lock().is_some()
    }

    /// Stop the thread, flushing a pending debounced snapshot first.
    pub fn shutdown(&self) {
        let Some(thread) = self.thread.lock().take() else {
            return;
        };
        self.send(Command::Shutdown);
        if thread.join().is_err() {
            tracing::warn!("scheduler thread panicked");
        }
    }

    fn send(&self, command: Command) {
        if self.commands.send(command).is_err() {
            tracing::warn!("scheduler is not running");
        }
    }
}

impl Drop for Scheduler {
    fn drop(&mut self) {
        self.shutdown();
    }
}

fn run(
    engine: Arc<SnapshotEngine>,
    inbox: Receiver<Command>,
    periodic_interval: Duration,
    debounce: Duration,
) {
    let mut periodic: Option<Receiver<Instant>> = None;
    let mut pending: Option<(SnapshotReason, Receiver<Instant>)> = None;

    loop {
        let periodic_timer = periodic.clone().unwrap_or_else(never);
        let debounce_timer = pending
            .as_ref()
            .map(|(_, timer)| timer.clone())
            .unwrap_or_else(never);

        select! {
            recv(inbox) -> command => match command {
                Ok(Command::SnapshotSoon(reason)) => {
                    pending = Some((reason, after(debounce)));
                }
                Ok(Command::StartPeriodic) => {
                    if periodic.is_none() {
                        tracing::debug!(
                            interval_ms = periodic_interval.as_millis() as u64,
                            "periodic snapshots armed"
                        );
                        periodic = Some(tick(periodic_interval));
                    }
                }
                Ok(Command::Shutdown) | Err(_) => {
                    if let Some((reason, _)) = pending.take() {
                        engine.request_snapshot(reason, None);
                    }
                    break;
                }
            },
            recv(periodic_timer) -> _ => {
                engine.request_snapshot(SnapshotReason::Periodic, None);
            }
            recv(debounce_timer) -> _ => {
                if let Some((reason, _)) = pending.take() {
                    engine.request_snapshot(reason, None);
                }
            }
        }
    }

    tracing::debug!("scheduler stopped");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::SystemClock;
    use crate::config::SafeConfig;
    use crate::durable::DurableHandle;
    use crate::primary::{MemoryPrimaryStore, PrimaryBackend, PrimaryStore};
    use crate::types::Direction;
    use tempfile::TempDir;

    fn test_engine(
        dir: &TempDir,
        primary: Arc<MemoryPrimaryStore>,
    ) -> (Arc<SnapshotEngine>, Arc<DurableHandle>) {
        let config = SafeConfig::at(dir.path());
        let durable = Arc::new(DurableHandle::new(config.durable_path()));
        let engine = SnapshotEngine::new(
            &config,
            durable.clone(),
            PrimaryStore::new(primary),
            Arc::new(SystemClock),
        );
        (Arc::new(engine), durable)
    }

    #[test]
    fn test_debounce_coalesces_burst() {
        let dir = TempDir::new().unwrap();
        let primary = Arc::new(MemoryPrimaryStore::new());
        let (engine, durable) = test_engine(&dir, primary.clone());
        let scheduler =
            Scheduler::start(engine, Duration::from_secs(3_600), Duration::from_millis(50))
                .unwrap();

        for i in 0..10 {
            primary.set_item("songs", &format!("[{i}]")).unwrap();
            scheduler.snapshot_soon(SnapshotReason::Debounced);
        }
        thread::sleep(Duration::from_millis(400));

        let store = durable.get().unwrap();
        assert_eq!(store.snapshot_count(), 1);
        let record = store.latest_snapshot().unwrap().unwrap();
        assert_eq!(record.data, "[9]");
        assert_eq!(record.reason, SnapshotReason::Debounced);
        scheduler.shutdown();
    }

    #[test]
    fn test_latest_reason_wins() {
        let dir = TempDir::new().unwrap();
        let (engine, durable) = test_engine(&dir, Arc::new(MemoryPrimaryStore::new()));
        let scheduler =
            Scheduler::start(engine, Duration::from_secs(3_600), Duration::from_millis(50))
                .unwrap();

        scheduler.snapshot_soon(SnapshotReason::Debounced);
        scheduler.snapshot_soon(SnapshotReason::Save);
        thread::sleep(Duration::from_millis(400));

        let reasons: Vec<_> = durable
            .get()
            .unwrap()
            .cursor(Direction::Next)
            .map(|r| r.unwrap().reason)
            .collect();
        assert_eq!(reasons, vec![SnapshotReason::Save]);
        scheduler.shutdown();
    }

    #[test]
    fn test_shutdown_flushes_pending() {
        let dir = TempDir::new().unwrap();
        let (engine, durable) = test_engine(&dir, Arc::new(MemoryPrimaryStore::new()));
        let scheduler =
            Scheduler::start(engine, Duration::from_secs(3_600), Duration::from_secs(60)).unwrap();

        scheduler.snapshot_soon(SnapshotReason::Debounced);
        scheduler.shutdown();

        assert!(!scheduler.is_running());
        assert_eq!(durable.get().unwrap().snapshot_count(), 1);
    }

    #[test]
    fn test_periodic_ticks_only_after_start() {
        let dir = TempDir::new().unwrap();
        let primary = Arc::new(MemoryPrimaryStore::new());
        let (engine, durable) = test_engine(&dir, primary.clone());
        let scheduler =
            Scheduler::start(engine, Duration::from_millis(40), Duration::from_secs(60)).unwrap();

        thread::sleep(Duration::from_millis(150));
        assert_eq!(durable.get().unwrap().snapshot_count(), 0);

        scheduler.start_periodic();
        for i in 0..3 {
            primary.set_item("songs", &format!("[{i}]")).unwrap();
            thread::sleep(Duration::from_millis(120));
        }
        scheduler.shutdown();

        let store = durable.get().unwrap();
        assert!(store.snapshot_count() >= 2);
        let record = store.latest_snapshot().unwrap().unwrap();
        assert_eq!(record.reason, SnapshotReason::Periodic);
    }
}
