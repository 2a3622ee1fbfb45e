//! Startup recovery of an empty Document from the newest snapshot.

use crate::clock::Clock;
use crate::config::SafeConfig;
use crate::durable::DurableHandle;
use crate::notify::{Notification, NotificationCenter};
use crate::primary::PrimaryStore;
use crate::types::{SnapshotId, Timestamp};

/// What recovery did.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum RecoveryOutcome {
    /// The Document holds real content and was left alone.
    LiveDataPresent,
    /// The Document was replaced with this snapshot's data.
    Restored { snapshot_id: SnapshotId, ts: Timestamp },
    /// No snapshot, or the newest one holds an empty Document or is unreadable.
    NoUsableSnapshot,
    StoreUnavailable,
    /// The primary store refused the restored data.
    RestoreWriteFailed { snapshot_id: SnapshotId },
}

impl RecoveryOutcome {
    pub fn restored(&self) -> bool {
        matches!(self, RecoveryOutcome::Restored { .. })
    }
}

/// Restore the newest snapshot if the Document is missing or empty.
///
/// Live content is never overwritten.
pub fn recover_if_needed(
    config: &SafeConfig,
    primary: &PrimaryStore,
    durable: &DurableHandle,
    notifier: &NotificationCenter,
    clock: &dyn Clock,
) -> RecoveryOutcome {
    let current = primary.read_opt(&config.document_key);
    if !config.is_empty_document(current.as_deref()) {
        tracing::debug!("recovery not needed: live document present");
        return RecoveryOutcome::LiveDataPresent;
    }

    let store = match durable.get() {
        Ok(store) => store,
        Err(e) => {
            tracing::warn!(error = %e, "recovery skipped: durable store unavailable");
            return RecoveryOutcome::StoreUnavailable;
        }
    };

    let latest = match store.latest_snapshot() {
        Ok(Some(record)) if !config.is_empty_document(Some(&record.data)) => record,
        Ok(_) => {
            tracing::debug!("recovery found no usable snapshot");
            return RecoveryOutcome::NoUsableSnapshot;
        }
        Err(e) => {
            tracing::warn!(error = %e, "recovery could not read newest snapshot");
            return RecoveryOutcome::NoUsableSnapshot;
        }
    };

    if !primary.write(&config.document_key, &latest.data) {
        return RecoveryOutcome::RestoreWriteFailed {
            snapshot_id: latest.id,
        };
    }

    tracing::info!(
        id = %latest.id,
        ts = %latest.ts,
        bytes = latest.bytes,
        "document recovered from snapshot"
    );
    notifier.publish(Notification::recovered(latest.id, latest.ts, clock.now()));
    RecoveryOutcome::Restored {
        snapshot_id: latest.id,
        ts: latest.ts,
    }
}
