//! Snapshot engine: dedup gate, durable append and rotation.

use crate::clock::Clock;
use crate::config::SafeConfig;
use crate::durable::{DurableHandle, DurableStore};
use crate::error::ErrorKind;
use crate::fingerprint::{fingerprint, Fingerprint};
use crate::primary::PrimaryStore;
use crate::types::{Direction, SnapshotId, SnapshotReason, Timestamp};
use parking_lot::Mutex;
use std::sync::Arc;
use std::time::Duration;

/// Result of a snapshot request.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum SnapshotOutcome {
    /// A record was appended; `rotated` older records were deleted.
    Written { id: SnapshotId, rotated: usize },
    /// Content unchanged within the minimum interval.
    Skipped,
    /// The durable store could not take the record.
    Failed(ErrorKind),
}

impl SnapshotOutcome {
    pub fn is_written(&self) -> bool {
        matches!(self, SnapshotOutcome::Written { .. })
    }

    pub fn id(&self) -> Option<SnapshotId> {
        match self {
            SnapshotOutcome::Written { id, .. } => Some(*id),
            _ => None,
        }
    }
}

#[derive(Debug, Default)]
struct EngineState {
    last_fingerprint: Option<Fingerprint>,
    last_snapshot_at: Option<Timestamp>,
}

/// Decides whether to snapshot, writes the record and enforces the
/// rotation bound.
pub struct SnapshotEngine {
    durable: Arc<DurableHandle>,
    primary: PrimaryStore,
    clock: Arc<dyn Clock>,
    document_key: String,
    empty_document: String,
    max_snapshots: usize,
    min_interval: Duration,
    state: Mutex<EngineState>,
}

impl SnapshotEngine {
    pub fn new(
        config: &SafeConfig,
        durable: Arc<DurableHandle>,
        primary: PrimaryStore,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            durable,
            primary,
            clock,
            document_key: config.document_key.clone(),
            empty_document: config.empty_document.clone(),
            max_snapshots: config.max_snapshots,
            min_interval: config.min_interval,
            state: Mutex::new(EngineState::default()),
        }
    }

    /// Current Document from the primary store.
    pub fn current_document(&self) -> String {
        self.primary.read(&self.document_key, &self.empty_document)
    }

    /// Set the baseline to `document` as of now.
    ///
    /// Identical content requested within the minimum interval is skipped.
    pub fn seed(&self, document: &str) {
        let mut state = self.state.lock();
        state.last_fingerprint = Some(fingerprint(document));
        state.last_snapshot_at = Some(self.clock.now());
    }

    pub fn last_fingerprint(&self) -> Option<Fingerprint> {
        self.state.lock().last_fingerprint
    }

    /// Snapshot the Document, or `content` when given.
    ///
    /// Never fails: store errors are logged and returned as
    /// [`SnapshotOutcome::Failed`].
    pub fn request_snapshot(
        &self,
        reason: SnapshotReason,
        content: Option<&str>,
    ) -> SnapshotOutcome {
        let store = match self.durable.get() {
            Ok(store) => store,
            Err(e) => {
                tracing::warn!(%reason, error = %e, "snapshot skipped: durable store unavailable");
                return SnapshotOutcome::Failed(e.kind());
            }
        };

        let data = match content {
            Some(content) => content.to_string(),
            None => self.current_document(),
        };
        let hash = fingerprint(&data);

        let now = {
            let mut state = self.state.lock();
            let now = self.clock.now();
            let recent = state
                .last_snapshot_at
                .is_some_and(|at| now.since(at) < self.min_interval);
            if state.last_fingerprint == Some(hash) && recent {
                tracing::debug!(%reason, fingerprint = %hash, "snapshot skipped: unchanged");
                return SnapshotOutcome::Skipped;
            }
            state.last_fingerprint = Some(hash);
            state.last_snapshot_at = Some(now);
            now
        };

        let record = match store.append_snapshot(now, reason.clone(), &data) {
            Ok(record) => record,
            Err(e) => {
                tracing::warn!(%reason, error = %e, "snapshot append failed");
                return SnapshotOutcome::Failed(e.kind());
            }
        };

        let rotated = self.rotate(&store);
        tracing::debug!(
            id = %record.id,
            %reason,
            bytes = record.bytes,
            rotated,
            "snapshot written"
        );
        SnapshotOutcome::Written {
            id: record.id,
            rotated,
        }
    }

    /// Delete the oldest records beyond the limit. Returns how many went.
    fn rotate(&self, store: &DurableStore) -> usize {
        let keys = store.snapshot_keys(Direction::Next);
        let over = keys.len().saturating_sub(self.max_snapshots);
        if over == 0 {
            return 0;
        }

        let oldest: Vec<SnapshotId> = keys[..over].iter().map(|key| key.id).collect();
        match store.delete_snapshots(&oldest) {
            Ok(deleted) => deleted,
            Err(e) => {
                tracing::warn!(over, error = %e, "snapshot rotation failed");
                0
            }
        }
    }
}
