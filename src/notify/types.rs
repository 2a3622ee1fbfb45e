//! Notification types.

use crate::types::{SnapshotId, Timestamp};
use crossbeam_channel::{Receiver, RecvTimeoutError, TryRecvError};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// How long a presenter should keep a notification on screen.
pub const DEFAULT_DISPLAY_FOR: Duration = Duration::from_millis(3_500);

/// Severity of a notification.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NotificationLevel {
    Info,
    Success,
    Warning,
    Error,
}

/// What happened.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum NotificationKind {
    /// The storage environment granted persistence.
    PersistenceGranted,
    /// Storage usage crossed the warning ratio.
    QuotaWarning { usage: u64, quota: u64 },
    /// The Document was restored from a snapshot.
    Recovered { snapshot_id: SnapshotId, ts: Timestamp },
    /// The fast store refused the Document; a durable copy was attempted.
    PrimaryWriteFailed { snapshot_taken: bool },
}

/// A short-lived, non-blocking status message.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Notification {
    pub level: NotificationLevel,
    pub kind: NotificationKind,
    pub message: String,
    pub at: Timestamp,
    #[serde(with = "millis")]
    pub display_for: Duration,
}

/// Constructors take `at` from the caller's clock so notifications line up
/// with snapshot timestamps.
impl Notification {
    pub fn new(
        level: NotificationLevel,
        kind: NotificationKind,
        message: impl Into<String>,
        at: Timestamp,
    ) -> Self {
        Self {
            level,
            kind,
            message: message.into(),
            at,
            display_for: DEFAULT_DISPLAY_FOR,
        }
    }

    pub fn persistence_granted(at: Timestamp) -> Self {
        Self::new(
            NotificationLevel::Success,
            NotificationKind::PersistenceGranted,
            "Storage pinned for persistence",
            at,
        )
    }

    pub fn quota_warning(usage: u64, quota: u64, at: Timestamp) -> Self {
        Self::new(
            NotificationLevel::Warning,
            NotificationKind::QuotaWarning { usage, quota },
            "Storage nearly full. Export or clear space",
            at,
        )
    }

    pub fn recovered(snapshot_id: SnapshotId, ts: Timestamp, at: Timestamp) -> Self {
        Self::new(
            NotificationLevel::Success,
            NotificationKind::Recovered { snapshot_id, ts },
            "Recovered library from backup",
            at,
        )
    }

    pub fn primary_write_failed(snapshot_taken: bool, at: Timestamp) -> Self {
        let message = if snapshot_taken {
            "Could not save to main storage; a backup copy was kept"
        } else {
            "Could not save to main storage"
        };
        Self::new(
            NotificationLevel::Warning,
            NotificationKind::PrimaryWriteFailed { snapshot_taken },
            message,
            at,
        )
    }
}

/// Unique identifier for a subscriber.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct SubscriberId(pub u64);

/// Receiving end of a subscription.
pub struct NotificationHandle {
    pub id: SubscriberId,
    pub(crate) receiver: Receiver<Notification>,
}

impl NotificationHandle {
    /// Block until the next notification.
    pub fn recv(&self) -> Option<Notification> {
        self.receiver.recv().ok()
    }

    pub fn try_recv(&self) -> Option<Notification> {
        match self.receiver.try_recv() {
            Ok(n) => Some(n),
            Err(TryRecvError::Empty) | Err(TryRecvError::Disconnected) => None,
        }
    }

    pub fn recv_timeout(&self, timeout: Duration) -> Option<Notification> {
        match self.receiver.recv_timeout(timeout) {
            Ok(n) => Some(n),
            Err(RecvTimeoutError::Timeout) | Err(RecvTimeoutError::Disconnected) => None,
        }
    }

    /// Everything currently buffered.
    pub fn drain(&self) -> Vec<Notification> {
        self.receiver.try_iter().collect()
    }
}

mod millis {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_u64(d.as_millis() as u64)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Duration, D::Error> {
        Ok(Duration::from_millis(u64::deserialize(d)?))
    }
}
