//! Core types for the snapshot and recovery layer.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

/// Primary key of a snapshot record (auto-incrementing, never reused).
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct SnapshotId(pub u64);

impl fmt::Debug for SnapshotId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "SnapshotId({})", self.0)
    }
}

impl fmt::Display for SnapshotId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl SnapshotId {
    pub fn next(self) -> Self {
        SnapshotId(self.0 + 1)
    }
}

/// Milliseconds since Unix epoch.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, Default)]
pub struct Timestamp(pub i64);

impl Timestamp {
    /// Current wall-clock time.
    pub fn now() -> Self {
        let duration = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or_default();
        Timestamp(duration.as_millis() as i64)
    }

    /// Time elapsed since `earlier`. Zero if the clock went backwards.
    pub fn since(self, earlier: Timestamp) -> Duration {
        Duration::from_millis(self.0.saturating_sub(earlier.0).max(0) as u64)
    }
}

impl fmt::Debug for Timestamp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Timestamp({})", self.0)
    }
}

impl fmt::Display for Timestamp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// What triggered a snapshot.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum SnapshotReason {
    /// Taken during startup.
    Init,
    /// Taken by the repeating timer.
    Periodic,
    /// The host went to the background.
    Hidden,
    /// The host is shutting down.
    Unload,
    /// Explicit request from a caller.
    #[default]
    Manual,
    /// A debounced request with no caller-supplied reason.
    Debounced,
    /// Debounced request issued after a document save.
    Save,
    /// The fast store refused the Document; the snapshot carries the in-memory copy.
    PrimaryWriteFailed,
    /// Any other caller-defined tag.
    Custom(String),
}

impl SnapshotReason {
    pub fn as_str(&self) -> &str {
        match self {
            SnapshotReason::Init => "init",
            SnapshotReason::Periodic => "periodic",
            SnapshotReason::Hidden => "hidden",
            SnapshotReason::Unload => "unload",
            SnapshotReason::Manual => "manual",
            SnapshotReason::Debounced => "debounced",
            SnapshotReason::Save => "save",
            SnapshotReason::PrimaryWriteFailed => "primary-write-failed",
            SnapshotReason::Custom(tag) => tag,
        }
    }
}

impl From<&str> for SnapshotReason {
    fn from(tag: &str) -> Self {
        match tag {
            "init" => SnapshotReason::Init,
            "periodic" => SnapshotReason::Periodic,
            "hidden" => SnapshotReason::Hidden,
            "unload" => SnapshotReason::Unload,
            "manual" => SnapshotReason::Manual,
            "debounced" => SnapshotReason::Debounced,
            "save" => SnapshotReason::Save,
            "primary-write-failed" => SnapshotReason::PrimaryWriteFailed,
            other => SnapshotReason::Custom(other.to_string()),
        }
    }
}

impl From<String> for SnapshotReason {
    fn from(tag: String) -> Self {
        SnapshotReason::from(tag.as_str())
    }
}

impl From<SnapshotReason> for String {
    fn from(reason: SnapshotReason) -> Self {
        reason.as_str().to_string()
    }
}

impl fmt::Display for SnapshotReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A full copy of the Document as written to the snapshot table.
///
/// Immutable once written; removed only by rotation.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct SnapshotRecord {
    pub id: SnapshotId,
    pub ts: Timestamp,
    pub reason: SnapshotReason,
    /// Payload length in bytes.
    pub bytes: u64,
    pub data: String,
}

/// Snapshot metadata without the payload.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct SnapshotMeta {
    pub id: SnapshotId,
    pub ts: Timestamp,
    pub reason: SnapshotReason,
    pub bytes: u64,
}

/// Primary key plus `ts`, the unit rotation works on.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct SnapshotKey {
    pub ts: Timestamp,
    pub id: SnapshotId,
}

/// Cursor direction over the `ts` index.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Direction {
    /// Oldest first.
    Next,
    /// Newest first.
    Prev,
}

/// Host visibility state.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Visibility {
    Visible,
    Hidden,
}
