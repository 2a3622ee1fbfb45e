//! Guard configuration.

use crate::notify::DEFAULT_BUFFER;
use std::path::PathBuf;
use std::time::Duration;

/// Maximum number of snapshot records kept after rotation.
pub const SNAP_MAX: usize = 20;

/// Identical content is not snapshotted again within this window.
pub const SNAP_MIN_INTERVAL: Duration = Duration::from_secs(15);

pub const PERIODIC_INTERVAL: Duration = Duration::from_secs(120);

pub const DEBOUNCE: Duration = Duration::from_millis(800);

/// Configuration for a [`DocumentGuard`](crate::DocumentGuard).
#[derive(Clone, Debug)]
pub struct SafeConfig {
    /// Base path. The durable store lives in `durable/`, the file-backed
    /// primary store in `primary/`.
    pub path: PathBuf,

    /// Primary store key holding the Document.
    pub document_key: String,

    /// Canonical empty Document.
    pub empty_document: String,

    pub max_snapshots: usize,

    pub min_interval: Duration,

    pub periodic_interval: Duration,

    /// Quiet period for `schedule_snapshot_soon`.
    pub debounce: Duration,

    /// Warn once usage/quota exceeds this.
    pub quota_warning_ratio: f64,

    /// Byte quota for the file-backed primary store.
    pub primary_quota_bytes: Option<u64>,

    /// Quota reported by the local storage environment.
    pub storage_quota_bytes: Option<u64>,

    /// Buffered notifications per subscriber.
    pub notification_buffer: usize,
}

impl Default for SafeConfig {
    fn default() -> Self {
        Self {
            path: PathBuf::from("./docsafe"),
            document_key: "songs".to_string(),
            empty_document: "[]".to_string(),
            max_snapshots: SNAP_MAX,
            min_interval: SNAP_MIN_INTERVAL,
            periodic_interval: PERIODIC_INTERVAL,
            debounce: DEBOUNCE,
            quota_warning_ratio: 0.85,
            primary_quota_bytes: None,
            storage_quota_bytes: None,
            notification_buffer: DEFAULT_BUFFER,
        }
    }
}

impl SafeConfig {
    /// Defaults rooted at `path`.
    pub fn at(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            ..Self::default()
        }
    }

    pub fn durable_path(&self) -> PathBuf {
        self.path.join("durable")
    }

    pub fn primary_path(&self) -> PathBuf {
        self.path.join("primary")
    }

    /// Whether `document` counts as empty: missing, blank or canonical empty.
    pub fn is_empty_document(&self, document: Option<&str>) -> bool {
        match document {
            None => true,
            Some(doc) => doc.is_empty() || doc == self.empty_document,
        }
    }
}
