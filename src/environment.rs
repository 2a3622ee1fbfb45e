//! Storage environment: persistence grants and usage estimates.

use crate::clock::Clock;
use crate::durable::DurableHandle;
use crate::error::Result;
use crate::notify::{Notification, NotificationCenter};
use std::fs;
use std::io::ErrorKind as IoErrorKind;
use std::path::{Path, PathBuf};

/// Settings key recording whether persistence was granted.
pub const PERSISTED_KEY: &str = "persisted";

const PERSISTED_MARKER: &str = ".persisted";

/// Usage against quota, in bytes. A zero quota means unknown.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct StorageEstimate {
    pub usage: u64,
    pub quota: u64,
}

impl StorageEstimate {
    pub fn ratio(&self) -> Option<f64> {
        if self.quota == 0 {
            None
        } else {
            Some(self.usage as f64 / self.quota as f64)
        }
    }
}

/// Host facilities for pinning storage and estimating its use.
pub trait StorageEnvironment: Send + Sync {
    /// Whether storage is already pinned against eviction.
    fn persisted(&self) -> Result<bool>;

    /// Ask for storage to be pinned. Returns whether it was granted.
    fn persist(&self) -> Result<bool>;

    fn estimate(&self) -> Result<StorageEstimate>;
}

/// Environment backed by a local directory.
///
/// Persistence is a marker file in the directory; usage is the total size of
/// everything beneath it; quota comes from configuration.
pub struct LocalEnvironment {
    root: PathBuf,
    quota: Option<u64>,
}

impl LocalEnvironment {
    pub fn new(root: impl Into<PathBuf>, quota: Option<u64>) -> Self {
        Self {
            root: root.into(),
            quota,
        }
    }

    fn marker(&self) -> PathBuf {
        self.root.join(PERSISTED_MARKER)
    }
}

impl StorageEnvironment for LocalEnvironment {
    fn persisted(&self) -> Result<bool> {
        Ok(self.marker().exists())
    }

    fn persist(&self) -> Result<bool> {
        fs::create_dir_all(&self.root)?;
        fs::write(self.marker(), b"1")?;
        Ok(true)
    }

    fn estimate(&self) -> Result<StorageEstimate> {
        Ok(StorageEstimate {
            usage: dir_size(&self.root)?,
            quota: self.quota.unwrap_or(0),
        })
    }
}

fn dir_size(path: &Path) -> Result<u64> {
    let entries = match fs::read_dir(path) {
        Ok(entries) => entries,
        Err(e) if e.kind() == IoErrorKind::NotFound => return Ok(0),
        Err(e) => return Err(e.into()),
    };

    let mut total = 0;
    for entry in entries {
        let entry = entry?;
        let meta = entry.metadata()?;
        if meta.is_dir() {
            total += dir_size(&entry.path())?;
        } else {
            total += meta.len();
        }
    }
    Ok(total)
}

/// Make sure storage is pinned and record the outcome in the settings table.
///
/// Notifies only when a new request is granted. Failures are logged and
/// reported as not persisted.
pub fn request_persistence(
    env: &dyn StorageEnvironment,
    durable: &DurableHandle,
    notifier: &NotificationCenter,
    clock: &dyn Clock,
) -> bool {
    let (persisted, fresh) = match env.persisted() {
        Ok(true) => (true, false),
        Ok(false) => match env.persist() {
            Ok(granted) => (granted, granted),
            Err(e) => {
                tracing::warn!(error = %e, "persistence request failed");
                return false;
            }
        },
        Err(e) => {
            tracing::warn!(error = %e, "persistence query failed");
            return false;
        }
    };

    match durable.get() {
        Ok(store) => {
            if let Err(e) = store.kv_put(PERSISTED_KEY, &persisted) {
                tracing::warn!(error = %e, "failed to record persistence flag");
            }
        }
        Err(e) => tracing::warn!(error = %e, "durable store unavailable for persistence flag"),
    }

    if fresh {
        notifier.publish(Notification::persistence_granted(clock.now()));
    }
    tracing::debug!(persisted, fresh, "storage persistence checked");
    persisted
}

/// Warn when usage exceeds `ratio` of a known quota.
///
/// Returns the estimate when one was available.
pub fn check_quota(
    env: &dyn StorageEnvironment,
    notifier: &NotificationCenter,
    ratio: f64,
    clock: &dyn Clock,
) -> Option<StorageEstimate> {
    let estimate = match env.estimate() {
        Ok(estimate) => estimate,
        Err(e) => {
            tracing::warn!(error = %e, "storage estimate failed");
            return None;
        }
    };

    if estimate.ratio().is_some_and(|r| r > ratio) {
        let warning = Notification::quota_warning(estimate.usage, estimate.quota, clock.now());
        notifier.publish(warning);
    }
    tracing::debug!(usage = estimate.usage, quota = estimate.quota, "storage estimate");
    Some(estimate)
}
