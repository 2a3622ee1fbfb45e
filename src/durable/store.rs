//! The durable store: a settings table and a snapshot table under one directory.

use super::kv::KvTable;
use super::snapshot_log::SnapshotLog;
use crate::error::{Result, SafeError};
use crate::types::{
    Direction, SnapshotId, SnapshotKey, SnapshotMeta, SnapshotReason, SnapshotRecord, Timestamp,
};
use fs2::FileExt;
use parking_lot::Mutex;
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::fs::{self, File, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};

/// Magic bytes for the store manifest.
const STORE_MAGIC: &[u8; 4] = b"DSF\0";

/// Current store format version.
pub const STORE_VERSION: u8 = 1;

/// Durable, versioned, local store owning two tables.
///
/// Opening takes an exclusive lock on the directory; the lock is released
/// when the store is dropped.
pub struct DurableStore {
    path: PathBuf,

    /// Lock file for exclusive access.
    _lock_file: File,

    /// Generic settings table keyed by string.
    kv: KvTable,

    /// Append-only snapshot table ordered by `ts`.
    snapshots: Mutex<SnapshotLog>,
}

impl DurableStore {
    /// Open the store, creating the directory and both tables if absent.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        fs::create_dir_all(&path)?;

        let lock_file = Self::acquire_lock(&path)?;

        let manifest = path.join("MANIFEST");
        match fs::read(&manifest) {
            Ok(bytes) if Self::is_partial_manifest(&bytes) => {
                tracing::warn!(path = %path.display(), "rewriting incomplete manifest");
                Self::write_manifest(&manifest)?;
            }
            Ok(bytes) => Self::verify_manifest(&bytes)?,
            Err(e) if e.kind() == io::ErrorKind::NotFound => Self::write_manifest(&manifest)?,
            Err(e) => return Err(e.into()),
        }

        let kv = KvTable::open(path.join("kv.bin"))?;
        let snapshots = SnapshotLog::open(path.join("snapshots.log"))?;

        tracing::debug!(
            path = %path.display(),
            snapshots = snapshots.len(),
            "opened durable store"
        );

        Ok(Self {
            path,
            _lock_file: lock_file,
            kv,
            snapshots: Mutex::new(snapshots),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    // --- Settings ---

    /// Read a settings value. A value of the wrong shape reads as absent.
    pub fn kv_get<T: DeserializeOwned>(&self, key: &str) -> Option<T> {
        self.kv
            .get(key)
            .and_then(|value| serde_json::from_value(value).ok())
    }

    /// Upsert a settings value.
    pub fn kv_put<T: Serialize>(&self, key: &str, value: &T) -> Result<()> {
        self.kv.put(key, serde_json::to_value(value)?)
    }

    pub fn kv_delete(&self, key: &str) -> Result<bool> {
        self.kv.delete(key)
    }

    // --- Snapshots ---

    /// Append a snapshot record; the id is assigned here.
    pub fn append_snapshot(
        &self,
        ts: Timestamp,
        reason: SnapshotReason,
        data: &str,
    ) -> Result<SnapshotRecord> {
        self.snapshots.lock().append(ts, reason, data.to_string())
    }

    pub fn get_snapshot(&self, id: SnapshotId) -> Result<Option<SnapshotRecord>> {
        self.snapshots.lock().get(id)
    }

    /// The record with the greatest `ts`, if any.
    pub fn latest_snapshot(&self) -> Result<Option<SnapshotRecord>> {
        let mut log = self.snapshots.lock();
        match log.newest() {
            Some(key) => log.get(key.id),
            None => Ok(None),
        }
    }

    /// Primary keys with their `ts`, ordered by `ts`.
    pub fn snapshot_keys(&self, direction: Direction) -> Vec<SnapshotKey> {
        self.snapshots.lock().keys(direction)
    }

    /// Lazily read full records in `ts` order.
    ///
    /// The key set is fixed when the cursor is opened; records deleted while
    /// it is being consumed are skipped.
    pub fn cursor(&self, direction: Direction) -> SnapshotCursor<'_> {
        SnapshotCursor {
            store: self,
            keys: self.snapshot_keys(direction).into_iter(),
        }
    }

    /// Metadata for every record, newest first.
    pub fn list_snapshots(&self) -> Vec<SnapshotMeta> {
        let log = self.snapshots.lock();
        log.keys(Direction::Prev)
            .into_iter()
            .filter_map(|key| log.meta(key.id))
            .collect()
    }

    pub fn delete_snapshot(&self, id: SnapshotId) -> Result<bool> {
        Ok(self.snapshots.lock().delete_many(&[id])? == 1)
    }

    /// Delete a batch of records by primary key in one write.
    pub fn delete_snapshots(&self, ids: &[SnapshotId]) -> Result<usize> {
        self.snapshots.lock().delete_many(ids)
    }

    pub fn snapshot_count(&self) -> usize {
        self.snapshots.lock().len()
    }

    #[cfg(test)]
    pub(crate) fn set_fail_points(&self, points: super::FailPoints) {
        self.snapshots.lock().set_fail_points(points);
    }

    // --- Layout ---

    fn write_manifest(manifest: &Path) -> Result<()> {
        let tmp_path = manifest.with_extension("tmp");
        {
            let mut file = OpenOptions::new()
                .write(true)
                .create(true)
                .truncate(true)
                .open(&tmp_path)?;

            file.write_all(STORE_MAGIC)?;
            file.write_all(&[STORE_VERSION])?;
            file.sync_all()?;
        }
        fs::rename(&tmp_path, manifest)?;

        Ok(())
    }

    /// A prefix of the magic left by an interrupted first open.
    fn is_partial_manifest(bytes: &[u8]) -> bool {
        bytes.len() <= STORE_MAGIC.len() && STORE_MAGIC.starts_with(bytes)
    }

    fn verify_manifest(bytes: &[u8]) -> Result<()> {
        if bytes.len() <= STORE_MAGIC.len() || &bytes[..4] != STORE_MAGIC {
            return Err(SafeError::InvalidFormat("Invalid store magic".into()));
        }

        let version = bytes[4];
        if version > STORE_VERSION {
            return Err(SafeError::VersionConflict {
                found: version,
                supported: STORE_VERSION,
            });
        }
        if version != STORE_VERSION {
            return Err(SafeError::InvalidFormat(format!(
                "Unsupported store version: {version}"
            )));
        }

        Ok(())
    }

    fn acquire_lock(path: &Path) -> Result<File> {
        let lock_file = File::create(path.join("LOCK"))?;

        lock_file
            .try_lock_exclusive()
            .map_err(|_| SafeError::Locked)?;

        Ok(lock_file)
    }
}

/// Finite, lazy, single-pass sequence of snapshot records.
pub struct SnapshotCursor<'a> {
    store: &'a DurableStore,
    keys: std::vec::IntoIter<SnapshotKey>,
}

impl Iterator for SnapshotCursor<'_> {
    type Item = Result<SnapshotRecord>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            let key = self.keys.next()?;
            match self.store.get_snapshot(key.id) {
                Ok(Some(record)) => return Some(Ok(record)),
                Ok(None) => continue,
                Err(e) => {
                    // stop after the first failure
                    self.keys = Vec::new().into_iter();
                    return Some(Err(e));
                }
            }
        }
    }
}
