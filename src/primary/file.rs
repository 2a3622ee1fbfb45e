//! File-backed primary backend: one file per key under a directory.

use super::PrimaryBackend;
use crate::error::{Result, SafeError};
use parking_lot::Mutex;
use std::fs::{self, OpenOptions};
use std::io::{ErrorKind as IoErrorKind, Write};
use std::path::{Path, PathBuf};

const VALUE_EXT: &str = "val";

/// `PrimaryBackend` storing each key in its own file.
///
/// File names are the hex encoding of the key, so any key is safe. An
/// optional quota bounds the total bytes of all values.
pub struct FilePrimaryStore {
    path: PathBuf,
    quota: Option<u64>,
    /// Serializes writers so the quota check and the write agree.
    write_lock: Mutex<()>,
}

impl FilePrimaryStore {
    pub fn open(path: impl AsRef<Path>, quota: Option<u64>) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        fs::create_dir_all(&path)?;

        Ok(Self {
            path,
            quota,
            write_lock: Mutex::new(()),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Total bytes of all stored values.
    pub fn usage(&self) -> Result<u64> {
        let mut total = 0;
        for entry in fs::read_dir(&self.path)? {
            let entry = entry?;
            let path = entry.path();
            if path.extension().and_then(|e| e.to_str()) == Some(VALUE_EXT) {
                total += entry.metadata()?.len();
            }
        }
        Ok(total)
    }

    fn item_path(&self, key: &str) -> PathBuf {
        self.path
            .join(format!("{}.{VALUE_EXT}", hex::encode(key.as_bytes())))
    }

    fn current_size(path: &Path) -> Result<u64> {
        match fs::metadata(path) {
            Ok(meta) => Ok(meta.len()),
            Err(e) if e.kind() == IoErrorKind::NotFound => Ok(0),
            Err(e) => Err(e.into()),
        }
    }
}

impl PrimaryBackend for FilePrimaryStore {
    fn get_item(&self, key: &str) -> Result<Option<String>> {
        match fs::read(self.item_path(key)) {
            Ok(bytes) => String::from_utf8(bytes)
                .map(Some)
                .map_err(|e| SafeError::Deserialization(e.to_string())),
            Err(e) if e.kind() == IoErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    fn set_item(&self, key: &str, value: &str) -> Result<()> {
        let _lock = self.write_lock.lock();
        let item_path = self.item_path(key);

        if let Some(quota) = self.quota {
            let others = self
                .usage()?
                .saturating_sub(Self::current_size(&item_path)?);
            let needed = others + value.len() as u64;
            if needed > quota {
                return Err(SafeError::QuotaExceeded {
                    key: key.to_string(),
                    needed,
                    quota,
                });
            }
        }

        let tmp_path = item_path.with_extension("tmp");
        {
            let mut file = OpenOptions::new()
                .write(true)
                .create(true)
                .truncate(true)
                .open(&tmp_path)?;
            file.write_all(value.as_bytes())?;
            file.sync_data()?;
        }
        fs::rename(&tmp_path, &item_path)?;

        Ok(())
    }

    fn remove_item(&self, key: &str) -> Result<()> {
        let _lock = self.write_lock.lock();
        match fs::remove_file(self.item_path(key)) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == IoErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_set_get_remove() {
        let dir = TempDir::new().unwrap();
        let store = FilePrimaryStore::open(dir.path().join("primary"), None).unwrap();

        assert_eq!(store.get_item("songs").unwrap(), None);
        store.set_item("songs", "[{\"id\":\"a\"}]").unwrap();
        assert_eq!(
            store.get_item("songs").unwrap().as_deref(),
            Some("[{\"id\":\"a\"}]")
        );
        store.remove_item("songs").unwrap();
        store.remove_item("songs").unwrap();
        assert_eq!(store.get_item("songs").unwrap(), None);
    }

    #[test]
    fn test_odd_keys_are_safe_file_names() {
        let dir = TempDir::new().unwrap();
        let store = FilePrimaryStore::open(dir.path(), None).unwrap();

        store.set_item("../escape/me", "x").unwrap();
        assert_eq!(store.get_item("../escape/me").unwrap().as_deref(), Some("x"));
        assert!(!dir.path().join("..").join("escape").exists());
    }

    #[test]
    fn test_quota_exceeded_keeps_previous_value() {
        let dir = TempDir::new().unwrap();
        let store = FilePrimaryStore::open(dir.path(), Some(10)).unwrap();

        store.set_item("songs", "[1,2,3]").unwrap();
        assert!(matches!(
            store.set_item("theme", "dark"),
            Err(SafeError::QuotaExceeded { needed: 11, quota: 10, .. })
        ));
        let err = store.set_item("songs", "[1,2,3,4,5,6,7]");
        assert!(matches!(err, Err(SafeError::QuotaExceeded { .. })));
        assert_eq!(store.get_item("songs").unwrap().as_deref(), Some("[1,2,3]"));
    }

    #[test]
    fn test_values_persist_across_instances() {
        let dir = TempDir::new().unwrap();
        FilePrimaryStore::open(dir.path(), None)
            .unwrap()
            .set_item("songs", "[7]")
            .unwrap();

        let store = FilePrimaryStore::open(dir.path(), None).unwrap();
        assert_eq!(store.get_item("songs").unwrap().as_deref(), Some("[7]"));
        assert_eq!(store.usage().unwrap(), 3);
    }
}
