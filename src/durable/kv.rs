//! Generic settings table: string keys, arbitrary JSON values, last write wins.

use crate::error::{Result, SafeError};
use parking_lot::RwLock;
use serde_json::Value;
use std::collections::BTreeMap;
use std::fs::{self, File, OpenOptions};
use std::io::{Read, Write};
use std::path::{Path, PathBuf};

/// Magic bytes for the settings table.
const KV_MAGIC: &[u8; 4] = b"KVT\0";

/// Current settings table format version.
const KV_VERSION: u8 = 1;

/// Settings table, rewritten atomically on every upsert.
pub struct KvTable {
    path: PathBuf,
    entries: RwLock<BTreeMap<String, Value>>,
}

impl KvTable {
    /// Open the table, creating an empty one if the file is absent.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref().to_path_buf();

        let entries = if path.exists() {
            Self::load_from_file(&path)?
        } else {
            BTreeMap::new()
        };

        let table = Self {
            path,
            entries: RwLock::new(entries),
        };
        if !table.path.exists() {
            table.save(&table.entries.read())?;
        }

        Ok(table)
    }

    pub fn get(&self, key: &str) -> Option<Value> {
        self.entries.read().get(key).cloned()
    }

    /// Insert or replace a value.
    pub fn put(&self, key: &str, value: Value) -> Result<()> {
        let mut entries = self.entries.write();
        let previous = entries.insert(key.to_string(), value);
        if let Err(e) = self.save(&entries) {
            // keep memory in step with disk
            match previous {
                Some(old) => entries.insert(key.to_string(), old),
                None => entries.remove(key),
            };
            return Err(e);
        }
        Ok(())
    }

    /// Remove a key. Returns whether it existed.
    pub fn delete(&self, key: &str) -> Result<bool> {
        let mut entries = self.entries.write();
        let Some(previous) = entries.remove(key) else {
            return Ok(false);
        };
        if let Err(e) = self.save(&entries) {
            entries.insert(key.to_string(), previous);
            return Err(e);
        }
        Ok(true)
    }

    pub fn keys(&self) -> Vec<String> {
        self.entries.read().keys().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.read().is_empty()
    }

    fn save(&self, entries: &BTreeMap<String, Value>) -> Result<()> {
        let encoded = rmp_serde::to_vec(entries)?;

        let tmp_path = self.path.with_extension("bin.tmp");
        {
            let mut file = OpenOptions::new()
                .write(true)
                .create(true)
                .truncate(true)
                .open(&tmp_path)?;

            file.write_all(KV_MAGIC)?;
            file.write_all(&[KV_VERSION])?;
            file.write_all(&(encoded.len() as u64).to_le_bytes())?;
            file.write_all(&encoded)?;
            file.write_all(&crc32fast::hash(&encoded).to_le_bytes())?;
            file.sync_all()?;
        }
        fs::rename(&tmp_path, &self.path)?;

        Ok(())
    }

    fn load_from_file(path: &Path) -> Result<BTreeMap<String, Value>> {
        let mut file = File::open(path)?;

        let mut magic = [0u8; 4];
        file.read_exact(&mut magic)?;
        if &magic != KV_MAGIC {
            return Err(SafeError::InvalidFormat("Invalid settings table magic".into()));
        }

        let mut version = [0u8; 1];
        file.read_exact(&mut version)?;
        if version[0] > KV_VERSION {
            return Err(SafeError::VersionConflict {
                found: version[0],
                supported: KV_VERSION,
            });
        }

        let mut len_bytes = [0u8; 8];
        file.read_exact(&mut len_bytes)?;
        let len = u64::from_le_bytes(len_bytes) as usize;

        let mut encoded = vec![0u8; len];
        file.read_exact(&mut encoded)?;

        let mut checksum_bytes = [0u8; 4];
        file.read_exact(&mut checksum_bytes)?;
        let expected = u32::from_le_bytes(checksum_bytes);
        let got = crc32fast::hash(&encoded);
        if expected != got {
            return Err(SafeError::ChecksumMismatch { expected, got });
        }

        Ok(rmp_serde::from_slice(&encoded)?)
    }
}
