//! In-memory primary backend with a byte quota and an availability switch.

use super::PrimaryBackend;
use crate::error::{Result, SafeError};
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};

/// In-memory `PrimaryBackend`.
///
/// Usage is counted as key bytes plus value bytes across all entries.
#[derive(Debug)]
pub struct MemoryPrimaryStore {
    entries: RwLock<HashMap<String, String>>,
    quota: Option<u64>,
    available: AtomicBool,
}

impl Default for MemoryPrimaryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryPrimaryStore {
    pub fn new() -> Self {
        Self {
            entries: RwLock::new(HashMap::new()),
            quota: None,
            available: AtomicBool::new(true),
        }
    }

    pub fn with_quota(quota: u64) -> Self {
        Self {
            quota: Some(quota),
            ..Self::new()
        }
    }

    /// Simulate storage being disabled (every call fails) or restored.
    pub fn set_available(&self, available: bool) {
        self.available.store(available, Ordering::SeqCst);
    }

    /// Bytes currently used.
    pub fn usage(&self) -> u64 {
        self.entries
            .read()
            .iter()
            .map(|(k, v)| (k.len() + v.len()) as u64)
            .sum()
    }

    fn check_available(&self) -> Result<()> {
        if self.available.load(Ordering::SeqCst) {
            Ok(())
        } else {
            Err(SafeError::Unavailable("primary storage disabled".into()))
        }
    }
}

impl PrimaryBackend for MemoryPrimaryStore {
    fn get_item(&self, key: &str) -> Result<Option<String>> {
        self.check_available()?;
        Ok(self.entries.read().get(key).cloned())
    }

    fn set_item(&self, key: &str, value: &str) -> Result<()> {
        self.check_available()?;

        let mut entries = self.entries.write();
        if let Some(quota) = self.quota {
            let others: u64 = entries
                .iter()
                .filter(|(k, _)| k.as_str() != key)
                .map(|(k, v)| (k.len() + v.len()) as u64)
                .sum();
            let needed = others + (key.len() + value.len()) as u64;
            if needed > quota {
                return Err(SafeError::QuotaExceeded {
                    key: key.to_string(),
                    needed,
                    quota,
                });
            }
        }
        entries.insert(key.to_string(), value.to_string());
        Ok(())
    }

    fn remove_item(&self, key: &str) -> Result<()> {
        self.check_available()?;
        self.entries.write().remove(key);
        Ok(())
    }
}
