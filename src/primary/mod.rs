//! Fast primary store: a synchronous key-value surface holding the live Document.
//!
//! Backends may fail at any time (quota exhausted, storage disabled). The
//! `PrimaryStore` adapter absorbs those failures: reads fall back to a
//! default, writes report success as a boolean.

mod file;
mod memory;

pub use file::FilePrimaryStore;
pub use memory::MemoryPrimaryStore;

use crate::error::Result;
use std::sync::Arc;

/// A synchronous string key-value store.
pub trait PrimaryBackend: Send + Sync {
    fn get_item(&self, key: &str) -> Result<Option<String>>;

    fn set_item(&self, key: &str, value: &str) -> Result<()>;

    fn remove_item(&self, key: &str) -> Result<()>;
}

/// Failure-absorbing wrapper over a `PrimaryBackend`.
#[derive(Clone)]
pub struct PrimaryStore {
    backend: Arc<dyn PrimaryBackend>,
}

impl PrimaryStore {
    pub fn new(backend: Arc<dyn PrimaryBackend>) -> Self {
        Self { backend }
    }

    /// Read `key`, returning `fallback` when absent or unreadable.
    pub fn read(&self, key: &str, fallback: &str) -> String {
        self.read_opt(key).unwrap_or_else(|| fallback.to_string())
    }

    /// Read `key`; `None` when absent or unreadable.
    pub fn read_opt(&self, key: &str) -> Option<String> {
        match self.backend.get_item(key) {
            Ok(value) => value,
            Err(e) => {
                tracing::warn!(key, error = %e, "primary store read failed");
                None
            }
        }
    }

    /// Write `key`. Returns false if the backend refused the write; the
    /// caller decides on the durable fallback.
    pub fn write(&self, key: &str, value: &str) -> bool {
        match self.backend.set_item(key, value) {
            Ok(()) => true,
            Err(e) => {
                tracing::warn!(key, bytes = value.len(), error = %e, "primary store write failed");
                false
            }
        }
    }
}
