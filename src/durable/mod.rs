//! Durable store: versioned, transactional-or-best-effort local storage.
//!
//! Two tables live under one directory:
//! - a generic settings table keyed by string (`kv.bin`)
//! - an append-only snapshot table keyed by auto-incrementing id with an
//!   in-memory index on `ts` (`snapshots.log`)
//!
//! `DurableHandle` caches the opened store process-wide and coalesces
//! concurrent opens.

mod handle;
mod kv;
mod snapshot_log;
mod store;

pub use handle::DurableHandle;
pub use kv::KvTable;
pub use snapshot_log::SnapshotLog;
#[cfg(test)]
pub(crate) use snapshot_log::FailPoints;
pub use store::{DurableStore, SnapshotCursor, STORE_VERSION};
