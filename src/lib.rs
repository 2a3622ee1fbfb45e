//! # docsafe
//!
//! A local-first safety net for a single JSON Document kept in a fast
//! key-value store.
//!
//! ## Core Concepts
//!
//! - **Primary store**: fast, synchronous, and allowed to fail (quota, disabled)
//! - **Durable store**: versioned on-disk settings table and snapshot log
//! - **Snapshots**: deduplicated, rate-limited, rotated full copies of the Document
//! - **Recovery**: an empty Document is restored from the newest snapshot at startup
//!
//! ## Example
//!
//! ```ignore
//! use docsafe::{DocumentGuard, SafeConfig, Visibility};
//!
//! let guard = DocumentGuard::new(SafeConfig::at("./library"))?;
//! guard.init();
//!
//! // after every edit
//! guard.save_document(r#"[{"id":"a","title":"Intro"}]"#);
//!
//! // host went to the background
//! guard.on_visibility_change(Visibility::Hidden);
//! ```

pub mod clock;
pub mod config;
pub mod durable;
pub mod engine;
pub mod environment;
pub mod error;
pub mod fingerprint;
pub mod lifecycle;
pub mod notify;
pub mod primary;
pub mod recovery;
pub mod types;

// Re-exports
pub use clock::{Clock, ManualClock, SystemClock};
pub use config::{SafeConfig, DEBOUNCE, PERIODIC_INTERVAL, SNAP_MAX, SNAP_MIN_INTERVAL};
pub use durable::{DurableHandle, DurableStore, SnapshotCursor};
pub use engine::{SnapshotEngine, SnapshotOutcome};
pub use environment::{LocalEnvironment, StorageEnvironment, StorageEstimate};
pub use error::{ErrorKind, Result, SafeError};
pub use fingerprint::{fingerprint, Fingerprint};
pub use lifecycle::{DocumentGuard, GuardBuilder, InitReport, SnapshotContext};
pub use notify::{
    Notification, NotificationCenter, NotificationHandle, NotificationKind, NotificationLevel,
};
pub use primary::{FilePrimaryStore, MemoryPrimaryStore, PrimaryBackend, PrimaryStore};
pub use recovery::{recover_if_needed, RecoveryOutcome};
pub use types::*;
