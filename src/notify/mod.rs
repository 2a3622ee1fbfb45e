//! User notifications for persistence grants, quota warnings and recovery.
//!
//! Notifications are presentational: the core never waits on them. Each
//! subscriber gets a bounded buffer; a subscriber that stops draining is
//! dropped rather than slowing down the publisher.
//!
//! # Example
//!
//! ```ignore
//! let center = NotificationCenter::new();
//! let handle = center.subscribe();
//!
//! center.publish(Notification::persistence_granted(Timestamp::now()));
//! if let Some(n) = handle.try_recv() {
//!     println!("[{:?}] {}", n.level, n.message);
//! }
//! ```

mod center;
mod types;

pub use center::{NotificationCenter, DEFAULT_BUFFER};
pub use types::{
    Notification, NotificationHandle, NotificationKind, NotificationLevel, SubscriberId,
    DEFAULT_DISPLAY_FOR,
};
