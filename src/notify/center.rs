//! Fan-out of notifications to subscribers.

use super::types::{Notification, NotificationHandle, NotificationLevel, SubscriberId};
use crossbeam_channel::{bounded, Sender, TrySendError};
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};

/// Default per-subscriber buffer.
pub const DEFAULT_BUFFER: usize = 64;

/// Broadcasts notifications without ever blocking the publisher.
///
/// A subscriber whose buffer is full, or whose handle was dropped, is
/// removed on the next publish.
pub struct NotificationCenter {
    subscribers: RwLock<HashMap<SubscriberId, Sender<Notification>>>,
    next_id: AtomicU64,
    buffer_size: usize,
}

impl Default for NotificationCenter {
    fn default() -> Self {
        Self::new()
    }
}

impl NotificationCenter {
    pub fn new() -> Self {
        Self::with_buffer(DEFAULT_BUFFER)
    }

    pub fn with_buffer(buffer_size: usize) -> Self {
        Self {
            subscribers: RwLock::new(HashMap::new()),
            next_id: AtomicU64::new(1),
            buffer_size: buffer_size.max(1),
        }
    }

    pub fn subscribe(&self) -> NotificationHandle {
        let id = SubscriberId(self.next_id.fetch_add(1, Ordering::SeqCst));
        let (sender, receiver) = bounded(self.buffer_size);
        self.subscribers.write().insert(id, sender);
        NotificationHandle { id, receiver }
    }

    pub fn unsubscribe(&self, id: SubscriberId) {
        self.subscribers.write().remove(&id);
    }

    pub fn subscriber_count(&self) -> usize {
        self.subscribers.read().len()
    }

    /// Deliver to every subscriber. Returns how many received it.
    pub fn publish(&self, notification: Notification) -> usize {
        match notification.level {
            NotificationLevel::Info | NotificationLevel::Success => {
                tracing::info!(kind = ?notification.kind, "{}", notification.message)
            }
            NotificationLevel::Warning | NotificationLevel::Error => {
                tracing::warn!(kind = ?notification.kind, "{}", notification.message)
            }
        }

        let mut delivered = 0;
        let mut dropped = Vec::new();
        {
            let subscribers = self.subscribers.read();
            for (id, sender) in subscribers.iter() {
                match sender.try_send(notification.clone()) {
                    Ok(()) => delivered += 1,
                    Err(TrySendError::Full(_)) | Err(TrySendError::Disconnected(_)) => {
                        dropped.push(*id)
                    }
                }
            }
        }

        if !dropped.is_empty() {
            let mut subscribers = self.subscribers.write();
            for id in dropped {
                tracing::debug!(subscriber = id.0, "dropping notification subscriber");
                subscribers.remove(&id);
            }
        }

        delivered
    }
}
