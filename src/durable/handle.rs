//! Lazily opened, process-wide durable store handle.

use super::store::DurableStore;
use crate::error::{Result, SafeError};
use parking_lot::{Condvar, Mutex};
use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

type Opener = Box<dyn Fn() -> Result<DurableStore> + Send + Sync>;

enum OpenState {
    Idle,
    Opening { attempt: u64 },
    Open(Arc<DurableStore>),
    Failed { attempt: u64, reason: String },
}

/// Caches the durable store after the first successful open.
///
/// Callers that arrive while an open is in flight wait for it and share its
/// result, success or failure. A failed open is not cached: the next caller
/// after the failure starts a fresh attempt.
pub struct DurableHandle {
    opener: Opener,
    state: Mutex<OpenState>,
    settled: Condvar,
    attempts: AtomicU64,
}

impl DurableHandle {
    /// Handle for the store at `path`.
    pub fn new(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        Self::with_opener(move || DurableStore::open(&path))
    }

    /// Handle with a custom open routine.
    pub fn with_opener<F>(opener: F) -> Self
    where
        F: Fn() -> Result<DurableStore> + Send + Sync + 'static,
    {
        Self {
            opener: Box::new(opener),
            state: Mutex::new(OpenState::Idle),
            settled: Condvar::new(),
            attempts: AtomicU64::new(0),
        }
    }

    /// Get the store, opening it if needed.
    pub fn get(&self) -> Result<Arc<DurableStore>> {
        let mut state = self.state.lock();

        loop {
            let joined = match &*state {
                OpenState::Open(store) => return Ok(Arc::clone(store)),
                OpenState::Opening { attempt } => *attempt,
                OpenState::Idle | OpenState::Failed { .. } => break,
            };

            while matches!(&*state, OpenState::Opening { attempt } if *attempt == joined) {
                self.settled.wait(&mut state);
            }

            match &*state {
                OpenState::Open(store) => return Ok(Arc::clone(store)),
                OpenState::Failed { attempt, reason } if *attempt == joined => {
                    return Err(SafeError::Unavailable(reason.clone()));
                }
                // a newer attempt started in between; look again
                _ => continue,
            }
        }

        let attempt = self.attempts.fetch_add(1, Ordering::SeqCst) + 1;
        *state = OpenState::Opening { attempt };
        drop(state);

        let result = (self.opener)();

        let mut state = self.state.lock();
        let outcome = match result {
            Ok(store) => {
                let store = Arc::new(store);
                *state = OpenState::Open(Arc::clone(&store));
                Ok(store)
            }
            Err(e) => {
                tracing::warn!(attempt, error = %e, "durable store open failed");
                *state = OpenState::Failed {
                    attempt,
                    reason: e.to_string(),
                };
                Err(e)
            }
        };
        self.settled.notify_all();

        outcome
    }

    /// Whether a store is cached.
    pub fn is_open(&self) -> bool {
        matches!(&*self.state.lock(), OpenState::Open(_))
    }

    /// Number of underlying open operations started so far.
    pub fn open_attempts(&self) -> u64 {
        self.attempts.load(Ordering::SeqCst)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;
    use std::thread;
    use std::time::Duration;
    use tempfile::TempDir;

    #[test]
    fn test_open_is_cached() {
        let dir = TempDir::new().unwrap();
        let handle = DurableHandle::new(dir.path().join("durable"));

        let a = handle.get().unwrap();
        let b = handle.get().unwrap();
        assert!(Arc::ptr_eq(&a, &b));
        assert_eq!(handle.open_attempts(), 1);
        assert!(handle.is_open());
    }

    #[test]
    fn test_concurrent_opens_coalesce() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("durable");
        let calls = Arc::new(AtomicUsize::new(0));

        let handle = {
            let calls = Arc::clone(&calls);
            Arc::new(DurableHandle::with_opener(move || {
                calls.fetch_add(1, Ordering::SeqCst);
                thread::sleep(Duration::from_millis(300));
                DurableStore::open(&path)
            }))
        };

        let threads: Vec<_> = (0..8)
            .map(|_| {
                let handle = Arc::clone(&handle);
                thread::spawn(move || handle.get().map(|_| ()).is_ok())
            })
            .collect();

        for t in threads {
            assert!(t.join().unwrap());
        }
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_waiters_share_a_failure_then_retry() {
        let calls = Arc::new(AtomicUsize::new(0));
        let handle = {
            let calls = Arc::clone(&calls);
            Arc::new(DurableHandle::with_opener(move || {
                calls.fetch_add(1, Ordering::SeqCst);
                thread::sleep(Duration::from_millis(300));
                Err(SafeError::Unavailable("disk detached".into()))
            }))
        };

        let threads: Vec<_> = (0..4)
            .map(|_| {
                let handle = Arc::clone(&handle);
                thread::spawn(move || handle.get().is_err())
            })
            .collect();
        for t in threads {
            assert!(t.join().unwrap());
        }
        assert_eq!(calls.load(Ordering::SeqCst), 1);

        // failures are not cached
        assert!(handle.get().is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 2);
        assert!(!handle.is_open());
    }
}
