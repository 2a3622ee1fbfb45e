//! The `DocumentGuard`: one instance per process, wiring every component.

use super::scheduler::Scheduler;
use crate::clock::{Clock, SystemClock};
use crate::config::SafeConfig;
use crate::durable::DurableHandle;
use crate::engine::{SnapshotEngine, SnapshotOutcome};
use crate::environment::{check_quota, request_persistence, LocalEnvironment, StorageEnvironment};
use crate::error::Result;
use crate::notify::{Notification, NotificationCenter, NotificationHandle};
use crate::primary::{FilePrimaryStore, PrimaryBackend, PrimaryStore};
use crate::recovery::{recover_if_needed, RecoveryOutcome};
use crate::types::{SnapshotMeta, SnapshotReason, Visibility};
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};

/// Session state shared by the guard, the scheduler and the storage checks.
pub struct SnapshotContext {
    pub config: SafeConfig,
    pub durable: Arc<DurableHandle>,
    pub primary: PrimaryStore,
    pub environment: Arc<dyn StorageEnvironment>,
    pub notifier: NotificationCenter,
    pub engine: Arc<SnapshotEngine>,
    pub clock: Arc<dyn Clock>,
    initialized: AtomicBool,
}

impl SnapshotContext {
    pub fn is_initialized(&self) -> bool {
        self.initialized.load(Ordering::SeqCst)
    }
}

/// What `init` did.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum InitReport {
    Initialized {
        recovery: RecoveryOutcome,
        initial_snapshot: SnapshotOutcome,
    },
    /// `init` had already run; nothing was done.
    AlreadyInitialized,
}

/// Builder for swapping out the guard's collaborators.
pub struct GuardBuilder {
    config: SafeConfig,
    primary: Option<Arc<dyn PrimaryBackend>>,
    environment: Option<Arc<dyn StorageEnvironment>>,
    clock: Option<Arc<dyn Clock>>,
    durable: Option<Arc<DurableHandle>>,
}

impl GuardBuilder {
    pub fn primary_backend(mut self, backend: Arc<dyn PrimaryBackend>) -> Self {
        self.primary = Some(backend);
        self
    }

    pub fn environment(mut self, environment: Arc<dyn StorageEnvironment>) -> Self {
        self.environment = Some(environment);
        self
    }

    pub fn clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = Some(clock);
        self
    }

    pub fn durable(mut self, durable: Arc<DurableHandle>) -> Self {
        self.durable = Some(durable);
        self
    }

    /// Build the guard and start its scheduler thread.
    ///
    /// Nothing is read or restored until [`DocumentGuard::init`].
    pub fn build(self) -> Result<DocumentGuard> {
        let config = self.config;

        let backend: Arc<dyn PrimaryBackend> = match self.primary {
            Some(backend) => backend,
            None => Arc::new(FilePrimaryStore::open(
                config.primary_path(),
                config.primary_quota_bytes,
            )?),
        };
        let environment: Arc<dyn StorageEnvironment> = match self.environment {
            Some(environment) => environment,
            None => Arc::new(LocalEnvironment::new(
                config.path.clone(),
                config.storage_quota_bytes,
            )),
        };
        let clock: Arc<dyn Clock> = match self.clock {
            Some(clock) => clock,
            None => Arc::new(SystemClock),
        };
        let durable = self
            .durable
            .unwrap_or_else(|| Arc::new(DurableHandle::new(config.durable_path())));

        let primary = PrimaryStore::new(backend);
        let engine = Arc::new(SnapshotEngine::new(
            &config,
            durable.clone(),
            primary.clone(),
            clock.clone(),
        ));
        let scheduler =
            Scheduler::start(engine.clone(), config.periodic_interval, config.debounce)?;

        let context = Arc::new(SnapshotContext {
            notifier: NotificationCenter::with_buffer(config.notification_buffer),
            config,
            durable,
            primary,
            environment,
            engine,
            clock,
            initialized: AtomicBool::new(false),
        });

        Ok(DocumentGuard {
            context,
            scheduler,
            storage_checks: Mutex::new(None),
        })
    }
}

/// Protects one Document with snapshots and startup recovery.
///
/// # Example
///
/// ```ignore
/// let guard = DocumentGuard::new(SafeConfig::at("./library"))?;
/// guard.init();
///
/// guard.save_document(r#"[{"id":"a"}]"#);
/// guard.on_visibility_change(Visibility::Hidden);
/// guard.shutdown();
/// ```
pub struct DocumentGuard {
    context: Arc<SnapshotContext>,
    scheduler: Scheduler,
    storage_checks: Mutex<Option<JoinHandle<()>>>,
}

impl DocumentGuard {
    /// Guard with the file-backed primary store and local environment.
    pub fn new(config: SafeConfig) -> Result<Self> {
        Self::builder(config).build()
    }

    pub fn builder(config: SafeConfig) -> GuardBuilder {
        GuardBuilder {
            config,
            primary: None,
            environment: None,
            clock: None,
            durable: None,
        }
    }

    pub fn context(&self) -> &Arc<SnapshotContext> {
        &self.context
    }

    /// Run the startup sequence once.
    ///
    /// Opens the durable store, starts the persistence and quota checks in
    /// the background, recovers the Document if it is empty, seeds the dedup
    /// state, takes the `init` snapshot and arms the periodic timer.
    pub fn init(&self) -> InitReport {
        let ctx = &self.context;
        if ctx.initialized.swap(true, Ordering::SeqCst) {
            return InitReport::AlreadyInitialized;
        }

        if let Err(e) = ctx.durable.get() {
            tracing::warn!(error = %e, "durable store unavailable at startup");
        }

        self.spawn_storage_checks();

        let recovery = recover_if_needed(
            &ctx.config,
            &ctx.primary,
            &ctx.durable,
            &ctx.notifier,
            ctx.clock.as_ref(),
        );

        let document = ctx.engine.current_document();
        ctx.engine.seed(&document);
        let initial_snapshot = ctx.engine.request_snapshot(SnapshotReason::Init, None);

        self.scheduler.start_periodic();

        tracing::info!(
            recovery = ?recovery,
            initial_snapshot = ?initial_snapshot,
            "document guard initialized"
        );
        InitReport::Initialized {
            recovery,
            initial_snapshot,
        }
    }

    pub fn is_initialized(&self) -> bool {
        self.context.is_initialized()
    }

    /// Snapshot the current Document now. Defaults to `manual`.
    pub fn snapshot_now(&self, reason: Option<SnapshotReason>) -> SnapshotOutcome {
        self.context
            .engine
            .request_snapshot(reason.unwrap_or_default(), None)
    }

    /// Snapshot `data` instead of the stored Document. Defaults to `manual`.
    pub fn snapshot_with_data(
        &self,
        data: &str,
        reason: Option<SnapshotReason>,
    ) -> SnapshotOutcome {
        self.context
            .engine
            .request_snapshot(reason.unwrap_or_default(), Some(data))
    }

    /// Snapshot after a quiet period, replacing any pending request.
    /// Defaults to `debounced`.
    pub fn schedule_snapshot_soon(&self, reason: Option<SnapshotReason>) {
        self.scheduler
            .snapshot_soon(reason.unwrap_or(SnapshotReason::Debounced));
    }

    /// Host visibility changed. Snapshots on `Hidden` once initialized.
    pub fn on_visibility_change(&self, visibility: Visibility) -> Option<SnapshotOutcome> {
        if !self.is_initialized() || visibility != Visibility::Hidden {
            return None;
        }
        Some(self.context.engine.request_snapshot(SnapshotReason::Hidden, None))
    }

    /// Host is about to exit. Best-effort snapshot once initialized.
    pub fn on_unload(&self) -> Option<SnapshotOutcome> {
        if !self.is_initialized() {
            return None;
        }
        Some(self.context.engine.request_snapshot(SnapshotReason::Unload, None))
    }

    pub fn recover_if_needed(&self) -> bool {
        let ctx = &self.context;
        recover_if_needed(
            &ctx.config,
            &ctx.primary,
            &ctx.durable,
            &ctx.notifier,
            ctx.clock.as_ref(),
        )
        .restored()
    }

    /// Write the Document to the primary store.
    ///
    /// If the write is refused the content is snapshotted directly and a
    /// warning is published. Either way a debounced `save` snapshot follows.
    /// Returns whether the primary write succeeded.
    pub fn save_document(&self, content: &str) -> bool {
        let ctx = &self.context;
        let written = ctx.primary.write(&ctx.config.document_key, content);

        if !written {
            let outcome =
                self.snapshot_with_data(content, Some(SnapshotReason::PrimaryWriteFailed));
            let kept = !matches!(outcome, SnapshotOutcome::Failed(_));
            ctx.notifier.publish(Notification::primary_write_failed(kept, ctx.clock.now()));
        }

        self.schedule_snapshot_soon(Some(SnapshotReason::Save));
        written
    }

    /// The current Document, or the empty Document.
    pub fn document(&self) -> String {
        self.context.engine.current_document()
    }

    /// Snapshot metadata, newest first. Empty if the store is unavailable.
    pub fn snapshots(&self) -> Vec<SnapshotMeta> {
        match self.context.durable.get() {
            Ok(store) => store.list_snapshots(),
            Err(e) => {
                tracing::warn!(error = %e, "cannot list snapshots");
                Vec::new()
            }
        }
    }

    pub fn subscribe(&self) -> NotificationHandle {
        self.context.notifier.subscribe()
    }

    /// Stop background work. A pending debounced snapshot is taken first.
    pub fn shutdown(&self) {
        self.scheduler.shutdown();
        if let Some(checks) = self.storage_checks.lock().take() {
            if checks.join().is_err() {
                tracing::warn!("storage check thread panicked");
            }
        }
    }

    fn spawn_storage_checks(&self) {
        let ctx = Arc::clone(&self.context);
        let spawned = thread::Builder::new()
            .name("docsafe-storage-check".into())
            .spawn(move || {
                let clock = ctx.clock.as_ref();
                request_persistence(ctx.environment.as_ref(), &ctx.durable, &ctx.notifier, clock);
                check_quota(
                    ctx.environment.as_ref(),
                    &ctx.notifier,
                    ctx.config.quota_warning_ratio,
                    clock,
                );
            });

        match spawned {
            Ok(handle) => *self.storage_checks.lock() = Some(handle),
            Err(e) => tracing::warn!(error = %e, "could not start storage checks"),
        }
    }
}

impl Drop for DocumentGuard {
    fn drop(&mut self) {
        self.shutdown();
    }
}
