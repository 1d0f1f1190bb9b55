//! Reload manager (§4.9): the single task that applies catalog updates in
//! the load-bearing order the spec lays out, plus the `appliedRevision`
//! counter manual `Reload(ctx)` waits on.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{mpsc, Notify, RwLock};
use tokio::task::JoinHandle;

use muxd_domain::{CatalogDiff, CatalogState};
use muxd_indexes::Indexes;
use muxd_init_supervisor::InitSupervisor;
use muxd_registry::ClientRegistry;
use muxd_scheduler::Scheduler;

use crate::error::ReloadError;
use crate::provider::ConfigProvider;

const UPDATE_QUEUE_DEPTH: usize = 8;

pub struct ReloadManager {
    scheduler: Arc<Scheduler>,
    supervisor: Arc<InitSupervisor>,
    registry: Arc<ClientRegistry>,
    indexes: Arc<Indexes>,
    state: RwLock<Arc<CatalogState>>,
    applied_revision: AtomicU64,
    revision_changed: Notify,
    list_timeout: Duration,
    update_tx: mpsc::Sender<CatalogState>,
}

impl ReloadManager {
    /// Builds the manager and its update queue. The caller is responsible
    /// for spawning `run` once (the manager's "single task", per §4.9).
    pub fn new(
        scheduler: Arc<Scheduler>,
        supervisor: Arc<InitSupervisor>,
        registry: Arc<ClientRegistry>,
        indexes: Arc<Indexes>,
        initial: CatalogState,
        list_timeout: Duration,
    ) -> (Arc<Self>, mpsc::Receiver<CatalogState>) {
        let (update_tx, update_rx) = mpsc::channel(UPDATE_QUEUE_DEPTH);
        let revision = initial.revision;
        let manager = Arc::new(Self {
            scheduler,
            supervisor,
            registry,
            indexes,
            state: RwLock::new(Arc::new(initial)),
            applied_revision: AtomicU64::new(revision),
            revision_changed: Notify::new(),
            list_timeout,
            update_tx,
        });
        (manager, update_rx)
    }

    pub fn applied_revision(&self) -> u64 {
        self.applied_revision.load(Ordering::SeqCst)
    }

    pub async fn current(&self) -> Arc<CatalogState> {
        self.state.read().await.clone()
    }

    /// Consumes the update queue forever, applying each update in order
    /// (§5: "Reload manager serializes all catalog-application work; no two
    /// diffs are applied concurrently").
    pub fn spawn_run(self: Arc<Self>, mut updates: mpsc::Receiver<CatalogState>) -> JoinHandle<()> {
        tokio::spawn(async move {
            while let Some(next) = updates.recv().await {
                if let Err(e) = self.apply(next).await {
                    tracing::warn!(error = %e, "catalog reload aborted");
                }
            }
        })
    }

    /// `Reload(ctx)` (§6, §4.9): force the provider to reread, enqueue the
    /// result, and block until `appliedRevision` has caught up.
    pub async fn reload(&self, provider: &dyn ConfigProvider) -> Result<(), ReloadError> {
        let next = provider.reload().await?;
        let requested = next.revision;
        self.update_tx
            .send(next)
            .await
            .map_err(|_| ReloadError::Invalid("reload queue closed".into()))?;
        self.wait_for_revision(requested).await;
        Ok(())
    }

    async fn wait_for_revision(&self, requested: u64) {
        loop {
            if self.applied_revision() >= requested {
                return;
            }
            let notified = self.revision_changed.notified();
            if self.applied_revision() >= requested {
                return;
            }
            notified.await;
        }
    }

    /// The seven-step catalog application sequence (§4.9). Ordering is
    /// load-bearing: the scheduler diff is applied before any state swap, so
    /// a scheduler failure leaves the previous catalog fully in effect.
    async fn apply(&self, next: CatalogState) -> Result<(), ReloadError> {
        let current = self.current().await;

        let diff = CatalogDiff::compute(&current, &next);
        if diff.is_empty() && !diff.runtime_only {
            self.applied_revision.store(next.revision, Ordering::SeqCst);
            self.revision_changed.notify_waiters();
            return Ok(());
        }
        if CatalogDiff::requires_restart(&current.runtime, &next.runtime) {
            return Err(ReloadError::RequiresRestart);
        }

        // Step 2: scheduler diff first; abort on failure, no state swap.
        self.scheduler.apply_catalog_diff(&diff, &next.catalog).await?;

        // Step 3: notify the init supervisor of the new catalog.
        for key in diff.added.iter().chain(diff.updated.iter().map(|(_, new)| new)) {
            if let Some(spec) = next.catalog.get(key) {
                self.supervisor.ensure_worker(key.clone(), spec.clone()).await;
            }
        }
        for key in diff.removed.iter().chain(diff.updated.iter().map(|(old, _)| old)) {
            self.supervisor.remove_worker(key).await;
        }
        self.supervisor.update_runtime(next.runtime.clone()).await;

        // Step 4: atomic swap.
        let next = Arc::new(next);
        *self.state.write().await = next.clone();

        // Step 5: registry reference-count transitions and client events.
        self.registry.apply_catalog_update(next.catalog.clone()).await;

        // Step 6: index refresh, log-only on per-index failure (refresh()
        // itself already swallows and logs per-spec errors).
        self.indexes.update_specs(next.catalog.clone()).await;
        self.indexes.refresh_all(&self.scheduler, self.list_timeout).await;

        // Step 7: unblock any `Reload()` waiters on this revision.
        self.applied_revision.store(next.revision, Ordering::SeqCst);
        self.revision_changed.notify_waiters();

        Ok(())
    }
}
