//! Periodic runtime/init-status refresh workers and per-client `Watch*`
//! views over them (§4.8).

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use muxd_init_supervisor::InitSupervisor;
use muxd_registry::ClientRegistry;
use muxd_scheduler::Scheduler;

use crate::error::ObservabilityError;
use crate::log::{LogBroadcaster, LogEntry, LogLevel};
use crate::status_view::{InitStatusView, RuntimeStatusView};

/// Runtime-status refresh cadence (§4.8).
pub const RUNTIME_STATUS_INTERVAL: Duration = Duration::from_millis(500);
/// Server-init-status refresh cadence (§4.8).
pub const INIT_STATUS_INTERVAL: Duration = Duration::from_secs(1);

pub struct ObservabilityService {
    scheduler: Arc<Scheduler>,
    supervisor: Arc<InitSupervisor>,
    registry: Arc<ClientRegistry>,
    runtime_tx: watch::Sender<Arc<RuntimeStatusView>>,
    init_tx: watch::Sender<Arc<InitStatusView>>,
    logs: Arc<LogBroadcaster>,
}

impl ObservabilityService {
    pub fn new(scheduler: Arc<Scheduler>, supervisor: Arc<InitSupervisor>, registry: Arc<ClientRegistry>) -> Self {
        let (runtime_tx, _rx) = watch::channel(Arc::new(RuntimeStatusView::new(Default::default())));
        let (init_tx, _rx) = watch::channel(Arc::new(InitStatusView::new(Default::default())));
        Self {
            scheduler,
            supervisor,
            registry,
            runtime_tx,
            init_tx,
            logs: Arc::new(LogBroadcaster::new()),
        }
    }

    pub fn logs(&self) -> Arc<LogBroadcaster> {
        self.logs.clone()
    }

    /// `GetPoolStatus()` (§6): live, unfiltered, not the cached view.
    pub async fn get_pool_status(&self) -> RuntimeStatusView {
        RuntimeStatusView::new(self.scheduler.all_statuses().await)
    }

    /// `GetServerInitStatus()` (§6): live, unfiltered.
    pub async fn get_server_init_status(&self) -> InitStatusView {
        InitStatusView::new(self.supervisor.statuses().await)
    }

    /// `RetryServerInit(specKey)` (§6).
    pub async fn retry_server_init(&self, spec_key: &str) -> Result<(), ObservabilityError> {
        self.supervisor.retry_spec(spec_key).await.map_err(ObservabilityError::Supervisor)
    }

    pub fn stream_logs(&self, min_level: LogLevel) -> tokio::sync::mpsc::Receiver<LogEntry> {
        self.logs.subscribe(min_level)
    }

    /// Runtime-status refresh worker (§4.8): writes the live pool statuses
    /// into the cached `watch` channel every `RUNTIME_STATUS_INTERVAL`.
    pub fn spawn_runtime_refresher(self: &Arc<Self>) -> JoinHandle<()> {
        let this = self.clone();
        tokio::spawn(async move {
            let mut tick = tokio::time::interval(RUNTIME_STATUS_INTERVAL);
            loop {
                tick.tick().await;
                let view = RuntimeStatusView::new(this.scheduler.all_statuses().await);
                let _ = this.runtime_tx.send(Arc::new(view));
            }
        })
    }

    /// Server-init-status refresh worker (§4.8).
    pub fn spawn_init_refresher(self: &Arc<Self>) -> JoinHandle<()> {
        let this = self.clone();
        tokio::spawn(async move {
            let mut tick = tokio::time::interval(INIT_STATUS_INTERVAL);
            loop {
                tick.tick().await;
                let view = InitStatusView::new(this.supervisor.statuses().await);
                let _ = this.init_tx.send(Arc::new(view));
            }
        })
    }

    /// `WatchRuntimeStatus([client])` (§4.8): unfiltered for the global
    /// caller, per-client filtered (same rule as discovery) otherwise.
    pub async fn watch_runtime_status(
        self: &Arc<Self>,
        client_name: Option<&str>,
        cancel: CancellationToken,
    ) -> Result<watch::Receiver<Arc<RuntimeStatusView>>, ObservabilityError> {
        let Some(client_name) = client_name else {
            return Ok(self.runtime_tx.subscribe());
        };
        self.clone().watch_runtime_filtered(client_name.to_string(), cancel).await
    }

    async fn watch_runtime_filtered(
        self: Arc<Self>,
        client_name: String,
        cancel: CancellationToken,
    ) -> Result<watch::Receiver<Arc<RuntimeStatusView>>, ObservabilityError> {
        let client = self
            .registry
            .client_state(&client_name)
            .await
            .ok_or_else(|| ObservabilityError::UnknownClient(client_name.clone()))?;
        let initial = Arc::new(self.runtime_tx.borrow().filter(&client.visible_spec_keys));
        let (tx, rx) = watch::channel(initial);

        tokio::spawn(async move {
            let mut source = self.runtime_tx.subscribe();
            let mut change_rx = self.registry.subscribe_changes();
            loop {
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    res = source.changed() => {
                        if res.is_err() { break; }
                    }
                    res = change_rx.recv() => {
                        match res {
                            Ok(changed) if changed == client_name => {}
                            Ok(_) => continue,
                            Err(tokio::sync::broadcast::error::RecvError::Lagged(_)) => {}
                            Err(tokio::sync::broadcast::error::RecvError::Closed) => break,
                        }
                    }
                }
                let Some(client) = self.registry.client_state(&client_name).await else { break };
                let filtered = Arc::new(source.borrow().filter(&client.visible_spec_keys));
                if tx.send(filtered).is_err() {
                    break;
                }
            }
        });

        Ok(rx)
    }

    /// `WatchServerInitStatus([client])` (§4.8).
    pub async fn watch_server_init_status(
        self: &Arc<Self>,
        client_name: Option<&str>,
        cancel: CancellationToken,
    ) -> Result<watch::Receiver<Arc<InitStatusView>>, ObservabilityError> {
        let Some(client_name) = client_name else {
            return Ok(self.init_tx.subscribe());
        };
        self.clone().watch_init_filtered(client_name.to_string(), cancel).await
    }

    async fn watch_init_filtered(
        self: Arc<Self>,
        client_name: String,
        cancel: CancellationToken,
    ) -> Result<watch::Receiver<Arc<InitStatusView>>, ObservabilityError> {
        let client = self
            .registry
            .client_state(&client_name)
            .await
            .ok_or_else(|| ObservabilityError::UnknownClient(client_name.clone()))?;
        let initial = Arc::new(self.init_tx.borrow().filter(&client.visible_spec_keys));
        let (tx, rx) = watch::channel(initial);

        tokio::spawn(async move {
            let mut source = self.init_tx.subscribe();
            let mut change_rx = self.registry.subscribe_changes();
            loop {
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    res = source.changed() => {
                        if res.is_err() { break; }
                    }
                    res = change_rx.recv() => {
                        match res {
                            Ok(changed) if changed == client_name => {}
                            Ok(_) => continue,
                            Err(tokio::sync::broadcast::error::RecvError::Lagged(_)) => {}
                            Err(tokio::sync::broadcast::error::RecvError::Closed) => break,
                        }
                    }
                }
                let Some(client) = self.registry.client_state(&client_name).await else { break };
                let filtered = Arc::new(source.borrow().filter(&client.visible_spec_keys));
                if tx.send(filtered).is_err() {
                    break;
                }
            }
        });

        Ok(rx)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use muxd_domain::RuntimeConfig;
    use muxd_lifecycle::Lifecycle;

    fn make_service() -> Arc<ObservabilityService> {
        let scheduler = Arc::new(Scheduler::new(Arc::new(Lifecycle::new())));
        let supervisor = Arc::new(InitSupervisor::new(scheduler.clone(), RuntimeConfig::default()));
        let registry = Arc::new(ClientRegistry::new(supervisor.clone(), RuntimeConfig::default()));
        Arc::new(ObservabilityService::new(scheduler, supervisor, registry))
    }

    #[tokio::test]
    async fn get_pool_status_on_empty_scheduler_is_empty() {
        let service = make_service();
        let view = service.get_pool_status().await;
        assert!(view.pools.is_empty());
    }

    #[tokio::test]
    async fn get_server_init_status_on_empty_supervisor_is_empty() {
        let service = make_service();
        let view = service.get_server_init_status().await;
        assert!(view.statuses.is_empty());
    }

    #[tokio::test]
    async fn retry_unknown_spec_is_an_error() {
        let service = make_service();
        assert!(service.retry_server_init("missing").await.is_err());
    }

    #[tokio::test]
    async fn watch_runtime_status_without_client_is_unfiltered() {
        let service = make_service();
        let rx = service
            .watch_runtime_status(None, CancellationToken::new())
            .await
            .unwrap();
        assert!(rx.borrow().pools.is_empty());
    }

    #[tokio::test]
    async fn watch_runtime_status_unknown_client_errors() {
        let service = make_service();
        let err = service
            .watch_runtime_status(Some("ghost"), CancellationToken::new())
            .await
            .unwrap_err();
        assert!(matches!(err, ObservabilityError::UnknownClient(_)));
    }
}
