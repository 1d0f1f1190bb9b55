//! Per-client filtered views over the aggregator indexes, plus
//! visibility-gated call routing (§4.7).

use std::sync::Arc;

use tokio::sync::watch;
use tokio_util::sync::CancellationToken;

use muxd_domain::{Entry, Snapshot};
use muxd_indexes::{Capability, Index, Indexes};
use muxd_lifecycle::ToolCallResult;
use muxd_registry::ClientRegistry;
use muxd_scheduler::Scheduler;

use crate::error::DiscoveryError;
use crate::page::paginate;
use crate::visibility::filter_snapshot;

fn select_index(indexes: &Indexes, capability: Capability) -> &Index {
    match capability {
        Capability::Tools => &indexes.tools,
        Capability::Resources => &indexes.resources,
        Capability::Prompts => &indexes.prompts,
    }
}

/// The discovery service: `ListTools`/`ListResources`/`ListPrompts`,
/// `Watch*`, and the visibility-gated `CallTool`/`ReadResource`/`GetPrompt`
/// routing calls (§4.7, §6).
pub struct DiscoveryService {
    indexes: Arc<Indexes>,
    registry: Arc<ClientRegistry>,
    scheduler: Arc<Scheduler>,
    page_size: usize,
}

impl DiscoveryService {
    pub fn new(
        indexes: Arc<Indexes>,
        registry: Arc<ClientRegistry>,
        scheduler: Arc<Scheduler>,
        page_size: usize,
    ) -> Self {
        Self {
            indexes,
            registry,
            scheduler,
            page_size,
        }
    }

    async fn list(
        &self,
        capability: Capability,
        client_name: &str,
        cursor: Option<&str>,
    ) -> Result<(Vec<Entry>, Option<String>), DiscoveryError> {
        let client = self
            .registry
            .client_state(client_name)
            .await
            .ok_or_else(|| DiscoveryError::UnknownClient(client_name.to_string()))?;
        let snapshot = select_index(&self.indexes, capability).snapshot();
        let filtered = filter_snapshot(&snapshot, &client.visible_spec_keys);
        paginate(&filtered.entries, cursor, self.page_size)
    }

    pub async fn list_tools(
        &self,
        client_name: &str,
        cursor: Option<&str>,
    ) -> Result<(Vec<Entry>, Option<String>), DiscoveryError> {
        self.list(Capability::Tools, client_name, cursor).await
    }

    pub async fn list_resources(
        &self,
        client_name: &str,
        cursor: Option<&str>,
    ) -> Result<(Vec<Entry>, Option<String>), DiscoveryError> {
        self.list(Capability::Resources, client_name, cursor).await
    }

    pub async fn list_prompts(
        &self,
        client_name: &str,
        cursor: Option<&str>,
    ) -> Result<(Vec<Entry>, Option<String>), DiscoveryError> {
        self.list(Capability::Prompts, client_name, cursor).await
    }

    /// `Watch*(ctx, client)` (§4.7): subscribe to the underlying index and
    /// to client-change events, send the current filtered snapshot
    /// immediately, then re-filter and send on every later event. The
    /// returned `watch::Receiver` already has the 1-slot, newest-wins
    /// semantics §4.7 point 4 asks for.
    pub async fn watch_tools(
        self: &Arc<Self>,
        client_name: &str,
        cancel: CancellationToken,
    ) -> Result<watch::Receiver<Arc<Snapshot>>, DiscoveryError> {
        self.clone().watch(Capability::Tools, client_name.to_string(), cancel).await
    }

    pub async fn watch_resources(
        self: &Arc<Self>,
        client_name: &str,
        cancel: CancellationToken,
    ) -> Result<watch::Receiver<Arc<Snapshot>>, DiscoveryError> {
        self.clone().watch(Capability::Resources, client_name.to_string(), cancel).await
    }

    pub async fn watch_prompts(
        self: &Arc<Self>,
        client_name: &str,
        cancel: CancellationToken,
    ) -> Result<watch::Receiver<Arc<Snapshot>>, DiscoveryError> {
        self.clone().watch(Capability::Prompts, client_name.to_string(), cancel).await
    }

    async fn watch(
        self: Arc<Self>,
        capability: Capability,
        client_name: String,
        cancel: CancellationToken,
    ) -> Result<watch::Receiver<Arc<Snapshot>>, DiscoveryError> {
        let client = self
            .registry
            .client_state(&client_name)
            .await
            .ok_or_else(|| DiscoveryError::UnknownClient(client_name.clone()))?;
        let source = select_index(&self.indexes, capability).snapshot();
        let initial = Arc::new(filter_snapshot(&source, &client.visible_spec_keys));
        let (tx, rx) = watch::channel(initial);

        tokio::spawn(async move {
            let mut index_rx = select_index(&self.indexes, capability).subscribe();
            let mut change_rx = self.registry.subscribe_changes();
            loop {
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    res = index_rx.changed() => {
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

                let Some(client) = self.registry.client_state(&client_name).await else {
                    break;
                };
                let snap = select_index(&self.indexes, capability).snapshot();
                let filtered = Arc::new(filter_snapshot(&snap, &client.visible_spec_keys));
                if tx.send(filtered).is_err() {
                    break;
                }
            }
        });

        Ok(rx)
    }

    /// `CallTool` (§4.7, §6): visible tool ⇒ route through the scheduler;
    /// otherwise `NotFound`, indistinguishable from a genuinely absent tool.
    pub async fn call_tool(
        &self,
        cancel: CancellationToken,
        client_name: &str,
        tool_name: &str,
        arguments: serde_json::Value,
        routing_key: Option<&str>,
    ) -> Result<ToolCallResult, DiscoveryError> {
        let spec_key = self
            .resolve_visible(Capability::Tools, client_name, tool_name)
            .await?;
        self.scheduler
            .call_tool(cancel, &spec_key, routing_key, tool_name, arguments)
            .await
            .map_err(DiscoveryError::Scheduler)
    }

    /// `ReadResource` (§4.7, §6).
    pub async fn read_resource(
        &self,
        cancel: CancellationToken,
        client_name: &str,
        uri: &str,
        routing_key: Option<&str>,
    ) -> Result<serde_json::Value, DiscoveryError> {
        let spec_key = self
            .resolve_visible(Capability::Resources, client_name, uri)
            .await?;
        self.scheduler
            .read_resource(cancel, &spec_key, routing_key, uri)
            .await
            .map_err(DiscoveryError::Scheduler)
    }

    /// `GetPrompt` (§4.7, §6).
    pub async fn get_prompt(
        &self,
        cancel: CancellationToken,
        client_name: &str,
        name: &str,
        arguments: serde_json::Value,
        routing_key: Option<&str>,
    ) -> Result<serde_json::Value, DiscoveryError> {
        let spec_key = self
            .resolve_visible(Capability::Prompts, client_name, name)
            .await?;
        self.scheduler
            .get_prompt(cancel, &spec_key, routing_key, name, arguments)
            .await
            .map_err(DiscoveryError::Scheduler)
    }

    async fn resolve_visible(
        &self,
        capability: Capability,
        client_name: &str,
        key: &str,
    ) -> Result<String, DiscoveryError> {
        let client = self
            .registry
            .client_state(client_name)
            .await
            .ok_or_else(|| DiscoveryError::UnknownClient(client_name.to_string()))?;
        let snapshot = select_index(&self.indexes, capability).snapshot();
        snapshot
            .entries
            .iter()
            .find(|e| e.key == key && client.visible_spec_keys.contains(&e.spec_key))
            .map(|e| e.spec_key.clone())
            .ok_or_else(|| DiscoveryError::NotFound(key.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;
    use std::time::Duration as StdDuration;

    use chrono::Utc;
    use muxd_domain::{
        ActivationMode, EntrySource, RuntimeConfig, SessionStrategy, Spec, Transport,
    };
    use muxd_indexes::{MetadataCache, RefreshGate};
    use muxd_init_supervisor::InitSupervisor;
    use muxd_lifecycle::Lifecycle;

    fn spec(name: &str, tags: &[&str]) -> Spec {
        Spec {
            name: name.into(),
            transport: Transport::Stdio {
                command: "true".into(),
                args: vec![],
            },
            env: Default::default(),
            working_dir: None,
            tags: tags.iter().map(|t| t.to_string()).collect(),
            max_concurrent: 4,
            min_ready: 0,
            session_strategy: SessionStrategy::Stateless,
            session_ttl_seconds: 0,
            idle_seconds: 300,
            drain_timeout_seconds: 10,
            activation_mode: ActivationMode::OnDemand,
            protocol_version: "2024-11-05".into(),
            ping_interval_seconds: 30,
            disabled: false,
            expose_tools: None,
        }
    }

    fn entry(key: &str, spec_key: &str) -> Entry {
        Entry {
            key: key.into(),
            spec_key: spec_key.into(),
            server_name: "srv".into(),
            schema: serde_json::json!({}),
            source: EntrySource::Cache,
            cached_at: Utc::now(),
        }
    }

    async fn build(visible_spec: &Spec, hidden_spec: &Spec) -> (Arc<DiscoveryService>, String) {
        let cache = Arc::new(MetadataCache::new(None));
        let gate = Arc::new(RefreshGate::new());

        cache
            .store(
                Capability::Tools,
                &visible_spec.fingerprint(),
                vec![entry("visible-tool", &visible_spec.fingerprint())],
            )
            .await;
        cache
            .store(
                Capability::Tools,
                &hidden_spec.fingerprint(),
                vec![entry("hidden-tool", &hidden_spec.fingerprint())],
            )
            .await;

        let tools = Index::new(Capability::Tools, cache.clone(), gate.clone());
        let resources = Index::new(Capability::Resources, cache.clone(), gate.clone());
        let prompts = Index::new(Capability::Prompts, cache, gate);

        let mut specs = BTreeMap::new();
        specs.insert(visible_spec.fingerprint(), visible_spec.clone());
        specs.insert(hidden_spec.fingerprint(), hidden_spec.clone());
        tools.update_specs(specs.clone()).await;
        resources.update_specs(specs.clone()).await;
        prompts.update_specs(specs).await;
        tools.bootstrap_from_cache().await;

        let indexes = Arc::new(Indexes { tools, resources, prompts });

        let scheduler = Arc::new(Scheduler::new(Arc::new(Lifecycle::new())));
        let supervisor = Arc::new(InitSupervisor::new(scheduler.clone(), RuntimeConfig::default()));
        let registry = Arc::new(ClientRegistry::new(supervisor, RuntimeConfig::default()));
        let mut catalog = BTreeMap::new();
        catalog.insert(visible_spec.fingerprint(), visible_spec.clone());
        registry.apply_catalog_update(catalog).await;
        registry
            .register_client("c1", 100, vec!["blue".into()])
            .await
            .unwrap();

        let service = Arc::new(DiscoveryService::new(indexes, registry, scheduler, 200));
        (service, "c1".to_string())
    }

    #[tokio::test]
    async fn list_tools_hides_invisible_spec() {
        let visible = spec("visible", &["blue"]);
        let hidden = spec("hidden", &["red"]);
        let (service, client) = build(&visible, &hidden).await;

        let (page, next) = service.list_tools(&client, None).await.unwrap();
        assert_eq!(page.len(), 1);
        assert_eq!(page[0].key, "visible-tool");
        assert!(next.is_none());
    }

    #[tokio::test]
    async fn list_tools_unknown_client_errors() {
        let visible = spec("visible", &["blue"]);
        let hidden = spec("hidden", &["red"]);
        let (service, _) = build(&visible, &hidden).await;

        let err = service.list_tools("ghost", None).await.unwrap_err();
        assert!(matches!(err, DiscoveryError::UnknownClient(_)));
    }

    #[tokio::test]
    async fn call_tool_on_hidden_tool_is_not_found() {
        let visible = spec("visible", &["blue"]);
        let hidden = spec("hidden", &["red"]);
        let (service, client) = build(&visible, &hidden).await;

        let err = service
            .call_tool(
                CancellationToken::new(),
                &client,
                "hidden-tool",
                serde_json::json!({}),
                None,
            )
            .await
            .unwrap_err();
        assert!(matches!(err, DiscoveryError::NotFound(_)));
    }

    #[tokio::test]
    async fn call_tool_on_unknown_name_is_not_found() {
        let visible = spec("visible", &["blue"]);
        let hidden = spec("hidden", &["red"]);
        let (service, client) = build(&visible, &hidden).await;

        let err = service
            .call_tool(
                CancellationToken::new(),
                &client,
                "does-not-exist",
                serde_json::json!({}),
                None,
            )
            .await
            .unwrap_err();
        assert!(matches!(err, DiscoveryError::NotFound(_)));
    }

    #[tokio::test]
    async fn watch_tools_delivers_filtered_snapshot_immediately() {
        let visible = spec("visible", &["blue"]);
        let hidden = spec("hidden", &["red"]);
        let (service, client) = build(&visible, &hidden).await;

        let mut rx = service.watch_tools(&client, CancellationToken::new()).await.unwrap();
        let snap = rx.borrow_and_update().clone();
        assert_eq!(snap.entries.len(), 1);
        assert_eq!(snap.entries[0].key, "visible-tool");

        tokio::time::timeout(StdDuration::from_millis(50), rx.changed())
            .await
            .expect_err("no further publication expected without a catalog or index change");
    }
}
