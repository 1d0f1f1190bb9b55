//! The §6 RPC surface, as plain async methods on [`ControlPlane`]. Every
//! call delegates to the subsystem crate that owns the behaviour; this
//! module's only job is naming and uniform error conversion — the wire
//! codec and transport that would carry these calls to a client are out of
//! scope here.

use serde_json::Value;
use tokio_util::sync::CancellationToken;

use muxd_domain::{ClientRegistration, ClientState, Entry, Error as DomainError, Result as DomainResult};
use muxd_lifecycle::ToolCallResult;
use muxd_observability::{InitStatusView, LogEntry, LogLevel, RuntimeStatusView};

use crate::state::ControlPlane;

impl ControlPlane {
    pub async fn register_client(
        &self,
        name: &str,
        pid: u32,
        tags: Vec<String>,
    ) -> DomainResult<ClientRegistration> {
        Ok(self.registry.register_client(name, pid, tags).await?)
    }

    pub async fn unregister_client(&self, name: &str) -> DomainResult<()> {
        Ok(self.registry.unregister_client(name).await?)
    }

    pub async fn list_active_clients(&self) -> Vec<ClientState> {
        self.registry.list_active_clients().await
    }

    pub async fn watch_active_clients(&self) -> tokio::sync::broadcast::Receiver<String> {
        self.registry.subscribe_changes()
    }

    pub async fn list_tools(
        &self,
        client: &str,
        cursor: Option<&str>,
    ) -> DomainResult<(Vec<Entry>, Option<String>)> {
        Ok(self.discovery.list_tools(client, cursor).await?)
    }

    pub async fn list_resources(
        &self,
        client: &str,
        cursor: Option<&str>,
    ) -> DomainResult<(Vec<Entry>, Option<String>)> {
        Ok(self.discovery.list_resources(client, cursor).await?)
    }

    pub async fn list_prompts(
        &self,
        client: &str,
        cursor: Option<&str>,
    ) -> DomainResult<(Vec<Entry>, Option<String>)> {
        Ok(self.discovery.list_prompts(client, cursor).await?)
    }

    pub async fn watch_tools(
        &self,
        client: &str,
        cancel: CancellationToken,
    ) -> DomainResult<tokio::sync::watch::Receiver<std::sync::Arc<muxd_domain::Snapshot>>> {
        Ok(self.discovery.watch_tools(client, cancel).await?)
    }

    pub async fn watch_resources(
        &self,
        client: &str,
        cancel: CancellationToken,
    ) -> DomainResult<tokio::sync::watch::Receiver<std::sync::Arc<muxd_domain::Snapshot>>> {
        Ok(self.discovery.watch_resources(client, cancel).await?)
    }

    pub async fn watch_prompts(
        &self,
        client: &str,
        cancel: CancellationToken,
    ) -> DomainResult<tokio::sync::watch::Receiver<std::sync::Arc<muxd_domain::Snapshot>>> {
        Ok(self.discovery.watch_prompts(client, cancel).await?)
    }

    pub async fn call_tool(
        &self,
        cancel: CancellationToken,
        client: &str,
        name: &str,
        arguments: Value,
        routing_key: Option<&str>,
    ) -> DomainResult<ToolCallResult> {
        Ok(self
            .discovery
            .call_tool(cancel, client, name, arguments, routing_key)
            .await?)
    }

    pub async fn read_resource(
        &self,
        cancel: CancellationToken,
        client: &str,
        uri: &str,
        routing_key: Option<&str>,
    ) -> DomainResult<Value> {
        Ok(self.discovery.read_resource(cancel, client, uri, routing_key).await?)
    }

    pub async fn get_prompt(
        &self,
        cancel: CancellationToken,
        client: &str,
        name: &str,
        arguments: Value,
        routing_key: Option<&str>,
    ) -> DomainResult<Value> {
        Ok(self
            .discovery
            .get_prompt(cancel, client, name, arguments, routing_key)
            .await?)
    }

    pub async fn get_pool_status(&self) -> RuntimeStatusView {
        self.observability.get_pool_status().await
    }

    pub async fn watch_runtime_status(
        &self,
        client: Option<&str>,
        cancel: CancellationToken,
    ) -> DomainResult<tokio::sync::watch::Receiver<std::sync::Arc<RuntimeStatusView>>> {
        Ok(self.observability.watch_runtime_status(client, cancel).await?)
    }

    pub async fn get_server_init_status(&self) -> InitStatusView {
        self.observability.get_server_init_status().await
    }

    pub async fn watch_server_init_status(
        &self,
        client: Option<&str>,
        cancel: CancellationToken,
    ) -> DomainResult<tokio::sync::watch::Receiver<std::sync::Arc<InitStatusView>>> {
        Ok(self.observability.watch_server_init_status(client, cancel).await?)
    }

    pub async fn retry_server_init(&self, spec_key: &str) -> DomainResult<()> {
        Ok(self.observability.retry_server_init(spec_key).await?)
    }

    pub fn stream_logs(&self, min_level: LogLevel) -> tokio::sync::mpsc::Receiver<LogEntry> {
        self.observability.stream_logs(min_level)
    }

    /// `ReloadConfig()` (§6, §4.9): force the provider to reread and block
    /// until the applied revision has caught up.
    pub async fn reload_config(&self) -> Result<(), DomainError> {
        self.reload
            .reload(self.provider.as_ref())
            .await
            .map_err(Into::into)
    }
}
