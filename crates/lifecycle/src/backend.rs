//! Lifecycle: launches and terminates a single backend instance and wraps
//! its transport (§4.2).
//!
//! This module owns nothing beyond one running instance at a time — no map
//! of servers, no pool bookkeeping. That belongs to the scheduler crate,
//! which is the exclusive owner of a spec's instances; `Lifecycle` is the
//! stateless thing the scheduler calls to start and stop them.

use std::sync::atomic::{AtomicU64, Ordering};

use serde_json::Value;

use muxd_domain::{Instance, InstanceState, Spec, StartCause, Transport};

use crate::protocol::{self, BackendToolDef, ToolCallResult, ToolsListResult};
use crate::transport::{BackendTransport, StdioTransport, StreamableHttpTransport, TransportError};

/// Errors raised while starting, driving, or stopping a backend instance.
#[derive(Debug, thiserror::Error)]
pub enum LifecycleError {
    #[error("transport error: {0}")]
    Transport(#[from] TransportError),

    #[error("handshake error: {0}")]
    Handshake(String),
}

impl LifecycleError {
    /// True for the subset that short-circuits retry (§4.2, §4.4): a
    /// malformed `initialize` response is treated the same as a transport
    /// classified as fatal, since retrying won't change a backend's own
    /// protocol implementation.
    pub fn is_fatal(&self) -> bool {
        match self {
            LifecycleError::Transport(e) => e.is_fatal(),
            LifecycleError::Handshake(_) => false,
        }
    }
}

impl From<LifecycleError> for muxd_domain::Error {
    fn from(e: LifecycleError) -> Self {
        match e {
            LifecycleError::Transport(TransportError::InvalidCommand(m)) => {
                muxd_domain::Error::InvalidCommand(m)
            }
            LifecycleError::Transport(TransportError::ExecutableNotFound(m)) => {
                muxd_domain::Error::ExecutableNotFound(m)
            }
            LifecycleError::Transport(TransportError::PermissionDenied(m)) => {
                muxd_domain::Error::PermissionDenied(m)
            }
            LifecycleError::Transport(TransportError::Unsupported(m)) => {
                muxd_domain::Error::UnsupportedProtocol(m)
            }
            LifecycleError::Transport(TransportError::Timeout) => {
                muxd_domain::Error::DeadlineExceeded
            }
            LifecycleError::Transport(TransportError::ProcessExited) => {
                muxd_domain::Error::Unavailable("backend process exited".into())
            }
            LifecycleError::Transport(TransportError::Io(e)) => muxd_domain::Error::Io(e),
            LifecycleError::Transport(TransportError::Json(e)) => muxd_domain::Error::Json(e),
            LifecycleError::Handshake(m) => muxd_domain::Error::Internal(m),
        }
    }
}

/// One started backend instance: the domain-level [`Instance`] bookkeeping
/// plus the live transport it's reachable over.
pub struct RunningBackend {
    pub instance: Instance,
    pub tools: Vec<BackendToolDef>,
    transport: Box<dyn BackendTransport>,
}

impl RunningBackend {
    pub fn is_alive(&self) -> bool {
        self.transport.is_alive()
    }
}

/// Starts and stops backend instances by running the handshake in §4.2:
/// spawn transport -> `initialize` -> `notifications/initialized` ->
/// best-effort `tools/list`.
#[derive(Default)]
pub struct Lifecycle {
    next_id: AtomicU64,
}

impl Lifecycle {
    pub fn new() -> Self {
        Self {
            next_id: AtomicU64::new(1),
        }
    }

    /// Start one instance of `spec` and run it through the handshake to
    /// `Ready`. On any error the instance is left in `Failed` and the error
    /// is returned for the caller (the scheduler's init-supervisor) to
    /// classify as fatal or transient.
    pub async fn start(
        &self,
        spec: &Spec,
        spec_key: &str,
        cause: StartCause,
    ) -> Result<RunningBackend, LifecycleError> {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let mut instance = Instance::new(id, spec_key.to_string(), cause);

        let transport: Box<dyn BackendTransport> = match &spec.transport {
            Transport::Stdio { .. } => Box::new(StdioTransport::spawn(spec)?),
            Transport::StreamableHttp { .. } => {
                tracing::warn!(
                    spec = %spec.name,
                    "streamable-http transport is not yet implemented, instance will fail fast"
                );
                Box::new(StreamableHttpTransport)
            }
        };

        instance.transition(InstanceState::Initializing);

        let init_params = protocol::initialize_params();
        let params_value = serde_json::to_value(&init_params).map_err(|e| {
            LifecycleError::Handshake(format!("failed to serialize initialize params: {e}"))
        })?;

        let resp = transport.send_request("initialize", Some(params_value)).await?;
        if resp.is_error() {
            instance.transition(InstanceState::Failed);
            let err = resp.error.unwrap();
            return Err(LifecycleError::Handshake(format!(
                "initialize failed: {err}"
            )));
        }

        tracing::debug!(spec = %spec.name, instance_id = id, "backend initialize response received");

        instance.transition(InstanceState::Handshaking);

        transport.send_notification("notifications/initialized").await?;

        tracing::debug!(spec = %spec.name, instance_id = id, "sent notifications/initialized");

        let tools = match transport.send_request("tools/list", None).await {
            Ok(resp) if !resp.is_error() => {
                let result_value = resp.result.unwrap_or(Value::Null);
                match serde_json::from_value::<ToolsListResult>(result_value) {
                    Ok(r) => r.tools,
                    Err(e) => {
                        tracing::warn!(
                            spec = %spec.name,
                            instance_id = id,
                            error = %e,
                            "failed to parse tools/list result, instance will expose no tools"
                        );
                        Vec::new()
                    }
                }
            }
            Ok(_) => {
                tracing::warn!(
                    spec = %spec.name,
                    instance_id = id,
                    "tools/list returned an error, instance will expose no tools"
                );
                Vec::new()
            }
            Err(e) => {
                tracing::warn!(
                    spec = %spec.name,
                    instance_id = id,
                    error = %e,
                    "tools/list failed, instance will expose no tools"
                );
                Vec::new()
            }
        };

        instance.transition(InstanceState::Ready);

        tracing::info!(
            spec = %spec.name,
            instance_id = id,
            tool_count = tools.len(),
            "backend instance ready"
        );

        Ok(RunningBackend {
            instance,
            tools,
            transport,
        })
    }

    /// Gracefully stop a running instance.
    pub async fn stop(&self, running: &RunningBackend, reason: &str) {
        tracing::info!(
            instance_id = running.instance.id,
            spec_key = %running.instance.spec_key,
            reason,
            "stopping backend instance"
        );
        running.transport.shutdown().await;
    }

    /// Call a tool on a running instance.
    pub async fn call_tool(
        &self,
        running: &RunningBackend,
        tool_name: &str,
        arguments: Value,
    ) -> Result<ToolCallResult, LifecycleError> {
        if !running.transport.is_alive() {
            return Err(LifecycleError::Transport(TransportError::ProcessExited));
        }

        let params = serde_json::json!({
            "name": tool_name,
            "arguments": arguments,
        });

        let resp = running.transport.send_request("tools/call", Some(params)).await?;
        if resp.is_error() {
            let err = resp.error.unwrap();
            return Err(LifecycleError::Handshake(format!("tools/call failed: {err}")));
        }

        let result_value = resp.result.unwrap_or(Value::Null);
        serde_json::from_value::<ToolCallResult>(result_value)
            .map_err(|e| LifecycleError::Handshake(format!("failed to parse tools/call result: {e}")))
    }

    /// Read a resource on a running instance (§6 `ReadResource`).
    pub async fn read_resource(&self, running: &RunningBackend, uri: &str) -> Result<Value, LifecycleError> {
        if !running.transport.is_alive() {
            return Err(LifecycleError::Transport(TransportError::ProcessExited));
        }
        let params = serde_json::json!({ "uri": uri });
        let resp = running.transport.send_request("resources/read", Some(params)).await?;
        if resp.is_error() {
            let err = resp.error.unwrap();
            return Err(LifecycleError::Handshake(format!("resources/read failed: {err}")));
        }
        Ok(resp.result.unwrap_or(Value::Null))
    }

    /// Fetch a prompt on a running instance (§6 `GetPrompt`).
    pub async fn get_prompt(
        &self,
        running: &RunningBackend,
        name: &str,
        arguments: Value,
    ) -> Result<Value, LifecycleError> {
        if !running.transport.is_alive() {
            return Err(LifecycleError::Transport(TransportError::ProcessExited));
        }
        let params = serde_json::json!({ "name": name, "arguments": arguments });
        let resp = running.transport.send_request("prompts/get", Some(params)).await?;
        if resp.is_error() {
            let err = resp.error.unwrap();
            return Err(LifecycleError::Handshake(format!("prompts/get failed: {err}")));
        }
        Ok(resp.result.unwrap_or(Value::Null))
    }

    /// Re-list a capability (`tools/list`, `resources/list`, `prompts/list`)
    /// for the aggregator's refresh protocol (§4.6). Returns the raw result
    /// value since each capability has its own result shape.
    pub async fn list_capability(
        &self,
        running: &RunningBackend,
        method: &str,
    ) -> Result<Value, LifecycleError> {
        let resp = running.transport.send_request(method, None).await?;
        if resp.is_error() {
            let err = resp.error.unwrap();
            return Err(LifecycleError::Handshake(format!("{method} failed: {err}")));
        }
        Ok(resp.result.unwrap_or(Value::Null))
    }

    /// Health-check ping (§4.3.3 ping manager).
    pub async fn ping(&self, running: &RunningBackend) -> Result<(), LifecycleError> {
        if !running.transport.is_alive() {
            return Err(LifecycleError::Transport(TransportError::ProcessExited));
        }
        let resp = running.transport.send_request("ping", None).await?;
        if resp.is_error() {
            let err = resp.error.unwrap();
            return Err(LifecycleError::Handshake(format!("ping failed: {err}")));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use muxd_domain::StartReason;
    use std::collections::BTreeMap;

    fn stdio_spec(command: &str) -> Spec {
        Spec {
            name: "test-spec".into(),
            transport: Transport::Stdio {
                command: command.into(),
                args: vec![],
            },
            env: BTreeMap::new(),
            working_dir: None,
            tags: vec![],
            max_concurrent: 4,
            min_ready: 0,
            session_strategy: muxd_domain::SessionStrategy::Stateless,
            session_ttl_seconds: 0,
            idle_seconds: 300,
            drain_timeout_seconds: 10,
            activation_mode: muxd_domain::ActivationMode::OnDemand,
            protocol_version: "2024-11-05".into(),
            ping_interval_seconds: 30,
            disabled: false,
            expose_tools: None,
        }
    }

    #[tokio::test]
    async fn start_classifies_missing_executable_as_fatal() {
        let lifecycle = Lifecycle::new();
        let spec = stdio_spec("/definitely/not/a/real/executable-xyz");
        let cause = StartCause::new(StartReason::ToolCall);
        let err = lifecycle.start(&spec, "spec-key", cause).await.unwrap_err();
        assert!(err.is_fatal());
    }

    #[tokio::test]
    async fn start_classifies_empty_command_as_fatal() {
        let lifecycle = Lifecycle::new();
        let spec = stdio_spec("");
        let cause = StartCause::new(StartReason::ToolCall);
        let err = lifecycle.start(&spec, "spec-key", cause).await.unwrap_err();
        assert!(err.is_fatal());
    }

    #[tokio::test]
    async fn streamable_http_is_classified_unsupported() {
        let lifecycle = Lifecycle::new();
        let spec = Spec {
            name: "http-spec".into(),
            transport: Transport::StreamableHttp {
                endpoint: "http://127.0.0.1:0".into(),
                headers: BTreeMap::new(),
            },
            env: BTreeMap::new(),
            working_dir: None,
            tags: vec![],
            max_concurrent: 4,
            min_ready: 0,
            session_strategy: muxd_domain::SessionStrategy::Stateless,
            session_ttl_seconds: 0,
            idle_seconds: 300,
            drain_timeout_seconds: 10,
            activation_mode: muxd_domain::ActivationMode::OnDemand,
            protocol_version: "2024-11-05".into(),
            ping_interval_seconds: 30,
            disabled: false,
            expose_tools: None,
        };
        let cause = StartCause::new(StartReason::ToolCall);
        let err = lifecycle.start(&spec, "spec-key", cause).await.unwrap_err();
        assert!(err.is_fatal());
        assert!(matches!(
            err,
            LifecycleError::Transport(TransportError::Unsupported(_))
        ));
    }
}
