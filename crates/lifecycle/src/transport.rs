//! Backend transport layer.
//!
//! Each backend instance communicates over a transport. Currently supported:
//! - **Stdio**: spawn a child process, send JSON-RPC over stdin/stdout.
//! - **StreamableHttp**: stub for the future HTTP transport (framing is
//!   explicitly out of scope — see the transport non-goal).

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

use async_trait::async_trait;
use serde_json::Value;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::process::{Child, ChildStdin, ChildStdout};
use tokio::sync::Mutex;

use muxd_domain::Spec;

use crate::protocol::{JsonRpcNotification, JsonRpcRequest, JsonRpcResponse};

/// Trait for backend transports.
#[async_trait]
pub trait BackendTransport: Send + Sync {
    /// Send a JSON-RPC request and wait for the corresponding response.
    async fn send_request(
        &self,
        method: &str,
        params: Option<Value>,
    ) -> Result<JsonRpcResponse, TransportError>;

    /// Send a JSON-RPC notification (no response expected).
    async fn send_notification(&self, method: &str) -> Result<(), TransportError>;

    /// Check if the transport is still alive.
    fn is_alive(&self) -> bool;

    /// Shut down the transport gracefully.
    async fn shutdown(&self);
}

/// Errors that can occur during transport operations.
#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    #[error("transport I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON serialization error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("backend process has exited")]
    ProcessExited,

    #[error("timeout waiting for response")]
    Timeout,

    #[error("invalid command: {0}")]
    InvalidCommand(String),

    #[error("executable not found: {0}")]
    ExecutableNotFound(String),

    #[error("permission denied: {0}")]
    PermissionDenied(String),

    #[error("transport not supported: {0}")]
    Unsupported(String),
}

impl TransportError {
    /// Classify a spawn-time I/O error per the fatal-init-error table (§4.2,
    /// §4.4): executable-not-found and permission-denied short-circuit
    /// retry, everything else is transient.
    pub fn from_spawn_error(command: &str, err: std::io::Error) -> Self {
        match err.kind() {
            std::io::ErrorKind::NotFound => {
                TransportError::ExecutableNotFound(command.to_string())
            }
            std::io::ErrorKind::PermissionDenied => {
                TransportError::PermissionDenied(command.to_string())
            }
            _ => TransportError::Io(err),
        }
    }

    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            TransportError::InvalidCommand(_)
                | TransportError::ExecutableNotFound(_)
                | TransportError::PermissionDenied(_)
                | TransportError::Unsupported(_)
        )
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Stdio transport
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Maximum number of non-JSON lines to skip before declaring the server broken.
const MAX_SKIP_LINES: usize = 1000;

/// Stdio transport: communicates with a child process over stdin/stdout.
///
/// Each JSON-RPC message is a single newline-delimited line.
/// The `request_lock` serializes entire request/response cycles to prevent
/// response mismatching when multiple callers use the same server.
pub struct StdioTransport {
    stdin: Mutex<ChildStdin>,
    stdout: Mutex<BufReader<ChildStdout>>,
    child: Mutex<Child>,
    request_lock: Mutex<()>,
    next_id: AtomicU64,
    alive: AtomicBool,
}

impl StdioTransport {
    /// Spawn a child process for the given spec. `spec.transport` must be
    /// `Transport::Stdio`; callers (the lifecycle module) enforce this.
    pub fn spawn(spec: &Spec) -> Result<Self, TransportError> {
        let muxd_domain::Transport::Stdio { command, args } = &spec.transport else {
            return Err(TransportError::InvalidCommand(
                "spec is not a stdio transport".into(),
            ));
        };
        if command.trim().is_empty() {
            return Err(TransportError::InvalidCommand("empty command".into()));
        }

        let mut cmd = tokio::process::Command::new(command);
        cmd.args(args)
            .stdin(std::process::Stdio::piped())
            .stdout(std::process::Stdio::piped())
            .stderr(std::process::Stdio::piped());

        if let Some(wd) = &spec.working_dir {
            cmd.current_dir(wd);
        }
        for (key, value) in &spec.env {
            cmd.env(key, value);
        }

        let mut child = cmd
            .spawn()
            .map_err(|e| TransportError::from_spawn_error(command, e))?;

        let stdin = child.stdin.take().ok_or_else(|| {
            TransportError::Io(std::io::Error::new(
                std::io::ErrorKind::BrokenPipe,
                "failed to capture child stdin",
            ))
        })?;

        let stdout = child.stdout.take().ok_or_else(|| {
            TransportError::Io(std::io::Error::new(
                std::io::ErrorKind::BrokenPipe,
                "failed to capture child stdout",
            ))
        })?;

        Ok(Self {
            stdin: Mutex::new(stdin),
            stdout: Mutex::new(BufReader::new(stdout)),
            child: Mutex::new(child),
            request_lock: Mutex::new(()),
            next_id: AtomicU64::new(1),
            alive: AtomicBool::new(true),
        })
    }

    fn next_request_id(&self) -> u64 {
        self.next_id.fetch_add(1, Ordering::Relaxed)
    }

    async fn write_line(&self, json: &str) -> Result<(), TransportError> {
        if !self.alive.load(Ordering::SeqCst) {
            return Err(TransportError::ProcessExited);
        }

        let mut stdin = self.stdin.lock().await;
        stdin.write_all(json.as_bytes()).await?;
        stdin.write_all(b"\n").await?;
        stdin.flush().await?;
        Ok(())
    }

    /// Read a line of JSON from stdout, skipping any empty or non-JSON lines.
    ///
    /// Gives up after [`MAX_SKIP_LINES`] non-JSON lines to prevent spinning
    /// on a misconfigured server that writes logging to stdout.
    async fn read_line(&self) -> Result<String, TransportError> {
        if !self.alive.load(Ordering::SeqCst) {
            return Err(TransportError::ProcessExited);
        }

        let mut stdout = self.stdout.lock().await;
        let mut skipped = 0usize;
        loop {
            let mut line = String::new();
            let bytes_read = stdout.read_line(&mut line).await?;
            if bytes_read == 0 {
                self.alive.store(false, Ordering::SeqCst);
                return Err(TransportError::ProcessExited);
            }
            let trimmed = line.trim();
            if trimmed.is_empty() {
                continue;
            }
            if trimmed.starts_with('{') {
                return Ok(trimmed.to_string());
            }
            skipped += 1;
            if skipped >= MAX_SKIP_LINES {
                self.alive.store(false, Ordering::SeqCst);
                return Err(TransportError::Io(std::io::Error::new(
                    std::io::ErrorKind::InvalidData,
                    "backend produced too many non-JSON lines on stdout",
                )));
            }
            tracing::debug!(line = %trimmed, "skipping non-JSON line from backend stdout");
        }
    }
}

#[async_trait]
impl BackendTransport for StdioTransport {
    async fn send_request(
        &self,
        method: &str,
        params: Option<Value>,
    ) -> Result<JsonRpcResponse, TransportError> {
        let _guard = self.request_lock.lock().await;

        let id = self.next_request_id();
        let req = JsonRpcRequest::new(id, method, params);
        let json = serde_json::to_string(&req)?;

        tracing::debug!(id, method, "sending backend request");
        self.write_line(&json).await?;

        let timeout = tokio::time::Duration::from_secs(30);
        let result = tokio::time::timeout(timeout, async {
            loop {
                let line = self.read_line().await?;
                if let Ok(resp) = serde_json::from_str::<JsonRpcResponse>(&line) {
                    if resp.id == id {
                        return Ok(resp);
                    }
                    tracing::debug!(
                        expected_id = id,
                        got_id = resp.id,
                        "received response for different request, continuing"
                    );
                }
                tracing::debug!(line = %line, "skipping non-matching message from backend");
            }
        })
        .await;

        match result {
            Ok(inner) => inner,
            Err(_) => Err(TransportError::Timeout),
        }
    }

    async fn send_notification(&self, method: &str) -> Result<(), TransportError> {
        let notif = JsonRpcNotification::new(method);
        let json = serde_json::to_string(&notif)?;
        tracing::debug!(method, "sending backend notification");
        self.write_line(&json).await
    }

    fn is_alive(&self) -> bool {
        self.alive.load(Ordering::SeqCst)
    }

    async fn shutdown(&self) {
        self.alive.store(false, Ordering::SeqCst);
        let mut child = self.child.lock().await;
        {
            let mut stdin = self.stdin.lock().await;
            if let Err(e) = stdin.shutdown().await {
                tracing::debug!(error = %e, "error closing backend stdin");
            }
        }
        let timeout = tokio::time::timeout(tokio::time::Duration::from_secs(5), child.wait()).await;
        match timeout {
            Ok(Ok(status)) => {
                tracing::debug!(?status, "backend process exited");
            }
            Ok(Err(e)) => {
                tracing::warn!(error = %e, "error waiting for backend process");
            }
            Err(_) => {
                tracing::warn!("backend process did not exit within timeout, killing");
                if let Err(e) = child.kill().await {
                    tracing::warn!(error = %e, "failed to kill backend process");
                }
            }
        }
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Streamable-HTTP transport (stub)
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Stub streamable-HTTP transport. Exact wire framing is out of scope; this
/// exists so specs of this transport kind fail in a classified, non-panicking
/// way (`unsupported-protocol`, a fatal init error) rather than being silently
/// unreachable.
pub struct StreamableHttpTransport;

#[async_trait]
impl BackendTransport for StreamableHttpTransport {
    async fn send_request(
        &self,
        _method: &str,
        _params: Option<Value>,
    ) -> Result<JsonRpcResponse, TransportError> {
        Err(TransportError::Unsupported(
            "streamable-http transport is not yet implemented".into(),
        ))
    }

    async fn send_notification(&self, _method: &str) -> Result<(), TransportError> {
        Err(TransportError::Unsupported(
            "streamable-http transport is not yet implemented".into(),
        ))
    }

    fn is_alive(&self) -> bool {
        false
    }

    async fn shutdown(&self) {}
}
