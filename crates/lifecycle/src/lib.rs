//! `muxd-lifecycle` — starts and stops individual backend instances (§4.2).
//!
//! This crate provides:
//! - JSON-RPC 2.0 protocol types for the backend handshake/capability wire.
//! - A stdio transport that spawns child processes and talks over stdin/stdout,
//!   plus a streamable-HTTP transport stub.
//! - `Lifecycle`, which drives one instance at a time from spawn through the
//!   `initialize` / `notifications/initialized` / `tools/list` handshake.
//!
//! Pool bookkeeping (which specs have how many running instances, when to
//! start or stop one) lives in `muxd-scheduler`, not here.

pub mod backend;
pub mod protocol;
pub mod transport;

pub use backend::{Lifecycle, LifecycleError, RunningBackend};
pub use protocol::{
    BackendToolDef, ClientInfo, InitializeParams, JsonRpcError, JsonRpcNotification,
    JsonRpcRequest, JsonRpcResponse, ToolCallContent, ToolCallResult, ToolsListResult,
};
pub use transport::{BackendTransport, StdioTransport, StreamableHttpTransport, TransportError};
