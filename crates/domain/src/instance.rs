//! A single running backend instance and the states it moves through
//! (§3 "Instance", §4.3.1).

use chrono::{DateTime, Utc};

use crate::spec::SpecKey;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InstanceState {
    Starting,
    Initializing,
    Handshaking,
    Ready,
    Busy,
    Draining,
    Failed,
    Stopped,
}

impl InstanceState {
    /// Whether `self -> next` is a legal transition per the diagram in
    /// §4.3.1. Deliberately exhaustive: every illegal edge is rejected.
    pub fn can_transition_to(self, next: InstanceState) -> bool {
        use InstanceState::*;
        matches!(
            (self, next),
            (Starting, Initializing)
                | (Starting, Failed)
                | (Initializing, Handshaking)
                | (Initializing, Failed)
                | (Handshaking, Ready)
                | (Handshaking, Failed)
                | (Ready, Busy)
                | (Busy, Ready)
                | (Ready, Draining)
                | (Draining, Stopped)
                | (Ready, Failed)
                | (Busy, Failed)
        )
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, InstanceState::Failed | InstanceState::Stopped)
    }

    /// Counted toward the `targetMinReady` invariant (§3 invariant 1).
    pub fn counts_toward_ready_target(self) -> bool {
        matches!(
            self,
            InstanceState::Starting
                | InstanceState::Initializing
                | InstanceState::Handshaking
                | InstanceState::Ready
                | InstanceState::Busy
        )
    }
}

/// Structured reason an instance was started (§3 "StartCause").
#[derive(Debug, Clone)]
pub struct StartCause {
    pub reason: StartReason,
    pub client: Option<String>,
    pub tool_name: Option<String>,
    pub policy_activation_mode: Option<String>,
    pub policy_min_ready: Option<u32>,
    pub at: DateTime<Utc>,
}

impl StartCause {
    pub fn new(reason: StartReason) -> Self {
        Self {
            reason,
            client: None,
            tool_name: None,
            policy_activation_mode: None,
            policy_min_ready: None,
            at: Utc::now(),
        }
    }

    pub fn with_client(mut self, client: impl Into<String>) -> Self {
        self.client = Some(client.into());
        self
    }

    pub fn with_tool_name(mut self, tool: impl Into<String>) -> Self {
        self.tool_name = Some(tool.into());
        self
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StartReason {
    PolicyMinReady,
    PolicyAlwaysOn,
    ClientActivate,
    ToolCall,
    Refresh,
    Retry,
}

/// One running backend instance (§3 "Instance").
#[derive(Debug, Clone)]
pub struct Instance {
    pub id: u64,
    pub spec_key: SpecKey,
    pub state: InstanceState,
    pub spawned_at: DateTime<Utc>,
    pub last_start_cause: StartCause,
    pub inflight: u32,
    pub last_used_at: DateTime<Utc>,
    pub sticky_key: Option<String>,
}

impl Instance {
    pub fn new(id: u64, spec_key: SpecKey, cause: StartCause) -> Self {
        let now = Utc::now();
        Self {
            id,
            spec_key,
            state: InstanceState::Starting,
            spawned_at: now,
            last_start_cause: cause,
            inflight: 0,
            last_used_at: now,
            sticky_key: None,
        }
    }

    /// Attempt the transition, returning whether it was legal. Illegal
    /// transitions are a no-op (the caller treats this as an invariant
    /// violation worth logging at `Internal` severity).
    pub fn transition(&mut self, next: InstanceState) -> bool {
        if !self.state.can_transition_to(next) {
            return false;
        }
        self.state = next;
        true
    }
}
