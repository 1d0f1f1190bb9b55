//! Per-spec pool of backend instances (§3 "Pool", §4.3.1).

use std::collections::VecDeque;

use chrono::{DateTime, Utc};
use tokio::sync::oneshot;

use muxd_domain::{ActivationMode, Instance, InstanceState, SessionStrategy, Spec, SpecKey};
use muxd_lifecycle::RunningBackend;

/// One running instance plus the lifecycle-owned transport it came back
/// wrapped in.
pub struct PoolEntry {
    pub running: RunningBackend,
}

impl PoolEntry {
    pub fn instance(&self) -> &Instance {
        &self.running.instance
    }

    pub fn instance_mut(&mut self) -> &mut Instance {
        &mut self.running.instance
    }
}

/// Snapshot of a pool's instance counts, used by the init supervisor's
/// classification table (§4.4) and by `GetPoolStatus` (§6).
#[derive(Debug, Clone, Copy, Default)]
pub struct PoolStatus {
    pub ready: u32,
    pub busy: u32,
    pub starting: u32,
    pub failed: u32,
    pub target_min_ready: u32,
    pub max_concurrent: u32,
}

impl PoolStatus {
    /// Instances counted toward the `targetMinReady` invariant (§3 invariant 1).
    pub fn counted_toward_target(&self) -> u32 {
        self.ready + self.busy + self.starting
    }
}

/// Exclusive owner of one spec's instances (§3 "Pool"). All mutation is
/// serialized by the `tokio::sync::Mutex` the scheduler wraps this in; the
/// type itself assumes single-writer access.
pub struct Pool {
    pub spec_key: SpecKey,
    pub spec: Spec,
    pub entries: Vec<PoolEntry>,
    pub target_min_ready: u32,
    /// FIFO queue of acquirers parked waiting for an instance to free up or
    /// finish starting. `release` (or a completed spawn) wakes the front.
    pub waiters: VecDeque<oneshot::Sender<()>>,
    /// Spawns reserved but not yet pushed into `entries` (§4.3.2 step 4).
    /// Counted by `can_grow` so two concurrent acquirers can't both observe
    /// room to grow and both spawn past `max_concurrent`.
    pub pending_spawns: u32,
    pub last_drain_at: Option<DateTime<Utc>>,
}

impl Pool {
    pub fn new(spec_key: SpecKey, spec: Spec) -> Self {
        Self {
            spec_key,
            spec,
            entries: Vec::new(),
            target_min_ready: 0,
            waiters: VecDeque::new(),
            pending_spawns: 0,
            last_drain_at: None,
        }
    }

    pub fn status(&self) -> PoolStatus {
        let mut s = PoolStatus {
            target_min_ready: self.target_min_ready,
            max_concurrent: self.spec.max_concurrent,
            ..Default::default()
        };
        for e in &self.entries {
            match e.instance().state {
                InstanceState::Ready => s.ready += 1,
                InstanceState::Busy => s.busy += 1,
                InstanceState::Starting | InstanceState::Initializing | InstanceState::Handshaking => {
                    s.starting += 1
                }
                InstanceState::Failed => s.failed += 1,
                InstanceState::Draining | InstanceState::Stopped => {}
            }
        }
        s
    }

    /// Normalize a requested min-ready target (§4.3.3): negative clamps to
    /// zero; an always-on spec can never be driven to zero.
    pub fn normalize_target(&self, requested: i64) -> u32 {
        let n = requested.max(0) as u32;
        if n == 0 && self.spec.activation_mode == ActivationMode::AlwaysOn {
            return self.spec.min_ready.max(1);
        }
        n
    }

    /// Find an existing `Ready` instance usable for `routing_key` under the
    /// spec's session strategy, without spawning (§4.3.2 step 2).
    pub fn pick_ready(&self, routing_key: Option<&str>) -> Option<usize> {
        match self.spec.session_strategy {
            SessionStrategy::Singleton => self
                .entries
                .iter()
                .position(|e| e.instance().state == InstanceState::Ready),
            SessionStrategy::Stateful | SessionStrategy::Persistent => {
                let key = routing_key?;
                self.entries.iter().position(|e| {
                    e.instance().state == InstanceState::Ready
                        && e.instance().sticky_key.as_deref() == Some(key)
                })
            }
            SessionStrategy::Stateless => self
                .entries
                .iter()
                .position(|e| e.instance().state == InstanceState::Ready),
        }
    }

    /// Any ready instance regardless of session-routing policy — used by
    /// metadata probes that don't care which instance answers (§4.5.1 step 1).
    pub fn pick_any_ready(&self) -> Option<usize> {
        self.entries
            .iter()
            .position(|e| e.instance().state == InstanceState::Ready)
    }

    /// Whether a routing key already has an instance assigned to it (ready,
    /// busy, or starting) — used to avoid double-spawning a sticky session.
    pub fn has_instance_for(&self, routing_key: Option<&str>) -> bool {
        match self.spec.session_strategy {
            SessionStrategy::Singleton => !self.entries.is_empty(),
            SessionStrategy::Stateful | SessionStrategy::Persistent => {
                let Some(key) = routing_key else { return false };
                self.entries
                    .iter()
                    .any(|e| e.instance().sticky_key.as_deref() == Some(key))
            }
            SessionStrategy::Stateless => false,
        }
    }

    /// Whether the pool may grow by one more instance right now. Includes
    /// spawns already reserved via `pending_spawns` so a spawn in flight
    /// counts against `max_concurrent` before its entry exists.
    pub fn can_grow(&self) -> bool {
        let live = self
            .entries
            .iter()
            .filter(|e| !e.instance().state.is_terminal())
            .count() as u32;
        live + self.pending_spawns < self.spec.max_concurrent
    }

    pub fn wake_one_waiter(&mut self) {
        while let Some(tx) = self.waiters.pop_front() {
            if tx.send(()).is_ok() {
                return;
            }
        }
    }

    pub fn wake_all_waiters(&mut self) {
        while let Some(tx) = self.waiters.pop_front() {
            let _ = tx.send(());
        }
    }
}
