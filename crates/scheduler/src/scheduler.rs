//! The scheduler: per-spec pools, acquire/release, min-ready targets, idle
//! eviction and health probing (§4.3).

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tokio::sync::{oneshot, Mutex, RwLock};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use muxd_domain::{
    ActivationMode, CatalogDiff, InstanceState, Spec, SpecKey, StartCause, StartReason,
};
use muxd_lifecycle::Lifecycle;

use crate::error::SchedulerError;
use crate::pool::{Pool, PoolEntry, PoolStatus};

/// Owns every spec's pool. Each pool is independently locked so one spec's
/// acquire traffic never blocks another's (§4.3, §5 "ordering guarantees").
pub struct Scheduler {
    lifecycle: Arc<Lifecycle>,
    pools: RwLock<HashMap<SpecKey, Arc<Mutex<Pool>>>>,
}

impl Scheduler {
    pub fn new(lifecycle: Arc<Lifecycle>) -> Self {
        Self {
            lifecycle,
            pools: RwLock::new(HashMap::new()),
        }
    }

    async fn pool_handle(&self, spec_key: &str) -> Option<Arc<Mutex<Pool>>> {
        self.pools.read().await.get(spec_key).cloned()
    }

    async fn ensure_pool(&self, spec_key: SpecKey, spec: Spec) {
        let mut pools = self.pools.write().await;
        pools
            .entry(spec_key.clone())
            .or_insert_with(|| Arc::new(Mutex::new(Pool::new(spec_key, spec))));
    }

    /// `Acquire` (§4.3.2): pick an existing ready instance, spawn one if the
    /// pool can grow, or park in the FIFO waiters queue.
    pub async fn acquire(
        &self,
        cancel: CancellationToken,
        spec_key: &str,
        routing_key: Option<&str>,
        cause: StartCause,
    ) -> Result<u64, SchedulerError> {
        let pool = self
            .pool_handle(spec_key)
            .await
            .ok_or_else(|| SchedulerError::NotFound(spec_key.to_string()))?;

        enum Action {
            Got(u64),
            Spawn(oneshot::Receiver<Result<(), SchedulerError>>),
            Wait(oneshot::Receiver<()>),
        }

        loop {
            let action = {
                let mut guard = pool.lock().await;
                if let Some(idx) = guard.pick_ready(routing_key) {
                    let sticky = routing_key.map(String::from);
                    let entry = &mut guard.entries[idx];
                    entry.instance_mut().transition(InstanceState::Busy);
                    entry.instance_mut().inflight += 1;
                    entry.instance_mut().last_used_at = Utc::now();
                    if entry.instance().sticky_key.is_none() {
                        entry.instance_mut().sticky_key = sticky;
                    }
                    Action::Got(entry.instance().id)
                } else if !guard.has_instance_for(routing_key) && guard.can_grow() {
                    // Reserve the slot before releasing the lock (§4.3.2 step
                    // 4): `pending_spawns` makes `can_grow` false for any
                    // concurrent acquirer until this spawn lands or fails,
                    // so two racing acquirers can never both spawn past
                    // `max_concurrent`.
                    guard.pending_spawns += 1;
                    let (done_tx, done_rx) = oneshot::channel();
                    let spec = guard.spec.clone();
                    let pool = pool.clone();
                    let lifecycle = self.lifecycle.clone();
                    let spec_key = spec_key.to_string();
                    let cause = cause.clone();
                    let sticky = routing_key.map(String::from);
                    tokio::spawn(async move {
                        let result = lifecycle.start(&spec, &spec_key, cause).await;
                        let mut guard = pool.lock().await;
                        guard.pending_spawns -= 1;
                        match result {
                            Ok(mut running) => {
                                running.instance.sticky_key = sticky;
                                guard.entries.push(PoolEntry { running });
                                guard.wake_one_waiter();
                                let _ = done_tx.send(Ok(()));
                            }
                            Err(e) => {
                                // The reserved slot is gone; anyone parked
                                // waiting on this growth should retry rather
                                // than wait forever for an entry that never
                                // lands.
                                guard.wake_all_waiters();
                                let _ = done_tx.send(Err(SchedulerError::Lifecycle(e)));
                            }
                        }
                    });
                    Action::Spawn(done_rx)
                } else {
                    let (tx, rx) = oneshot::channel();
                    guard.waiters.push_back(tx);
                    Action::Wait(rx)
                }
            };

            match action {
                Action::Got(id) => return Ok(id),
                Action::Spawn(done_rx) => {
                    tokio::select! {
                        res = done_rx => {
                            match res {
                                // Loop again: the next pass picks up the
                                // freshly started instance through `pick_ready`.
                                Ok(Ok(())) => {}
                                Ok(Err(e)) => return Err(e),
                                Err(_) => return Err(SchedulerError::Canceled),
                            }
                        }
                        _ = cancel.cancelled() => return Err(SchedulerError::Canceled),
                    }
                }
                Action::Wait(rx) => {
                    tokio::select! {
                        _ = rx => {}
                        _ = cancel.cancelled() => return Err(SchedulerError::Canceled),
                    }
                }
            }
        }
    }

    /// `AcquireReady`: the non-spawning variant used by metadata probes
    /// (§4.3.2 step 6, §4.5.1). Fails fast with `Unavailable` rather than
    /// waiting — see the Open Question decision in SPEC_FULL.md §9.
    pub async fn acquire_ready(
        &self,
        spec_key: &str,
        routing_key: Option<&str>,
    ) -> Result<u64, SchedulerError> {
        let pool = self
            .pool_handle(spec_key)
            .await
            .ok_or_else(|| SchedulerError::NotFound(spec_key.to_string()))?;
        let mut guard = pool.lock().await;
        let idx = guard.pick_ready(routing_key).ok_or(SchedulerError::Unavailable)?;
        let entry = &mut guard.entries[idx];
        entry.instance_mut().transition(InstanceState::Busy);
        entry.instance_mut().inflight += 1;
        entry.instance_mut().last_used_at = Utc::now();
        Ok(entry.instance().id)
    }

    /// Release an instance acquired via `acquire`/`acquire_ready`, waking one
    /// FIFO waiter if the instance returns to `Ready`.
    pub async fn release(&self, spec_key: &str, instance_id: u64) -> Result<(), SchedulerError> {
        let pool = self
            .pool_handle(spec_key)
            .await
            .ok_or_else(|| SchedulerError::NotFound(spec_key.to_string()))?;
        let mut guard = pool.lock().await;
        if let Some(entry) = guard
            .entries
            .iter_mut()
            .find(|e| e.instance().id == instance_id)
        {
            let inst = entry.instance_mut();
            inst.inflight = inst.inflight.saturating_sub(1);
            if inst.inflight == 0 && inst.state == InstanceState::Busy {
                inst.transition(InstanceState::Ready);
                inst.last_used_at = Utc::now();
            }
        }
        guard.wake_one_waiter();
        Ok(())
    }

    /// `SetDesiredMinReady` (§4.3.3). Does not retry on failure — the init
    /// supervisor owns retry/backoff.
    pub async fn set_desired_min_ready(&self, spec_key: &str, n: i64) -> Result<(), SchedulerError> {
        let pool = self
            .pool_handle(spec_key)
            .await
            .ok_or_else(|| SchedulerError::NotFound(spec_key.to_string()))?;

        let (target, deficit, spec) = {
            let mut guard = pool.lock().await;
            let target = guard.normalize_target(n);
            guard.target_min_ready = target;
            let current = guard.status().counted_toward_target();
            (target, target.saturating_sub(current), guard.spec.clone())
        };

        tracing::debug!(spec_key, target, deficit, "set desired min ready");

        for _ in 0..deficit {
            let cause = StartCause::new(StartReason::PolicyMinReady);
            match self.lifecycle.start(&spec, spec_key, cause).await {
                Ok(running) => {
                    let mut guard = pool.lock().await;
                    guard.entries.push(PoolEntry { running });
                    guard.wake_one_waiter();
                }
                Err(e) => {
                    tracing::warn!(spec_key, error = %e, "failed to start instance toward min-ready target");
                    return Err(SchedulerError::Lifecycle(e));
                }
            }
        }
        Ok(())
    }

    /// Acquire any ready instance (ignoring session-routing policy), invoke a
    /// capability list method, and release — the aggregator indexes' refresh
    /// step (§4.5.1 step 1). Fails fast with `Unavailable` like
    /// `acquire_ready`, never spawns.
    pub async fn list_capability(
        &self,
        spec_key: &str,
        method: &str,
    ) -> Result<serde_json::Value, SchedulerError> {
        let pool = self
            .pool_handle(spec_key)
            .await
            .ok_or_else(|| SchedulerError::NotFound(spec_key.to_string()))?;

        let instance_id = {
            let mut guard = pool.lock().await;
            let idx = guard.pick_any_ready().ok_or(SchedulerError::Unavailable)?;
            let entry = &mut guard.entries[idx];
            entry.instance_mut().transition(InstanceState::Busy);
            entry.instance_mut().inflight += 1;
            entry.instance_mut().last_used_at = Utc::now();
            entry.instance().id
        };

        let guard = pool.lock().await;
        let Some(entry) = guard.entries.iter().find(|e| e.instance().id == instance_id) else {
            drop(guard);
            return Err(SchedulerError::Unavailable);
        };
        let result = self.lifecycle.list_capability(&entry.running, method).await;
        drop(guard);

        self.release(spec_key, instance_id).await?;
        result.map_err(SchedulerError::Lifecycle)
    }

    /// `CallTool` routing (§4.7, §6): acquire (spawning if needed), invoke
    /// `tools/call`, then release regardless of outcome.
    pub async fn call_tool(
        &self,
        cancel: CancellationToken,
        spec_key: &str,
        routing_key: Option<&str>,
        tool_name: &str,
        arguments: serde_json::Value,
    ) -> Result<muxd_lifecycle::ToolCallResult, SchedulerError> {
        let cause = StartCause::new(StartReason::ToolCall);
        let instance_id = self.acquire(cancel, spec_key, routing_key, cause).await?;

        let pool = self
            .pool_handle(spec_key)
            .await
            .ok_or_else(|| SchedulerError::NotFound(spec_key.to_string()))?;
        let guard = pool.lock().await;
        let Some(entry) = guard.entries.iter().find(|e| e.instance().id == instance_id) else {
            drop(guard);
            return Err(SchedulerError::Unavailable);
        };
        let result = self.lifecycle.call_tool(&entry.running, tool_name, arguments).await;
        drop(guard);

        self.release(spec_key, instance_id).await?;
        result.map_err(SchedulerError::Lifecycle)
    }

    /// `ReadResource` routing (§4.7, §6).
    pub async fn read_resource(
        &self,
        cancel: CancellationToken,
        spec_key: &str,
        routing_key: Option<&str>,
        uri: &str,
    ) -> Result<serde_json::Value, SchedulerError> {
        let cause = StartCause::new(StartReason::ToolCall);
        let instance_id = self.acquire(cancel, spec_key, routing_key, cause).await?;

        let pool = self
            .pool_handle(spec_key)
            .await
            .ok_or_else(|| SchedulerError::NotFound(spec_key.to_string()))?;
        let guard = pool.lock().await;
        let Some(entry) = guard.entries.iter().find(|e| e.instance().id == instance_id) else {
            drop(guard);
            return Err(SchedulerError::Unavailable);
        };
        let result = self.lifecycle.read_resource(&entry.running, uri).await;
        drop(guard);

        self.release(spec_key, instance_id).await?;
        result.map_err(SchedulerError::Lifecycle)
    }

    /// `GetPrompt` routing (§4.7, §6).
    pub async fn get_prompt(
        &self,
        cancel: CancellationToken,
        spec_key: &str,
        routing_key: Option<&str>,
        name: &str,
        arguments: serde_json::Value,
    ) -> Result<serde_json::Value, SchedulerError> {
        let cause = StartCause::new(StartReason::ToolCall);
        let instance_id = self.acquire(cancel, spec_key, routing_key, cause).await?;

        let pool = self
            .pool_handle(spec_key)
            .await
            .ok_or_else(|| SchedulerError::NotFound(spec_key.to_string()))?;
        let guard = pool.lock().await;
        let Some(entry) = guard.entries.iter().find(|e| e.instance().id == instance_id) else {
            drop(guard);
            return Err(SchedulerError::Unavailable);
        };
        let result = self.lifecycle.get_prompt(&entry.running, name, arguments).await;
        drop(guard);

        self.release(spec_key, instance_id).await?;
        result.map_err(SchedulerError::Lifecycle)
    }

    pub async fn status(&self, spec_key: &str) -> Result<PoolStatus, SchedulerError> {
        let pool = self
            .pool_handle(spec_key)
            .await
            .ok_or_else(|| SchedulerError::NotFound(spec_key.to_string()))?;
        Ok(pool.lock().await.status())
    }

    /// `GetPoolStatus` (§6): a consistent sorted snapshot of every pool.
    pub async fn all_statuses(&self) -> BTreeMap<SpecKey, PoolStatus> {
        let pools: Vec<(SpecKey, Arc<Mutex<Pool>>)> = self
            .pools
            .read()
            .await
            .iter()
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect();
        let mut out = BTreeMap::new();
        for (key, pool) in pools {
            out.insert(key, pool.lock().await.status());
        }
        out
    }

    /// `ApplyCatalogDiff` (§4.3.6). Idempotent: applying the same diff twice
    /// is a no-op the second time, since removal drops the pool from the map
    /// and addition only inserts if absent.
    pub async fn apply_catalog_diff(
        &self,
        diff: &CatalogDiff,
        registry: &BTreeMap<SpecKey, Spec>,
    ) -> Result<(), SchedulerError> {
        for key in &diff.removed {
            self.drain_and_remove(key).await;
        }
        for (old_key, new_key) in &diff.updated {
            self.drain_and_remove(old_key).await;
            if let Some(spec) = registry.get(new_key) {
                self.ensure_pool(new_key.clone(), spec.clone()).await;
            }
        }
        for key in &diff.added {
            if let Some(spec) = registry.get(key) {
                self.ensure_pool(key.clone(), spec.clone()).await;
            }
        }
        Ok(())
    }

    async fn drain_and_remove(&self, spec_key: &str) {
        let pool = self.pools.write().await.remove(spec_key);
        let Some(pool) = pool else { return };

        let entries = {
            let mut guard = pool.lock().await;
            guard.target_min_ready = 0;
            guard.wake_all_waiters();
            guard.last_drain_at = Some(Utc::now());
            std::mem::take(&mut guard.entries)
        };

        for entry in entries {
            self.lifecycle
                .stop(&entry.running, "catalog diff: spec removed")
                .await;
        }
    }

    /// `StopAll` (§4.3.7): drain and stop every pool.
    pub async fn stop_all(&self) {
        let keys: Vec<SpecKey> = self.pools.read().await.keys().cloned().collect();
        for key in keys {
            self.drain_and_remove(&key).await;
        }
    }

    /// Idle manager (§4.3.4): run forever on `interval`, evicting `Ready`
    /// instances idle past `spec.idle_seconds` without violating the
    /// min-ready target or the always-on floor of 1.
    pub fn spawn_idle_manager(self: Arc<Self>, interval: Duration) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut tick = tokio::time::interval(interval);
            tracing::info!("idle manager started");
            loop {
                tick.tick().await;
                self.run_idle_pass().await;
            }
        })
    }

    async fn run_idle_pass(&self) {
        let handles: Vec<Arc<Mutex<Pool>>> = self.pools.read().await.values().cloned().collect();
        for pool in handles {
            let mut to_stop = Vec::new();
            {
                let mut guard = pool.lock().await;
                let target = guard.target_min_ready;
                let floor = if guard.spec.activation_mode == ActivationMode::AlwaysOn {
                    1
                } else {
                    0
                };
                let idle_seconds = guard.spec.idle_seconds;
                let now = Utc::now();
                let mut ready_count = guard
                    .entries
                    .iter()
                    .filter(|e| e.instance().state == InstanceState::Ready)
                    .count() as u32;

                for entry in guard.entries.iter_mut() {
                    if ready_count <= target.max(floor) {
                        break;
                    }
                    if entry.instance().state != InstanceState::Ready {
                        continue;
                    }
                    let idle_for = now
                        .signed_duration_since(entry.instance().last_used_at)
                        .num_seconds();
                    if idle_for < 0 || (idle_for as u64) <= idle_seconds {
                        continue;
                    }
                    entry.instance_mut().transition(InstanceState::Draining);
                    to_stop.push(entry.instance().id);
                    ready_count -= 1;
                }
            }

            for id in to_stop {
                let entry = {
                    let mut guard = pool.lock().await;
                    let idx = guard.entries.iter().position(|e| e.instance().id == id);
                    idx.map(|i| guard.entries.remove(i))
                };
                if let Some(entry) = entry {
                    self.lifecycle.stop(&entry.running, "idle timeout").await;
                    tracing::debug!(instance_id = id, "evicted idle instance");
                }
            }
        }
    }

    /// Ping manager (§4.3.5): run forever on `interval`, probing every
    /// `Ready` instance and failing it out of the pool on timeout or error.
    pub fn spawn_ping_manager(self: Arc<Self>, interval: Duration, probe_timeout: Duration) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut tick = tokio::time::interval(interval);
            tracing::info!("ping manager started");
            loop {
                tick.tick().await;
                self.run_ping_pass(probe_timeout).await;
            }
        })
    }

    async fn run_ping_pass(&self, probe_timeout: Duration) {
        let handles: Vec<Arc<Mutex<Pool>>> = self.pools.read().await.values().cloned().collect();
        for pool in handles {
            let ready_ids: Vec<u64> = {
                let guard = pool.lock().await;
                guard
                    .entries
                    .iter()
                    .filter(|e| e.instance().state == InstanceState::Ready)
                    .map(|e| e.instance().id)
                    .collect()
            };

            let mut failed_ids = Vec::new();
            for id in ready_ids {
                let guard = pool.lock().await;
                let Some(entry) = guard.entries.iter().find(|e| e.instance().id == id) else {
                    continue;
                };
                let result = tokio::time::timeout(probe_timeout, self.lifecycle.ping(&entry.running)).await;
                drop(guard);
                match result {
                    Ok(Ok(())) => {}
                    Ok(Err(e)) => {
                        tracing::warn!(instance_id = id, error = %e, "ping failed");
                        failed_ids.push(id);
                    }
                    Err(_) => {
                        tracing::warn!(instance_id = id, "ping timed out");
                        failed_ids.push(id);
                    }
                }
            }

            if failed_ids.is_empty() {
                continue;
            }
            let mut guard = pool.lock().await;
            for id in &failed_ids {
                if let Some(entry) = guard.entries.iter_mut().find(|e| e.instance().id == *id) {
                    entry.instance_mut().transition(InstanceState::Failed);
                }
            }
            guard.entries.retain(|e| e.instance().state != InstanceState::Failed);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap as StdBTreeMap;

    fn spec(name: &str, max_concurrent: u32) -> Spec {
        Spec {
            name: name.into(),
            transport: muxd_domain::Transport::Stdio {
                command: "true".into(),
                args: vec![],
            },
            env: StdBTreeMap::new(),
            working_dir: None,
            tags: vec![],
            max_concurrent,
            min_ready: 0,
            session_strategy: muxd_domain::SessionStrategy::Stateless,
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

    #[tokio::test]
    async fn acquire_on_unknown_spec_is_not_found() {
        let scheduler = Scheduler::new(Arc::new(Lifecycle::new()));
        let cause = StartCause::new(StartReason::ToolCall);
        let err = scheduler
            .acquire(CancellationToken::new(), "missing", None, cause)
            .await
            .unwrap_err();
        assert!(matches!(err, SchedulerError::NotFound(_)));
    }

    #[tokio::test]
    async fn acquire_ready_on_empty_pool_is_unavailable() {
        let scheduler = Scheduler::new(Arc::new(Lifecycle::new()));
        let s = spec("s1", 4);
        scheduler.ensure_pool(s.fingerprint(), s.clone()).await;
        let err = scheduler.acquire_ready(&s.fingerprint(), None).await.unwrap_err();
        assert!(matches!(err, SchedulerError::Unavailable));
    }

    #[tokio::test]
    async fn apply_catalog_diff_is_idempotent_on_added() {
        let scheduler = Scheduler::new(Arc::new(Lifecycle::new()));
        let s = spec("s1", 4);
        let mut registry = StdBTreeMap::new();
        registry.insert(s.fingerprint(), s.clone());
        let diff = CatalogDiff {
            added: vec![s.fingerprint()],
            removed: vec![],
            updated: vec![],
            runtime_only: false,
        };
        scheduler.apply_catalog_diff(&diff, &registry).await.unwrap();
        scheduler.apply_catalog_diff(&diff, &registry).await.unwrap();
        assert!(scheduler.pool_handle(&s.fingerprint()).await.is_some());
    }

    #[tokio::test]
    async fn stop_all_removes_every_pool() {
        let scheduler = Scheduler::new(Arc::new(Lifecycle::new()));
        let s = spec("s1", 4);
        scheduler.ensure_pool(s.fingerprint(), s.clone()).await;
        scheduler.stop_all().await;
        assert!(scheduler.pool_handle(&s.fingerprint()).await.is_none());
    }

    /// Two callers race `acquire` against a pool capped at one instance.
    /// `"true"` exits before it can speak the handshake, so both calls end
    /// in a `Lifecycle` error — what matters is that `pending_spawns` kept
    /// them from both reserving a grow slot at once (§4.3.2 step 4).
    #[tokio::test]
    async fn concurrent_acquire_does_not_exceed_max_concurrent() {
        let scheduler = Arc::new(Scheduler::new(Arc::new(Lifecycle::new())));
        let s = spec("s1", 1);
        scheduler.ensure_pool(s.fingerprint(), s.clone()).await;
        let spec_key = s.fingerprint();

        let acquire = |sched: Arc<Scheduler>, key: String| {
            tokio::spawn(async move {
                let cause = StartCause::new(StartReason::ToolCall);
                sched
                    .acquire(CancellationToken::new(), &key, None, cause)
                    .await
            })
        };

        let a = acquire(scheduler.clone(), spec_key.clone());
        let b = acquire(scheduler.clone(), spec_key.clone());
        let (res_a, res_b) = tokio::join!(a, b);
        assert!(matches!(res_a.unwrap(), Err(SchedulerError::Lifecycle(_))));
        assert!(matches!(res_b.unwrap(), Err(SchedulerError::Lifecycle(_))));

        let pool = scheduler.pool_handle(&spec_key).await.unwrap();
        let guard = pool.lock().await;
        assert_eq!(guard.pending_spawns, 0);
        assert!(guard.entries.len() <= 1);
    }
}
