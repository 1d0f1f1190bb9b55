//! One worker task per spec, driving its pool toward `targetMinReady` and
//! surfacing structured init status (§4.4).

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tokio::sync::{watch, Notify, RwLock};
use tokio::task::JoinHandle;

use muxd_domain::{RuntimeConfig, Spec, SpecKey};
use muxd_scheduler::Scheduler;

use crate::error::SupervisorError;
use crate::status::{classify, InitState, InitStatus};

struct Worker {
    target: watch::Sender<i64>,
    retry_reset: Arc<Notify>,
    status: Arc<RwLock<InitStatus>>,
    handle: JoinHandle<()>,
}

/// Drives every spec's pool toward its desired min-ready target via a
/// per-spec retry/backoff worker (§4.4).
pub struct InitSupervisor {
    scheduler: Arc<Scheduler>,
    runtime: Arc<RwLock<RuntimeConfig>>,
    workers: RwLock<HashMap<SpecKey, Worker>>,
}

impl InitSupervisor {
    pub fn new(scheduler: Arc<Scheduler>, runtime: RuntimeConfig) -> Self {
        Self {
            scheduler,
            runtime: Arc::new(RwLock::new(runtime)),
            workers: RwLock::new(HashMap::new()),
        }
    }

    /// Swap in a new runtime config (retry base/cap/max-retries may change
    /// on reload; bind-address changes are refused earlier, by the reload
    /// manager).
    pub async fn update_runtime(&self, runtime: RuntimeConfig) {
        *self.runtime.write().await = runtime;
    }

    /// Start a worker for `spec_key` if one doesn't already exist.
    pub async fn ensure_worker(&self, spec_key: SpecKey, _spec: Spec) {
        let mut workers = self.workers.write().await;
        if workers.contains_key(&spec_key) {
            return;
        }
        let (target_tx, target_rx) = watch::channel(0i64);
        let retry_reset = Arc::new(Notify::new());
        let status = Arc::new(RwLock::new(InitStatus::pending(spec_key.clone())));

        let handle = tokio::spawn(run_worker(
            spec_key.clone(),
            self.scheduler.clone(),
            self.runtime.clone(),
            target_rx,
            retry_reset.clone(),
            status.clone(),
        ));

        workers.insert(
            spec_key,
            Worker {
                target: target_tx,
                retry_reset,
                status,
                handle,
            },
        );
    }

    /// Stop and drop the worker for a spec removed from the catalog.
    pub async fn remove_worker(&self, spec_key: &str) {
        if let Some(worker) = self.workers.write().await.remove(spec_key) {
            worker.handle.abort();
        }
    }

    /// `SetMinReady`: update the worker's target atomically and wake it.
    pub async fn set_min_ready(&self, spec_key: &str, n: i64) -> Result<(), SupervisorError> {
        let workers = self.workers.read().await;
        let worker = workers
            .get(spec_key)
            .ok_or_else(|| SupervisorError::NotFound(spec_key.to_string()))?;
        let _ = worker.target.send(n);
        Ok(())
    }

    /// `RetrySpec`: clear the retry counter and wake the worker immediately.
    pub async fn retry_spec(&self, spec_key: &str) -> Result<(), SupervisorError> {
        let workers = self.workers.read().await;
        let worker = workers
            .get(spec_key)
            .ok_or_else(|| SupervisorError::NotFound(spec_key.to_string()))?;
        worker.retry_reset.notify_one();
        Ok(())
    }

    /// `Statuses`: a consistent sorted snapshot of every spec's init status.
    pub async fn statuses(&self) -> BTreeMap<SpecKey, InitStatus> {
        let workers = self.workers.read().await;
        let mut out = BTreeMap::new();
        for (key, worker) in workers.iter() {
            out.insert(key.clone(), worker.status.read().await.clone());
        }
        out
    }
}

/// Whether a pass should escalate the backoff counter (§4.4 step 7): only
/// when `ready` didn't strictly increase over the previous pass, `failed`
/// grew, or the pass itself errored. `prev` is `None` on the first pass
/// after a reset, which always escalates.
fn should_escalate_retry(prev: Option<(u32, u32)>, ready: u32, failed: u32, had_error: bool) -> bool {
    if had_error {
        return true;
    }
    match prev {
        Some((prev_ready, prev_failed)) => ready <= prev_ready || failed > prev_failed,
        None => true,
    }
}

fn retry_delay(base_seconds: u64, max_seconds: u64, retry_count: u32) -> Duration {
    let exp = retry_count.saturating_sub(1).min(32);
    let scaled = base_seconds.saturating_mul(1u64.checked_shl(exp).unwrap_or(u64::MAX));
    Duration::from_secs(scaled.min(max_seconds.max(base_seconds)))
}

async fn run_worker(
    spec_key: SpecKey,
    scheduler: Arc<Scheduler>,
    runtime: Arc<RwLock<RuntimeConfig>>,
    mut target_rx: watch::Receiver<i64>,
    retry_reset: Arc<Notify>,
    status: Arc<RwLock<InitStatus>>,
) {
    let mut retry_count: u32 = 0;
    // (ready, failed) from the previous non-terminal pass, used to gate the
    // backoff increment (§4.4 step 7): steady healthy progress shouldn't
    // escalate the delay. Cleared whenever `retry_count` itself resets so a
    // fresh run doesn't compare against a stale baseline.
    let mut prev_progress: Option<(u32, u32)> = None;
    tracing::info!(spec_key = %spec_key, "init supervisor worker started");

    loop {
        let target = *target_rx.borrow();
        if target <= 0 {
            {
                let mut s = status.write().await;
                s.state = InitState::Pending;
                s.target = 0;
            }
            if target_rx.changed().await.is_err() {
                return;
            }
            continue;
        }

        {
            let mut s = status.write().await;
            s.state = InitState::Starting;
            s.target = target as u32;
        }

        let set_result = scheduler.set_desired_min_ready(&spec_key, target).await;
        let pool_status = scheduler.status(&spec_key).await;
        let (ready, failed) = match &pool_status {
            Ok(st) => (st.ready + st.busy, st.failed),
            Err(_) => (0, 0),
        };
        let had_error = set_result.is_err();
        let fatal = set_result.as_ref().err().map(|e| e.is_fatal()).unwrap_or(false);
        let new_state = classify(ready, target as u32, failed, had_error);

        {
            let mut s = status.write().await;
            s.state = new_state;
            s.ready = ready;
            s.last_error = set_result.as_ref().err().map(|e| e.to_string());
        }

        if new_state == InitState::Ready {
            retry_count = 0;
            prev_progress = None;
            {
                let mut s = status.write().await;
                s.retry_count = 0;
                s.next_retry_at = None;
            }
            tokio::select! {
                _ = target_rx.changed() => {}
                _ = retry_reset.notified() => {}
            }
            continue;
        }

        if fatal {
            {
                let mut s = status.write().await;
                s.state = InitState::Suspended;
                s.next_retry_at = None;
            }
            tracing::warn!(spec_key = %spec_key, "fatal init error, suspending retries");
            tokio::select! {
                _ = target_rx.changed() => { retry_count = 0; prev_progress = None; }
                _ = retry_reset.notified() => { retry_count = 0; prev_progress = None; }
            }
            continue;
        }

        if should_escalate_retry(prev_progress, ready, failed, had_error) {
            retry_count += 1;
        }
        prev_progress = Some((ready, failed));
        let (base, max, max_retries) = {
            let rt = runtime.read().await;
            (
                rt.server_init_retry_base_seconds,
                rt.server_init_retry_max_seconds,
                rt.server_init_max_retries,
            )
        };

        if max_retries > 0 && retry_count >= max_retries {
            let mut s = status.write().await;
            s.state = InitState::Suspended;
            s.retry_count = retry_count;
            s.next_retry_at = None;
            drop(s);
            tracing::warn!(spec_key = %spec_key, retry_count, "retry budget exhausted, suspending");
            tokio::select! {
                _ = target_rx.changed() => { retry_count = 0; prev_progress = None; }
                _ = retry_reset.notified() => { retry_count = 0; prev_progress = None; }
            }
            continue;
        }

        let delay = retry_delay(base, max, retry_count);
        let next_at = Utc::now()
            + chrono::Duration::from_std(delay).unwrap_or_else(|_| chrono::Duration::seconds(0));
        {
            let mut s = status.write().await;
            s.retry_count = retry_count;
            s.next_retry_at = Some(next_at);
        }

        tokio::select! {
            _ = tokio::time::sleep(delay) => {}
            _ = target_rx.changed() => {}
            _ = retry_reset.notified() => { retry_count = 0; prev_progress = None; }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn retry_delay_doubles_and_caps() {
        assert_eq!(retry_delay(1, 30, 1), Duration::from_secs(1));
        assert_eq!(retry_delay(1, 30, 2), Duration::from_secs(2));
        assert_eq!(retry_delay(1, 30, 6), Duration::from_secs(30));
    }

    #[test]
    fn should_escalate_retry_first_pass_always_escalates() {
        assert!(should_escalate_retry(None, 0, 0, false));
    }

    #[test]
    fn should_escalate_retry_holds_steady_on_progress() {
        // ready climbing 1 -> 2 with no new failures: no escalation.
        assert!(!should_escalate_retry(Some((1, 0)), 2, 0, false));
    }

    #[test]
    fn should_escalate_retry_on_stalled_ready() {
        assert!(should_escalate_retry(Some((2, 0)), 2, 0, false));
    }

    #[test]
    fn should_escalate_retry_on_new_failures() {
        assert!(should_escalate_retry(Some((2, 0)), 3, 1, false));
    }

    #[test]
    fn should_escalate_retry_on_error_even_with_progress() {
        assert!(should_escalate_retry(Some((1, 0)), 2, 0, true));
    }

    #[tokio::test]
    async fn set_min_ready_on_unknown_spec_is_not_found() {
        let scheduler = Arc::new(Scheduler::new(Arc::new(muxd_lifecycle::Lifecycle::new())));
        let supervisor = InitSupervisor::new(scheduler, RuntimeConfig::default());
        let err = supervisor.set_min_ready("missing", 1).await.unwrap_err();
        assert!(matches!(err, SupervisorError::NotFound(_)));
    }
}
