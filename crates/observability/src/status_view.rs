//! Hashed, filterable snapshots over pool status and init status (§4.8).
//!
//! `PoolStatus`/`InitStatus` have no ETag of their own (that concept lives
//! on `muxd_domain::Snapshot` for capability entries); these wrapper types
//! give `Watch*` the same "recompute the ETag after per-client filtering"
//! behavior discovery's capability snapshots have.

use std::collections::BTreeMap;

use sha2::{Digest, Sha256};

use muxd_domain::SpecKey;
use muxd_init_supervisor::{InitState, InitStatus};
use muxd_scheduler::PoolStatus;

#[derive(Debug, Clone)]
pub struct RuntimeStatusView {
    pub etag: String,
    pub pools: BTreeMap<SpecKey, PoolStatus>,
}

impl RuntimeStatusView {
    pub fn new(pools: BTreeMap<SpecKey, PoolStatus>) -> Self {
        let etag = runtime_etag(&pools);
        Self { etag, pools }
    }

    pub fn filter(&self, visible: &std::collections::BTreeSet<SpecKey>) -> Self {
        let pools: BTreeMap<SpecKey, PoolStatus> = self
            .pools
            .iter()
            .filter(|(key, _)| visible.contains(*key))
            .map(|(k, v)| (k.clone(), *v))
            .collect();
        Self::new(pools)
    }
}

fn runtime_etag(pools: &BTreeMap<SpecKey, PoolStatus>) -> String {
    let mut hasher = Sha256::new();
    for (key, status) in pools {
        hasher.update(key.as_bytes());
        hasher.update(b"\0");
        hasher.update(status.ready.to_le_bytes());
        hasher.update(status.busy.to_le_bytes());
        hasher.update(status.starting.to_le_bytes());
        hasher.update(status.failed.to_le_bytes());
        hasher.update(status.target_min_ready.to_le_bytes());
        hasher.update(status.max_concurrent.to_le_bytes());
        hasher.update(b"\x1e");
    }
    hex::encode(hasher.finalize())
}

#[derive(Debug, Clone)]
pub struct InitStatusView {
    pub etag: String,
    pub statuses: BTreeMap<SpecKey, InitStatus>,
}

impl InitStatusView {
    pub fn new(statuses: BTreeMap<SpecKey, InitStatus>) -> Self {
        let etag = init_etag(&statuses);
        Self { etag, statuses }
    }

    pub fn filter(&self, visible: &std::collections::BTreeSet<SpecKey>) -> Self {
        let statuses: BTreeMap<SpecKey, InitStatus> = self
            .statuses
            .iter()
            .filter(|(key, _)| visible.contains(*key))
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect();
        Self::new(statuses)
    }
}

fn init_etag(statuses: &BTreeMap<SpecKey, InitStatus>) -> String {
    let mut hasher = Sha256::new();
    for (key, status) in statuses {
        hasher.update(key.as_bytes());
        hasher.update(b"\0");
        hasher.update([state_byte(status.state)]);
        hasher.update(status.target.to_le_bytes());
        hasher.update(status.ready.to_le_bytes());
        hasher.update(status.retry_count.to_le_bytes());
        hasher.update(b"\x1e");
    }
    hex::encode(hasher.finalize())
}

fn state_byte(state: InitState) -> u8 {
    match state {
        InitState::Pending => 0,
        InitState::Starting => 1,
        InitState::Ready => 2,
        InitState::Degraded => 3,
        InitState::Failed => 4,
        InitState::Suspended => 5,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn equal_pool_maps_equal_etag() {
        let mut a = BTreeMap::new();
        a.insert(
            "s1".to_string(),
            PoolStatus {
                ready: 1,
                busy: 0,
                starting: 0,
                failed: 0,
                target_min_ready: 1,
                max_concurrent: 4,
            },
        );
        let b = a.clone();
        assert_eq!(RuntimeStatusView::new(a).etag, RuntimeStatusView::new(b).etag);
    }

    #[test]
    fn filtering_changes_etag() {
        let mut pools = BTreeMap::new();
        pools.insert("s1".to_string(), PoolStatus::default());
        pools.insert("s2".to_string(), PoolStatus::default());
        let view = RuntimeStatusView::new(pools);
        let visible: std::collections::BTreeSet<SpecKey> = ["s1".to_string()].into_iter().collect();
        let filtered = view.filter(&visible);
        assert_eq!(filtered.pools.len(), 1);
        assert_ne!(filtered.etag, view.etag);
    }

    #[test]
    fn equal_init_statuses_equal_etag() {
        let mut a = BTreeMap::new();
        a.insert("s1".to_string(), InitStatus::pending("s1".to_string()));
        let b = a.clone();
        assert_eq!(InitStatusView::new(a).etag, InitStatusView::new(b).etag);
    }
}
