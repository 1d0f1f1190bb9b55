//! The refresh gate shared across the three capability indexes (§9
//! "Refresh gate"): at most one in-flight `list` call per spec key across
//! tools/resources/prompts, preventing a reload from stampeding a single
//! backend with three concurrent list RPCs.

use std::collections::HashSet;
use std::sync::Arc;

use parking_lot::Mutex;

use muxd_domain::SpecKey;

#[derive(Default)]
pub struct RefreshGate {
    inflight: Mutex<HashSet<SpecKey>>,
}

impl RefreshGate {
    pub fn new() -> Self {
        Self::default()
    }

    /// Try to take the lease for `spec_key`. `None` means another index is
    /// already listing this spec; the caller should skip this round.
    pub fn try_acquire(self: &Arc<Self>, spec_key: &str) -> Option<GateGuard> {
        let mut inflight = self.inflight.lock();
        if !inflight.insert(spec_key.to_string()) {
            return None;
        }
        Some(GateGuard {
            gate: self.clone(),
            spec_key: spec_key.to_string(),
        })
    }
}

pub struct GateGuard {
    gate: Arc<RefreshGate>,
    spec_key: SpecKey,
}

impl Drop for GateGuard {
    fn drop(&mut self) {
        self.gate.inflight.lock().remove(&self.spec_key);
    }
}
