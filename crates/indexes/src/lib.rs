//! `muxd-indexes` — the three parallel aggregator indexes (tools, resources,
//! prompts): merged per-capability snapshots, pub/sub watchers, a metadata
//! cache for cold-start, and a refresh gate shared across capabilities
//! (§4.5).

pub mod cache;
pub mod capability;
pub mod fragment;
pub mod index;
pub mod refresh_gate;

pub use cache::MetadataCache;
pub use capability::Capability;
pub use index::Index;
pub use refresh_gate::RefreshGate;

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use muxd_domain::{Spec, SpecKey};
use muxd_scheduler::Scheduler;

/// The three capability indexes bundled together, since every caller that
/// needs one (reload, discovery) needs all three and they share a cache and
/// refresh gate.
pub struct Indexes {
    pub tools: Index,
    pub resources: Index,
    pub prompts: Index,
}

impl Indexes {
    pub fn new(cache_dir: Option<PathBuf>) -> Self {
        let cache = Arc::new(MetadataCache::new(cache_dir));
        let gate = Arc::new(RefreshGate::new());
        Self {
            tools: Index::new(Capability::Tools, cache.clone(), gate.clone()),
            resources: Index::new(Capability::Resources, cache.clone(), gate.clone()),
            prompts: Index::new(Capability::Prompts, cache, gate),
        }
    }

    pub async fn bootstrap_from_cache(&self) {
        self.tools.bootstrap_from_cache().await;
        self.resources.bootstrap_from_cache().await;
        self.prompts.bootstrap_from_cache().await;
    }

    /// `UpdateSpecs` across all three indexes (§4.5.4).
    pub async fn update_specs(&self, specs: BTreeMap<SpecKey, Spec>) {
        self.tools.update_specs(specs.clone()).await;
        self.resources.update_specs(specs.clone()).await;
        self.prompts.update_specs(specs).await;
    }

    /// Refresh all three indexes against the live scheduler (§4.5.1).
    pub async fn refresh_all(&self, scheduler: &Scheduler, list_timeout: Duration) {
        self.tools.refresh(scheduler, list_timeout).await;
        self.resources.refresh(scheduler, list_timeout).await;
        self.prompts.refresh(scheduler, list_timeout).await;
    }
}
