//! One aggregator index (tools, resources, or prompts): merged snapshot,
//! subscribers, per-spec fragments, and the refresh protocol (§4.5).

use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tokio::sync::{watch, RwLock};

use muxd_domain::{Entry, EntrySource, Snapshot, Spec, SpecKey};
use muxd_scheduler::{Scheduler, SchedulerError};

use crate::cache::MetadataCache;
use crate::capability::Capability;
use crate::fragment;
use crate::refresh_gate::RefreshGate;

/// Tools, resources, or prompts — one merged snapshot over every spec the
/// index currently tracks, with a watch-based 1-slot subscription and a
/// refresh protocol that calls into the scheduler for live data.
pub struct Index {
    capability: Capability,
    cache: Arc<MetadataCache>,
    gate: Arc<RefreshGate>,
    specs: RwLock<BTreeMap<SpecKey, Spec>>,
    fragments: RwLock<HashMap<SpecKey, Vec<Entry>>>,
    snapshot_tx: watch::Sender<Arc<Snapshot>>,
    bootstrapped: RwLock<bool>,
}

impl Index {
    pub fn new(capability: Capability, cache: Arc<MetadataCache>, gate: Arc<RefreshGate>) -> Self {
        let (snapshot_tx, _rx) = watch::channel(Arc::new(Snapshot::empty()));
        Self {
            capability,
            cache,
            gate,
            specs: RwLock::new(BTreeMap::new()),
            fragments: RwLock::new(HashMap::new()),
            snapshot_tx,
            bootstrapped: RwLock::new(false),
        }
    }

    pub fn capability(&self) -> Capability {
        self.capability
    }

    /// `Snapshot()`: callers before bootstrap completes see the cached
    /// snapshot (§4.5.3).
    pub fn snapshot(&self) -> Arc<Snapshot> {
        self.snapshot_tx.borrow().clone()
    }

    /// `Subscribe()`: delivers the current snapshot immediately, then every
    /// later publication — a `watch` channel already has exactly the
    /// newest-wins, 1-slot semantics §9 asks for (§4.5.1 step 4).
    pub fn subscribe(&self) -> watch::Receiver<Arc<Snapshot>> {
        self.snapshot_tx.subscribe()
    }

    pub async fn is_bootstrapped(&self) -> bool {
        *self.bootstrapped.read().await
    }

    /// Compose the snapshot entirely from the metadata cache, before any
    /// backend is ready (§4.5.2, §4.5.3).
    pub async fn bootstrap_from_cache(&self) {
        let keys: Vec<SpecKey> = self.specs.read().await.keys().cloned().collect();
        {
            let mut fragments = self.fragments.write().await;
            for key in keys {
                let cached = self.cache.load(self.capability, &key).await;
                if !cached.is_empty() {
                    fragments.insert(key, cached);
                }
            }
        }
        self.publish().await;
    }

    /// `UpdateSpecs` (§4.5.4): replace the tracked spec set without tearing
    /// down subscribers. Returns `(added_or_replaced, removed)` spec keys so
    /// the caller can force a refresh for the former.
    pub async fn update_specs(&self, new_specs: BTreeMap<SpecKey, Spec>) -> (Vec<SpecKey>, Vec<SpecKey>) {
        let (old_keys, new_keys): (HashSet<SpecKey>, HashSet<SpecKey>) = {
            let specs = self.specs.read().await;
            (specs.keys().cloned().collect(), new_specs.keys().cloned().collect())
        };
        let removed: Vec<SpecKey> = old_keys.difference(&new_keys).cloned().collect();
        let added: Vec<SpecKey> = new_keys.difference(&old_keys).cloned().collect();

        *self.specs.write().await = new_specs;

        {
            let mut fragments = self.fragments.write().await;
            for key in &removed {
                fragments.remove(key);
            }
        }
        for key in &removed {
            self.cache.drop_spec(key).await;
        }

        (added, removed)
    }

    /// `Refresh(ctx)` (§4.5.1): list every tracked spec once (serialized
    /// across capabilities per spec by the shared refresh gate), merge, sort,
    /// hash, and publish.
    pub async fn refresh(&self, scheduler: &Scheduler, list_timeout: Duration) {
        let specs: BTreeMap<SpecKey, Spec> = self.specs.read().await.clone();

        for (spec_key, spec) in &specs {
            let Some(_lease) = self.gate.try_acquire(spec_key) else {
                continue;
            };

            let call = scheduler.list_capability(spec_key, self.capability.list_method());
            match tokio::time::timeout(list_timeout, call).await {
                Ok(Ok(value)) => {
                    let entries = self.parse_entries(spec_key, &spec.name, value);
                    self.cache.store(self.capability, spec_key, entries.clone()).await;
                    self.fragments.write().await.insert(spec_key.clone(), entries);
                }
                Ok(Err(SchedulerError::Unavailable)) => {
                    tracing::debug!(spec_key = %spec_key, "no ready instance to refresh from yet");
                }
                Ok(Err(e)) => {
                    tracing::warn!(spec_key = %spec_key, error = %e, "capability refresh failed");
                }
                Err(_) => {
                    tracing::warn!(spec_key = %spec_key, "capability refresh timed out");
                }
            }
        }

        self.publish().await;
        *self.bootstrapped.write().await = true;
    }

    async fn publish(&self) {
        let merged = {
            let fragments = self.fragments.read().await;
            fragment::merge(self.capability, &fragments)
        };
        let snapshot = Arc::new(Snapshot::from_sorted(merged));
        let _ = self.snapshot_tx.send(snapshot);
    }

    fn parse_entries(&self, spec_key: &str, server_name: &str, value: serde_json::Value) -> Vec<Entry> {
        let array_key = match self.capability {
            Capability::Tools => "tools",
            Capability::Resources => "resources",
            Capability::Prompts => "prompts",
        };
        let items = value
            .get(array_key)
            .and_then(|v| v.as_array())
            .cloned()
            .unwrap_or_default();
        let now = Utc::now();

        items
            .into_iter()
            .filter_map(|item| {
                let key = match self.capability {
                    Capability::Resources => item.get("uri")?.as_str()?.to_string(),
                    Capability::Tools | Capability::Prompts => item.get("name")?.as_str()?.to_string(),
                };
                Some(Entry {
                    key,
                    spec_key: spec_key.to_string(),
                    server_name: server_name.to_string(),
                    schema: item,
                    source: EntrySource::Live,
                    cached_at: now,
                })
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use muxd_domain::{
        ActivationMode, SessionStrategy, Spec, Transport,
    };
    use std::collections::BTreeMap as StdBTreeMap;

    fn spec(name: &str) -> Spec {
        Spec {
            name: name.into(),
            transport: Transport::Stdio {
                command: "true".into(),
                args: vec![],
            },
            env: StdBTreeMap::new(),
            working_dir: None,
            tags: vec![],
            max_concurrent: 4,
            min_ready: 0,
            session_strategy: SessionStrategy::Stateless,
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

    fn new_index() -> Index {
        Index::new(
            Capability::Tools,
            Arc::new(MetadataCache::new(None)),
            Arc::new(RefreshGate::new()),
        )
    }

    #[tokio::test]
    async fn empty_index_snapshot_is_empty() {
        let idx = new_index();
        assert!(idx.snapshot().entries.is_empty());
    }

    #[tokio::test]
    async fn update_specs_reports_added_and_removed() {
        let idx = new_index();
        let s = spec("s1");
        let mut specs = StdBTreeMap::new();
        specs.insert(s.fingerprint(), s.clone());
        let (added, removed) = idx.update_specs(specs.clone()).await;
        assert_eq!(added, vec![s.fingerprint()]);
        assert!(removed.is_empty());

        let (added2, removed2) = idx.update_specs(StdBTreeMap::new()).await;
        assert!(added2.is_empty());
        assert_eq!(removed2, vec![s.fingerprint()]);
    }

    #[tokio::test]
    async fn parse_entries_extracts_tool_names() {
        let idx = new_index();
        let value = serde_json::json!({
            "tools": [
                {"name": "search", "inputSchema": {}},
                {"name": "fetch", "inputSchema": {}},
            ]
        });
        let entries = idx.parse_entries("fp1", "srv", value);
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[0].key, "search");
    }

    #[tokio::test]
    async fn parse_entries_extracts_resource_uris() {
        let mut idx = new_index();
        idx.capability = Capability::Resources;
        let value = serde_json::json!({"resources": [{"uri": "file:///a", "name": "a"}]});
        let entries = idx.parse_entries("fp1", "srv", value);
        assert_eq!(entries[0].key, "file:///a");
    }

    #[tokio::test]
    async fn bootstrap_from_cache_publishes_cached_entries() {
        let cache = Arc::new(MetadataCache::new(None));
        let entry = Entry {
            key: "search".into(),
            spec_key: "fp1".into(),
            server_name: "srv".into(),
            schema: serde_json::json!({}),
            source: EntrySource::Cache,
            cached_at: Utc::now(),
        };
        cache.store(Capability::Tools, "fp1", vec![entry]).await;

        let idx = Index::new(Capability::Tools, cache, Arc::new(RefreshGate::new()));
        let mut specs = StdBTreeMap::new();
        specs.insert("fp1".to_string(), spec("s1"));
        idx.update_specs(specs).await;

        idx.bootstrap_from_cache().await;
        let snap = idx.snapshot();
        assert_eq!(snap.entries.len(), 1);
        assert_eq!(snap.entries[0].source, EntrySource::Cache);
    }
}
