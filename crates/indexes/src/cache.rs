//! Metadata cache: last-known capability fragments keyed by spec fingerprint
//! (§4.5.2, §6 "Persisted state"). Optionally persisted to disk as one
//! opaque JSON blob per `(capability, spec fingerprint)`; always readable
//! lock-free-ish via an in-memory mirror.

use std::collections::HashMap;
use std::path::PathBuf;

use tokio::sync::RwLock;

use muxd_domain::{Entry, SpecKey};

use crate::capability::Capability;

/// Bridges cold-start latency: before any backend is ready, snapshots are
/// composed entirely from whatever was last persisted here (§9 "Metadata
/// cache").
pub struct MetadataCache {
    base_dir: Option<PathBuf>,
    memory: RwLock<HashMap<(Capability, SpecKey), Vec<Entry>>>,
}

impl MetadataCache {
    /// `base_dir = None` keeps the cache purely in-memory for the lifetime
    /// of the process (persistence is a MAY, per §6).
    pub fn new(base_dir: Option<PathBuf>) -> Self {
        Self {
            base_dir,
            memory: RwLock::new(HashMap::new()),
        }
    }

    pub async fn load(&self, capability: Capability, spec_key: &str) -> Vec<Entry> {
        if let Some(hit) = self
            .memory
            .read()
            .await
            .get(&(capability, spec_key.to_string()))
        {
            return hit.clone();
        }
        let Some(path) = self.file_path(capability, spec_key) else {
            return Vec::new();
        };
        match tokio::fs::read(&path).await {
            Ok(bytes) => serde_json::from_slice(&bytes).unwrap_or_default(),
            Err(_) => Vec::new(),
        }
    }

    pub async fn store(&self, capability: Capability, spec_key: &str, entries: Vec<Entry>) {
        self.memory
            .write()
            .await
            .insert((capability, spec_key.to_string()), entries.clone());

        let Some(path) = self.file_path(capability, spec_key) else {
            return;
        };
        let Some(parent) = path.parent() else { return };
        if let Err(e) = tokio::fs::create_dir_all(parent).await {
            tracing::warn!(error = %e, "failed to create metadata cache directory");
            return;
        }
        match serde_json::to_vec(&entries) {
            Ok(bytes) => {
                if let Err(e) = tokio::fs::write(&path, bytes).await {
                    tracing::warn!(error = %e, path = %path.display(), "failed to persist metadata cache entry");
                }
            }
            Err(e) => tracing::warn!(error = %e, "failed to serialize metadata cache entry"),
        }
    }

    pub async fn drop_spec(&self, spec_key: &str) {
        let mut mem = self.memory.write().await;
        mem.retain(|(_, key), _| key != spec_key);
    }

    fn file_path(&self, capability: Capability, spec_key: &str) -> Option<PathBuf> {
        let base = self.base_dir.as_ref()?;
        Some(base.join(capability.cache_namespace()).join(format!("{spec_key}.json")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use muxd_domain::EntrySource;

    fn entry(key: &str) -> Entry {
        Entry {
            key: key.into(),
            spec_key: "fp1".into(),
            server_name: "srv".into(),
            schema: serde_json::json!({}),
            source: EntrySource::Live,
            cached_at: Utc::now(),
        }
    }

    #[tokio::test]
    async fn memory_only_cache_round_trips() {
        let cache = MetadataCache::new(None);
        cache.store(Capability::Tools, "fp1", vec![entry("a")]).await;
        let loaded = cache.load(Capability::Tools, "fp1").await;
        assert_eq!(loaded.len(), 1);
    }

    #[tokio::test]
    async fn persisted_cache_survives_a_fresh_instance() {
        let dir = tempfile::tempdir().unwrap();
        let cache = MetadataCache::new(Some(dir.path().to_path_buf()));
        cache.store(Capability::Tools, "fp1", vec![entry("a")]).await;

        let reopened = MetadataCache::new(Some(dir.path().to_path_buf()));
        let loaded = reopened.load(Capability::Tools, "fp1").await;
        assert_eq!(loaded.len(), 1);
        assert_eq!(loaded[0].key, "a");
    }

    #[tokio::test]
    async fn unknown_spec_returns_empty() {
        let cache = MetadataCache::new(None);
        assert!(cache.load(Capability::Tools, "missing").await.is_empty());
    }
}
