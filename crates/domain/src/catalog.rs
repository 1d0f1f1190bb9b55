//! Immutable catalog snapshots and the diff operator between them (§3, §4.1).

use std::collections::{BTreeMap, HashMap, HashSet};

use chrono::{DateTime, Utc};

use crate::spec::{Spec, SpecKey};

fn d_client_check_seconds() -> u64 {
    10
}
fn d_client_inactive_seconds() -> u64 {
    0
}
fn d_tool_refresh_seconds() -> u64 {
    30
}
fn d_ping_probe_timeout_seconds() -> u64 {
    5
}
fn d_server_init_retry_base_seconds() -> u64 {
    1
}
fn d_server_init_retry_max_seconds() -> u64 {
    30
}
fn d_server_init_max_retries() -> u32 {
    0
}
fn d_page_size() -> usize {
    200
}

/// Runtime-wide tunables that do not identify individual specs (§4.1).
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize, PartialEq)]
pub struct RuntimeConfig {
    #[serde(default)]
    pub rpc_bind_addr: String,
    #[serde(default)]
    pub observability_listen_addr: String,
    #[serde(default = "d_client_check_seconds")]
    pub client_check_seconds: u64,
    #[serde(default = "d_client_inactive_seconds")]
    pub client_inactive_seconds: u64,
    #[serde(default = "d_tool_refresh_seconds")]
    pub tool_refresh_seconds: u64,
    #[serde(default = "d_ping_probe_timeout_seconds")]
    pub ping_probe_timeout_seconds: u64,
    #[serde(default = "d_server_init_retry_base_seconds")]
    pub server_init_retry_base_seconds: u64,
    #[serde(default = "d_server_init_retry_max_seconds")]
    pub server_init_retry_max_seconds: u64,
    #[serde(default = "d_server_init_max_retries")]
    pub server_init_max_retries: u32,
    #[serde(default = "d_page_size")]
    pub page_size: usize,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            rpc_bind_addr: String::new(),
            observability_listen_addr: String::new(),
            client_check_seconds: d_client_check_seconds(),
            client_inactive_seconds: d_client_inactive_seconds(),
            tool_refresh_seconds: d_tool_refresh_seconds(),
            ping_probe_timeout_seconds: d_ping_probe_timeout_seconds(),
            server_init_retry_base_seconds: d_server_init_retry_base_seconds(),
            server_init_retry_max_seconds: d_server_init_retry_max_seconds(),
            server_init_max_retries: d_server_init_max_retries(),
            page_size: d_page_size(),
        }
    }
}

/// Derived lookup tables kept alongside a `CatalogState` (§3 "CatalogState").
#[derive(Debug, Clone, Default)]
pub struct CatalogSummary {
    pub spec_registry: HashMap<SpecKey, Spec>,
    pub server_spec_keys: HashMap<String, SpecKey>,
    pub enabled_count: usize,
}

impl CatalogSummary {
    fn build(specs: &BTreeMap<SpecKey, Spec>) -> Self {
        let mut server_spec_keys = HashMap::new();
        let mut enabled_count = 0;
        for (key, spec) in specs.iter() {
            server_spec_keys.insert(spec.name.clone(), key.clone());
            if !spec.disabled {
                enabled_count += 1;
            }
        }
        Self {
            spec_registry: specs.clone().into_iter().collect(),
            server_spec_keys,
            enabled_count,
        }
    }
}

/// An immutable, revisioned snapshot of the full set of specs plus runtime
/// config (§3 "CatalogState"). Replacement is always atomic: a new
/// `CatalogState` is built off to the side and then swapped in wholesale.
#[derive(Debug, Clone)]
pub struct CatalogState {
    pub catalog: BTreeMap<SpecKey, Spec>,
    pub runtime: RuntimeConfig,
    pub summary: CatalogSummary,
    pub revision: u64,
    pub loaded_at: DateTime<Utc>,
}

impl CatalogState {
    /// Build a state from a set of (already fingerprinted, already
    /// tag-normalized, already filtered-for-disabled) specs.
    pub fn new(specs: Vec<Spec>, runtime: RuntimeConfig, revision: u64) -> Self {
        let enabled: BTreeMap<SpecKey, Spec> = specs
            .into_iter()
            .filter(|s| !s.disabled)
            .map(|s| (s.fingerprint(), s))
            .collect();
        let summary = CatalogSummary::build(&enabled);
        Self {
            catalog: enabled,
            runtime,
            summary,
            revision,
            loaded_at: Utc::now(),
        }
    }

    pub fn spec(&self, key: &str) -> Option<&Spec> {
        self.catalog.get(key)
    }
}

/// The minimal set of pool mutations needed to reconcile two catalogs
/// (§3 "CatalogDiff", §4.1).
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CatalogDiff {
    pub added: Vec<SpecKey>,
    pub removed: Vec<SpecKey>,
    /// `(old_key, new_key)` pairs: same spec name, changed fingerprint.
    pub updated: Vec<(SpecKey, SpecKey)>,
    /// True when only `RuntimeConfig` fields changed (§4.1 last bullet).
    pub runtime_only: bool,
}

impl CatalogDiff {
    pub fn is_empty(&self) -> bool {
        self.added.is_empty() && self.removed.is_empty() && self.updated.is_empty()
    }

    /// Pure function of `(prev, next)` (§4.1).
    pub fn compute(prev: &CatalogState, next: &CatalogState) -> Self {
        let prev_keys: HashSet<&SpecKey> = prev.catalog.keys().collect();
        let next_keys: HashSet<&SpecKey> = next.catalog.keys().collect();

        let mut added: Vec<SpecKey> = next_keys
            .difference(&prev_keys)
            .map(|k| (*k).clone())
            .collect();
        let mut removed: Vec<SpecKey> = prev_keys
            .difference(&next_keys)
            .map(|k| (*k).clone())
            .collect();

        // Same name, different fingerprint on both sides -> "updated"
        // instead of independent add+remove.
        let mut updated = Vec::new();
        let mut consumed_added = HashSet::new();
        let mut consumed_removed = HashSet::new();
        for old_key in removed.iter() {
            let Some(old_spec) = prev.catalog.get(old_key) else {
                continue;
            };
            if let Some(new_key) = added.iter().find(|new_key| {
                next.catalog
                    .get(*new_key)
                    .map(|s| s.name == old_spec.name)
                    .unwrap_or(false)
            }) {
                updated.push((old_key.clone(), new_key.clone()));
                consumed_added.insert(new_key.clone());
                consumed_removed.insert(old_key.clone());
            }
        }
        added.retain(|k| !consumed_added.contains(k));
        removed.retain(|k| !consumed_removed.contains(k));

        added.sort();
        removed.sort();
        updated.sort();

        let runtime_only = added.is_empty()
            && removed.is_empty()
            && updated.is_empty()
            && prev.runtime != next.runtime;

        Self {
            added,
            removed,
            updated,
            runtime_only,
        }
    }

    /// `Some(())` iff the bind addresses would change, which reload must
    /// refuse with `FailedPrecondition` (§4.1 last bullet).
    pub fn requires_restart(prev: &RuntimeConfig, next: &RuntimeConfig) -> bool {
        prev.rpc_bind_addr != next.rpc_bind_addr
            || prev.observability_listen_addr != next.observability_listen_addr
    }
}
