//! The client registry: registration, tag visibility, spec reference
//! counting, and heartbeat reaping (§4.6).

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tokio::sync::{broadcast, RwLock};
use tokio::task::JoinHandle;

use muxd_domain::spec::normalize_tags;
use muxd_domain::{ActivationMode, ClientRegistration, ClientState, RuntimeConfig, Spec, SpecKey};
use muxd_init_supervisor::InitSupervisor;

use crate::error::RegistryError;
use crate::reaper::pid_is_alive;
use crate::visibility::{filter_overlap, visible_spec_keys};

/// Registration, heartbeat reaping, tag visibility, and spec reference
/// counting (§4.6). The registry is the only mutator of `spec_counts` and
/// the exclusive decider of min-ready target transitions caused by client
/// lifecycle (§5 "shared-resource policy").
pub struct ClientRegistry {
    supervisor: Arc<InitSupervisor>,
    catalog: RwLock<BTreeMap<SpecKey, Spec>>,
    runtime: RwLock<RuntimeConfig>,
    clients: RwLock<HashMap<String, ClientState>>,
    spec_counts: RwLock<HashMap<SpecKey, u32>>,
    change_tx: broadcast::Sender<String>,
}

impl ClientRegistry {
    pub fn new(supervisor: Arc<InitSupervisor>, runtime: RuntimeConfig) -> Self {
        let (change_tx, _rx) = broadcast::channel(256);
        Self {
            supervisor,
            catalog: RwLock::new(BTreeMap::new()),
            runtime: RwLock::new(runtime),
            clients: RwLock::new(HashMap::new()),
            spec_counts: RwLock::new(HashMap::new()),
            change_tx,
        }
    }

    pub async fn update_runtime(&self, runtime: RuntimeConfig) {
        *self.runtime.write().await = runtime;
    }

    /// Subscribe to `ClientChange` events: a client's visible spec set
    /// changed, either via re-registration with new tags or a catalog
    /// update (§4.6.1 step 5, §4.6.3). Discovery/observability watchers use
    /// this to know when to re-filter (§9 "per-client watcher topology").
    pub fn subscribe_changes(&self) -> broadcast::Receiver<String> {
        self.change_tx.subscribe()
    }

    pub async fn list_active_clients(&self) -> Vec<ClientState> {
        self.clients.read().await.values().cloned().collect()
    }

    /// Look up one client's current state — used by discovery/observability
    /// to compute per-client visibility without duplicating the client table.
    pub async fn client_state(&self, name: &str) -> Option<ClientState> {
        self.clients.read().await.get(name).cloned()
    }

    /// `RegisterClient` (§4.6.1).
    pub async fn register_client(
        &self,
        name: &str,
        pid: u32,
        tags: Vec<String>,
    ) -> Result<ClientRegistration, RegistryError> {
        if name.trim().is_empty() {
            return Err(RegistryError::InvalidArgument("client name must not be empty".into()));
        }
        if pid == 0 {
            return Err(RegistryError::InvalidArgument("pid must be positive".into()));
        }
        let tags = normalize_tags(&tags);
        let catalog = self.catalog.read().await.clone();
        let new_visible = visible_spec_keys(&tags, &catalog);

        enum Transition {
            Refreshed,
            New,
            Changed { old_visible: BTreeSet<SpecKey> },
        }

        let transition = {
            let mut clients = self.clients.write().await;
            match clients.get_mut(name) {
                Some(existing) if existing.pid == pid && existing.tags == tags => {
                    existing.last_heartbeat = Utc::now();
                    Transition::Refreshed
                }
                Some(existing) => {
                    let old_visible = existing.visible_spec_keys.clone();
                    existing.pid = pid;
                    existing.tags = tags.clone();
                    existing.visible_spec_keys = new_visible.clone();
                    existing.last_heartbeat = Utc::now();
                    Transition::Changed { old_visible }
                }
                None => {
                    let mut state = ClientState::new(name, pid, tags.clone());
                    state.visible_spec_keys = new_visible.clone();
                    clients.insert(name.to_string(), state);
                    Transition::New
                }
            }
        };

        match transition {
            Transition::Refreshed => {}
            Transition::New => {
                let to_activate: Vec<SpecKey> = new_visible.iter().cloned().collect();
                self.activate(&to_activate, &catalog).await;
            }
            Transition::Changed { old_visible } => {
                let (to_activate, to_deactivate) = filter_overlap(&new_visible, &old_visible);
                self.activate(&to_activate, &catalog).await;
                self.deactivate(&to_deactivate, &catalog).await;
                let _ = self.change_tx.send(name.to_string());
            }
        }

        Ok(ClientRegistration {
            name: name.to_string(),
            pid,
            tags,
            visible_spec_keys: new_visible.into_iter().collect(),
        })
    }

    /// `UnregisterClient`.
    pub async fn unregister_client(&self, name: &str) -> Result<(), RegistryError> {
        let removed = self.clients.write().await.remove(name);
        let Some(state) = removed else {
            return Err(RegistryError::NotFound(name.to_string()));
        };
        let catalog = self.catalog.read().await.clone();
        let keys: Vec<SpecKey> = state.visible_spec_keys.into_iter().collect();
        self.deactivate(&keys, &catalog).await;
        Ok(())
    }

    /// Recompute every client's visible set against a new catalog and diff
    /// reference counts accordingly (§4.6.3).
    pub async fn apply_catalog_update(&self, new_catalog: BTreeMap<SpecKey, Spec>) {
        *self.catalog.write().await = new_catalog.clone();

        let names: Vec<String> = self.clients.read().await.keys().cloned().collect();
        for name in names {
            let Some((old_visible, tags)) = ({
                let clients = self.clients.read().await;
                clients.get(&name).map(|c| (c.visible_spec_keys.clone(), c.tags.clone()))
            }) else {
                continue;
            };

            let new_visible = visible_spec_keys(&tags, &new_catalog);
            if new_visible == old_visible {
                continue;
            }

            {
                let mut clients = self.clients.write().await;
                if let Some(c) = clients.get_mut(&name) {
                    c.visible_spec_keys = new_visible.clone();
                }
            }

            let (to_activate, to_deactivate) = filter_overlap(&new_visible, &old_visible);
            self.activate(&to_activate, &new_catalog).await;
            self.deactivate(&to_deactivate, &new_catalog).await;
            let _ = self.change_tx.send(name);
        }
    }

    async fn activate(&self, keys: &[SpecKey], catalog: &BTreeMap<SpecKey, Spec>) {
        let newly_active: Vec<SpecKey> = {
            let mut counts = self.spec_counts.write().await;
            keys.iter()
                .filter(|key| {
                    let count = counts.entry((*key).clone()).or_insert(0);
                    *count += 1;
                    *count == 1
                })
                .cloned()
                .collect()
        };

        for key in newly_active {
            let Some(spec) = catalog.get(&key) else { continue };
            let target = spec.min_ready.max(1) as i64;
            if let Err(e) = self.supervisor.set_min_ready(&key, target).await {
                tracing::warn!(spec_key = %key, error = %e, "failed to raise min-ready target on activation");
            }
        }
    }

    async fn deactivate(&self, keys: &[SpecKey], catalog: &BTreeMap<SpecKey, Spec>) {
        let newly_idle: Vec<SpecKey> = {
            let mut counts = self.spec_counts.write().await;
            keys.iter()
                .filter(|key| match counts.get_mut(*key) {
                    Some(count) => {
                        *count = count.saturating_sub(1);
                        *count == 0
                    }
                    None => false,
                })
                .cloned()
                .collect()
        };

        for key in newly_idle {
            let always_on = catalog
                .get(&key)
                .map(|s| s.activation_mode == ActivationMode::AlwaysOn)
                .unwrap_or(false);
            if always_on {
                continue;
            }
            if let Err(e) = self.supervisor.set_min_ready(&key, 0).await {
                tracing::warn!(spec_key = %key, error = %e, "failed to lower min-ready target on deactivation");
            }
        }
    }

    /// One heartbeat-reaper pass (§4.6.2).
    pub async fn reap_once(&self) {
        let (client_check_seconds, client_inactive_seconds) = {
            let rt = self.runtime.read().await;
            (rt.client_check_seconds, rt.client_inactive_seconds)
        };
        let now = Utc::now();
        let candidates: Vec<(String, u32, chrono::DateTime<Utc>)> = self
            .clients
            .read()
            .await
            .values()
            .map(|c| (c.name.clone(), c.pid, c.last_heartbeat))
            .collect();

        let mut to_reap = Vec::new();
        for (name, pid, last_heartbeat) in candidates {
            let idle_seconds = now.signed_duration_since(last_heartbeat).num_seconds().max(0) as u64;
            let reap = if client_inactive_seconds > 0 {
                idle_seconds > client_inactive_seconds
            } else {
                idle_seconds > client_check_seconds.saturating_mul(2) && !pid_is_alive(pid)
            };
            if reap {
                to_reap.push(name);
            }
        }

        for name in to_reap {
            tracing::info!(client = %name, "reaping inactive client");
            let _ = self.unregister_client(&name).await;
        }
    }

    /// Long-lived reaper worker (§5 "one heartbeat reaper").
    pub fn spawn_heartbeat_reaper(self: Arc<Self>, interval: Duration) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut tick = tokio::time::interval(interval);
            tracing::info!("heartbeat reaper started");
            loop {
                tick.tick().await;
                self.reap_once().await;
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use muxd_domain::{SessionStrategy, Transport};
    use muxd_lifecycle::Lifecycle;
    use muxd_scheduler::Scheduler;

    fn spec(name: &str, tags: &[&str]) -> Spec {
        Spec {
            name: name.into(),
            transport: Transport::Stdio {
                command: "true".into(),
                args: vec![],
            },
            env: Default::default(),
            working_dir: None,
            tags: tags.iter().map(|t| t.to_string()).collect(),
            max_concurrent: 4,
            min_ready: 1,
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

    async fn new_registry() -> (ClientRegistry, SpecKey) {
        let scheduler = Arc::new(Scheduler::new(Arc::new(Lifecycle::new())));
        let supervisor = Arc::new(InitSupervisor::new(scheduler, RuntimeConfig::default()));
        let s = spec("s1", &["blue"]);
        let key = s.fingerprint();
        supervisor.ensure_worker(key.clone(), s.clone()).await;

        let registry = ClientRegistry::new(supervisor, RuntimeConfig::default());
        let mut catalog = BTreeMap::new();
        catalog.insert(key.clone(), s);
        registry.apply_catalog_update(catalog).await;
        (registry, key)
    }

    #[tokio::test]
    async fn register_rejects_empty_name_and_zero_pid() {
        let (registry, _) = new_registry().await;
        assert!(registry.register_client("", 1, vec![]).await.is_err());
        assert!(registry.register_client("c1", 0, vec![]).await.is_err());
    }

    #[tokio::test]
    async fn activation_refcount_s1() {
        let (registry, key) = new_registry().await;

        registry.register_client("c1", 100, vec!["blue".into()]).await.unwrap();
        assert_eq!(*registry.spec_counts.read().await.get(&key).unwrap(), 1);

        registry.register_client("c2", 101, vec!["blue".into()]).await.unwrap();
        assert_eq!(*registry.spec_counts.read().await.get(&key).unwrap(), 2);

        registry.unregister_client("c1").await.unwrap();
        assert_eq!(*registry.spec_counts.read().await.get(&key).unwrap(), 1);

        registry.unregister_client("c2").await.unwrap();
        assert_eq!(*registry.spec_counts.read().await.get(&key).unwrap(), 0);
    }

    #[tokio::test]
    async fn tag_gating_hides_non_matching_spec() {
        let (registry, key) = new_registry().await;
        let reg = registry.register_client("c1", 100, vec!["red".into()]).await.unwrap();
        assert!(!reg.visible_spec_keys.contains(&key));
    }

    #[tokio::test]
    async fn reregistering_same_pid_and_tags_just_refreshes() {
        let (registry, key) = new_registry().await;
        registry.register_client("c1", 100, vec!["blue".into()]).await.unwrap();
        registry.register_client("c1", 100, vec!["blue".into()]).await.unwrap();
        assert_eq!(*registry.spec_counts.read().await.get(&key).unwrap(), 1);
    }

    #[tokio::test]
    async fn unregister_unknown_client_is_not_found() {
        let (registry, _) = new_registry().await;
        assert!(matches!(
            registry.unregister_client("ghost").await.unwrap_err(),
            RegistryError::NotFound(_)
        ));
    }
}
