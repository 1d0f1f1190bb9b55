//! Builds a [`ControlPlane`] from a loaded [`Config`] and starts every
//! background worker the subsystem crates expose. Mirrors the chat-gateway's
//! step-by-step, info-logged construction sequence.

use std::sync::Arc;
use std::time::Duration;

use muxd_discovery::DiscoveryService;
use muxd_domain::{ActivationMode, CatalogState, Config};
use muxd_indexes::Indexes;
use muxd_init_supervisor::InitSupervisor;
use muxd_lifecycle::Lifecycle;
use muxd_observability::ObservabilityService;
use muxd_registry::ClientRegistry;
use muxd_reload::{ConfigProvider, FileConfigProvider, ReloadManager, StaticProvider};
use muxd_scheduler::Scheduler;

use crate::state::ControlPlane;

const FILE_POLL_INTERVAL: Duration = Duration::from_secs(5);

/// Build every subsystem in dependency order, start the configured specs,
/// and start every background worker. Returns a fully running control plane.
pub async fn build_control_plane(config: Config) -> anyhow::Result<Arc<ControlPlane>> {
    let runtime = config.runtime.clone();
    let list_timeout = Duration::from_secs(runtime.ping_probe_timeout_seconds.max(1));

    tracing::info!("building scheduler and lifecycle");
    let lifecycle = Arc::new(Lifecycle::new());
    let scheduler = Arc::new(Scheduler::new(lifecycle));

    tracing::info!("building init supervisor");
    let supervisor = Arc::new(InitSupervisor::new(scheduler.clone(), runtime.clone()));

    tracing::info!("building indexes and client registry");
    let indexes = Arc::new(Indexes::new(None));
    indexes.bootstrap_from_cache().await;
    let registry = Arc::new(ClientRegistry::new(supervisor.clone(), runtime.clone()));

    tracing::info!("building discovery and observability services");
    let discovery = Arc::new(DiscoveryService::new(
        indexes.clone(),
        registry.clone(),
        scheduler.clone(),
        runtime.page_size,
    ));
    let observability = Arc::new(ObservabilityService::new(
        scheduler.clone(),
        supervisor.clone(),
        registry.clone(),
    ));

    let initial = CatalogState::new(config.specs.clone(), runtime.clone(), 1);
    let catalog = initial.catalog.clone();

    tracing::info!("building reload manager");
    let (reload, update_rx) = ReloadManager::new(
        scheduler.clone(),
        supervisor.clone(),
        registry.clone(),
        indexes.clone(),
        initial,
        list_timeout,
    );
    reload.clone().spawn_run(update_rx);

    let provider = config_provider(&config).await?;

    tracing::info!(count = catalog.len(), "starting configured specs");
    for (key, spec) in &catalog {
        supervisor.ensure_worker(key.clone(), spec.clone()).await;
        if spec.activation_mode == ActivationMode::AlwaysOn {
            supervisor.set_min_ready(key, spec.min_ready.max(1) as i64).await?;
        }
    }
    registry.apply_catalog_update(catalog).await;
    indexes.refresh_all(&scheduler, list_timeout).await;

    scheduler
        .clone()
        .spawn_idle_manager(Duration::from_secs(runtime.tool_refresh_seconds.max(1)));
    scheduler.clone().spawn_ping_manager(
        Duration::from_secs(runtime.tool_refresh_seconds.max(1)),
        Duration::from_secs(runtime.ping_probe_timeout_seconds.max(1)),
    );
    registry
        .clone()
        .spawn_heartbeat_reaper(Duration::from_secs(runtime.client_check_seconds.max(1)));
    observability.clone().spawn_runtime_refresher();
    observability.clone().spawn_init_refresher();

    Ok(Arc::new(ControlPlane {
        scheduler,
        supervisor,
        registry,
        indexes,
        discovery,
        observability,
        reload,
        provider,
        runtime,
    }))
}

/// §6: "This crate ships the static (in-memory/TOML-file) implementation and
/// a debounced file-watching implementation as the reference providers."
/// `MUXD_CONFIG` pointed at an existing file selects the polling file
/// provider; otherwise the in-memory snapshot built from `config` is final.
async fn config_provider(config: &Config) -> anyhow::Result<Arc<dyn ConfigProvider>> {
    match std::env::var("MUXD_CONFIG") {
        Ok(path) if std::path::Path::new(&path).exists() => {
            let provider = Arc::new(FileConfigProvider::load(path.into()).await?);
            provider.clone().spawn_poll_loop(FILE_POLL_INTERVAL);
            Ok(provider)
        }
        _ => {
            let initial = CatalogState::new(config.specs.clone(), config.runtime.clone(), 1);
            Ok(Arc::new(StaticProvider::new(initial)))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use muxd_domain::{SessionStrategy, Spec, Transport};

    fn spec(name: &str) -> Spec {
        Spec {
            name: name.into(),
            transport: Transport::Stdio {
                command: "true".into(),
                args: vec![],
            },
            env: Default::default(),
            working_dir: None,
            tags: vec!["blue".into()],
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

    #[tokio::test]
    async fn empty_config_builds_a_running_control_plane() {
        let cp = build_control_plane(Config::default()).await.unwrap();
        assert_eq!(cp.get_pool_status().await.pools.len(), 0);
        assert!(cp.list_active_clients().await.is_empty());
    }

    #[tokio::test]
    async fn registering_a_client_makes_its_spec_visible_in_tools() {
        let cfg = Config {
            runtime: muxd_domain::RuntimeConfig::default(),
            specs: vec![spec("s1")],
        };
        let cp = build_control_plane(cfg).await.unwrap();
        cp.register_client("c1", 123, vec!["blue".into()]).await.unwrap();
        let (tools, _cursor) = cp.list_tools("c1", None).await.unwrap();
        // Nothing is in the metadata cache yet (no backend ever reached
        // `tools/list`), so the list is empty but the call itself must
        // succeed: the client is registered and the spec is visible.
        assert!(tools.is_empty());
    }

    #[tokio::test]
    async fn reload_config_on_an_unchanged_catalog_is_a_fast_no_op() {
        let cp = build_control_plane(Config::default()).await.unwrap();
        cp.reload_config().await.unwrap();
    }
}
