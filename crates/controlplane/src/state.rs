//! `ControlPlane`: the composition root binding every subsystem crate
//! together behind the §6 RPC surface. Grouped by concern, one `Arc` field
//! per subsystem, the same shape the chat-gateway's `AppState` used.

use std::sync::Arc;

use muxd_discovery::DiscoveryService;
use muxd_domain::RuntimeConfig;
use muxd_indexes::Indexes;
use muxd_init_supervisor::InitSupervisor;
use muxd_observability::ObservabilityService;
use muxd_registry::ClientRegistry;
use muxd_reload::{ConfigProvider, ReloadManager};
use muxd_scheduler::Scheduler;

#[derive(Clone)]
pub struct ControlPlane {
    pub scheduler: Arc<Scheduler>,
    pub supervisor: Arc<InitSupervisor>,
    pub registry: Arc<ClientRegistry>,
    pub indexes: Arc<Indexes>,
    pub discovery: Arc<DiscoveryService>,
    pub observability: Arc<ObservabilityService>,
    pub reload: Arc<ReloadManager>,
    pub provider: Arc<dyn ConfigProvider>,
    pub runtime: RuntimeConfig,
}
