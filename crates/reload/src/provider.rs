//! The catalog provider contract (§6): `Snapshot`, `Watch`, `Reload`. Static
//! and dynamic implementations both satisfy it; neither is the binding
//! contract itself.

use tokio::sync::watch;

use muxd_domain::CatalogState;

use crate::error::ReloadError;

#[async_trait::async_trait]
pub trait ConfigProvider: Send + Sync {
    /// `Snapshot(ctx)`: the provider's current view, without forcing a reread.
    async fn snapshot(&self) -> CatalogState;

    /// `Reload(ctx)`: force a reread (file providers) or hand back the
    /// current state unchanged (static providers), publishing the result to
    /// `subscribe()` either way.
    async fn reload(&self) -> Result<CatalogState, ReloadError>;

    /// `Watch(ctx)`: a channel of catalog updates. A `watch` channel already
    /// has the newest-wins, late-subscriber-gets-current-value semantics the
    /// provider contract implies.
    fn subscribe(&self) -> watch::Receiver<CatalogState>;
}
