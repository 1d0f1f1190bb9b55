//! In-memory catalog provider (§6): the catalog never changes on its own;
//! `reload()` just hands back the state it was built with.

use tokio::sync::{watch, RwLock};

use muxd_domain::CatalogState;

use crate::error::ReloadError;
use crate::provider::ConfigProvider;

pub struct StaticProvider {
    state: RwLock<CatalogState>,
    tx: watch::Sender<CatalogState>,
}

impl StaticProvider {
    pub fn new(initial: CatalogState) -> Self {
        let (tx, _rx) = watch::channel(initial.clone());
        Self {
            state: RwLock::new(initial),
            tx,
        }
    }
}

#[async_trait::async_trait]
impl ConfigProvider for StaticProvider {
    async fn snapshot(&self) -> CatalogState {
        self.state.read().await.clone()
    }

    async fn reload(&self) -> Result<CatalogState, ReloadError> {
        let current = self.state.read().await.clone();
        let _ = self.tx.send(current.clone());
        Ok(current)
    }

    fn subscribe(&self) -> watch::Receiver<CatalogState> {
        self.tx.subscribe()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use muxd_domain::RuntimeConfig;

    #[tokio::test]
    async fn reload_is_a_no_op_returning_the_same_revision() {
        let initial = CatalogState::new(vec![], RuntimeConfig::default(), 1);
        let provider = StaticProvider::new(initial);
        let reloaded = provider.reload().await.unwrap();
        assert_eq!(reloaded.revision, 1);
    }
}
