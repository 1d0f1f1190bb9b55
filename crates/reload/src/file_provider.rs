//! TOML-file catalog provider (§6). Reload rereads the file from disk;
//! `spawn_poll_loop` substitutes for debounced file-watching by polling on
//! an interval, following the same `tokio::spawn` + `tokio::time::interval`
//! shape the scheduler's idle and ping managers already use elsewhere in
//! this crate family.

use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use tokio::sync::{watch, RwLock};
use tokio::task::JoinHandle;

use muxd_domain::{CatalogState, Config};

use crate::error::ReloadError;
use crate::provider::ConfigProvider;

pub struct FileConfigProvider {
    path: PathBuf,
    state: RwLock<CatalogState>,
    revision: AtomicU64,
    tx: watch::Sender<CatalogState>,
}

impl FileConfigProvider {
    /// Reads `path` once to build the initial state (§6: "Static and
    /// dynamic... implementations both satisfy this contract").
    pub async fn load(path: PathBuf) -> Result<Self, ReloadError> {
        let initial = read_state(&path, 1).await?;
        let (tx, _rx) = watch::channel(initial.clone());
        Ok(Self {
            path,
            revision: AtomicU64::new(initial.revision),
            state: RwLock::new(initial),
            tx,
        })
    }

    /// Poll `path` every `interval`, reloading on any content change and
    /// logging (never failing the loop) on invalid or missing files.
    pub fn spawn_poll_loop(self: std::sync::Arc<Self>, interval: Duration) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut tick = tokio::time::interval(interval);
            loop {
                tick.tick().await;
                if let Err(e) = self.reload().await {
                    tracing::warn!(error = %e, path = %self.path.display(), "config reload failed");
                }
            }
        })
    }
}

async fn read_state(path: &PathBuf, revision: u64) -> Result<CatalogState, ReloadError> {
    let raw = tokio::fs::read_to_string(path).await?;
    let cfg: Config = toml::from_str(&raw).map_err(|e| ReloadError::Invalid(e.to_string()))?;
    let issues = cfg.validate();
    if Config::has_fatal_issues(&issues) {
        let message = issues
            .into_iter()
            .map(|i| i.message)
            .collect::<Vec<_>>()
            .join("; ");
        return Err(ReloadError::Invalid(message));
    }
    Ok(CatalogState::new(cfg.specs, cfg.runtime, revision))
}

#[async_trait::async_trait]
impl ConfigProvider for FileConfigProvider {
    async fn snapshot(&self) -> CatalogState {
        self.state.read().await.clone()
    }

    async fn reload(&self) -> Result<CatalogState, ReloadError> {
        let next_revision = self.revision.fetch_add(1, Ordering::SeqCst) + 1;
        let next = read_state(&self.path, next_revision).await?;
        *self.state.write().await = next.clone();
        let _ = self.tx.send(next.clone());
        Ok(next)
    }

    fn subscribe(&self) -> watch::Receiver<CatalogState> {
        self.tx.subscribe()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[tokio::test]
    async fn loads_initial_state_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "[runtime]\n").unwrap();
        let provider = FileConfigProvider::load(file.path().to_path_buf()).await.unwrap();
        assert_eq!(provider.snapshot().await.revision, 1);
    }

    #[tokio::test]
    async fn invalid_toml_on_reload_is_an_error() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "[runtime]\n").unwrap();
        let provider = FileConfigProvider::load(file.path().to_path_buf()).await.unwrap();

        writeln!(file, "not valid toml {{{{").unwrap();
        assert!(provider.reload().await.is_err());
    }

    #[tokio::test]
    async fn reload_bumps_revision_on_each_call() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "[runtime]\n").unwrap();
        let provider = FileConfigProvider::load(file.path().to_path_buf()).await.unwrap();
        let reloaded = provider.reload().await.unwrap();
        assert_eq!(reloaded.revision, 2);
    }
}
