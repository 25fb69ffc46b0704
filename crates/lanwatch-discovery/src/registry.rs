//! Device registry store
//!
//! Readers take the published `Arc<RegistryState>` and never block writers
//! for longer than a pointer swap. Writers are serialized by a separate gate
//! and replace the whole state at once, so a reader sees either the previous
//! cycle or the next one, never a mix.

use lanwatch_core::{DeviceView, HistoryFile, RegistryState};
use std::collections::BTreeMap;
use std::net::Ipv4Addr;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::{Mutex, RwLock};
use tracing::warn;

pub struct DeviceRegistry {
    published: RwLock<Arc<RegistryState>>,
    writer: Mutex<()>,
    history_path: Option<PathBuf>,
}

impl DeviceRegistry {
    pub fn new(state: RegistryState, history_path: Option<PathBuf>) -> Self {
        Self {
            published: RwLock::new(Arc::new(state)),
            writer: Mutex::new(()),
            history_path,
        }
    }

    /// Start from the history at `path` and persist back to it
    pub fn load(path: impl AsRef<Path>) -> Self {
        let path = path.as_ref();
        let state = HistoryFile::load(path).into_state();
        Self::new(state, Some(path.to_path_buf()))
    }

    /// A registry that is never written to disk
    pub fn in_memory() -> Self {
        Self::new(RegistryState::default(), None)
    }

    pub fn history_path(&self) -> Option<&Path> {
        self.history_path.as_deref()
    }

    /// The current published state
    pub async fn snapshot(&self) -> Arc<RegistryState> {
        self.published.read().await.clone()
    }

    pub async fn list_devices(&self) -> BTreeMap<Ipv4Addr, DeviceView> {
        self.snapshot().await.list_devices()
    }

    pub async fn device(&self, ip: Ipv4Addr) -> Option<DeviceView> {
        self.snapshot().await.device(ip)
    }

    /// Derive and publish a new state, then persist it
    ///
    /// `f` runs under the writer gate, so concurrent updates apply one after
    /// another. The save runs off the async workers but still inside the
    /// gate, so files land in publish order. Persistence failures are logged
    /// and otherwise ignored.
    pub async fn update<F>(&self, f: F) -> (Arc<RegistryState>, Arc<RegistryState>)
    where
        F: FnOnce(&RegistryState) -> RegistryState,
    {
        let _gate = self.writer.lock().await;
        let prev = self.snapshot().await;
        let next = Arc::new(f(&prev));

        *self.published.write().await = next.clone();

        if let Some(path) = &self.history_path {
            persist(HistoryFile::from_state(&next), path.clone()).await;
        }

        (prev, next)
    }
}

/// Write the history file on a blocking thread
async fn persist(file: HistoryFile, path: PathBuf) {
    let path_str = path.display().to_string();
    match tokio::task::spawn_blocking(move || file.save(&path)).await {
        Ok(Ok(())) => {}
        Ok(Err(e)) => warn!(path = %path_str, error = %e, "Failed to save device history"),
        Err(e) => warn!(path = %path_str, error = %e, "Device history save task failed"),
    }
}
