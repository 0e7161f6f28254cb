//! Config sync protocol
//!
//! Manager instances converge through the remote store with a coarse
//! pull -> mutate -> push cycle. The pulled snapshot replaces local state
//! wholesale (last writer wins at snapshot granularity). Within one process
//! the full cycle runs under a single lock; across processes a push landing
//! between another instance's pull and push is overwritten, since the store
//! offers no compare-and-swap.

use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use super::store::RemoteConfigStore;
use super::{ClusterRegistry, RegistrySnapshot};
use crate::error::{CkmanError, Result};

pub struct ConfigSync {
    registry: Arc<ClusterRegistry>,
    store: Arc<dyn RemoteConfigStore>,
    lock: Mutex<()>,
}

impl ConfigSync {
    pub fn new(registry: Arc<ClusterRegistry>, store: Arc<dyn RemoteConfigStore>) -> Self {
        Self {
            registry,
            store,
            lock: Mutex::new(()),
        }
    }

    pub fn registry(&self) -> &Arc<ClusterRegistry> {
        &self.registry
    }

    /// Pull the remote snapshot and adopt it if it is newer.
    /// Returns whether local state changed.
    pub async fn sync_down(&self) -> Result<bool> {
        let payload = self.store.get_config().await.map_err(as_pull)?;
        if payload.is_empty() {
            debug!("remote config is empty");
            return Ok(false);
        }
        let remote = RegistrySnapshot::unmarshal(&payload).map_err(as_pull)?;
        let remote_version = remote.config_version;
        if !self.registry.replace_if_newer(remote) {
            return Ok(false);
        }

        info!("local cluster config updated to version {}", remote_version);
        let merged = self.registry.snapshot().marshal()?;
        if let Err(e) = self.registry.persist(&merged) {
            warn!("failed to write cluster file {}: {}", self.registry.path().display(), e);
        }
        Ok(true)
    }

    /// Persist and publish the full local registry
    pub async fn sync_up(&self) -> Result<()> {
        let payload = self.registry.prepare_publish()?;
        if let Err(e) = self.registry.persist(&payload) {
            warn!("failed to write cluster file {}: {}", self.registry.path().display(), e);
        }
        self.store.publish_config(&payload).await.map_err(as_push)?;
        debug!("published config version {}", self.registry.config_version());
        Ok(())
    }

    /// Apply `f` to the registry between a pull and a push.
    ///
    /// A failed pull leaves the registry untouched. A failed push keeps the
    /// change locally and reports `SyncPush`; the next successful push from
    /// this instance carries it.
    pub async fn mutate<T, F>(&self, f: F) -> Result<T>
    where
        F: FnOnce(&ClusterRegistry) -> T,
    {
        let _guard = self.lock.lock().await;
        self.sync_down().await?;
        let out = f(&self.registry);
        self.sync_up().await?;
        Ok(out)
    }

    /// Like `mutate`, for changes that can be refused.
    ///
    /// `f` sees the freshly pulled state. If it returns an error nothing is
    /// published and the error is passed through unchanged.
    pub async fn try_mutate<T, F>(&self, f: F) -> Result<T>
    where
        F: FnOnce(&ClusterRegistry) -> Result<T>,
    {
        let _guard = self.lock.lock().await;
        self.sync_down().await?;
        let out = f(&self.registry)?;
        self.sync_up().await?;
        Ok(out)
    }

    /// Pull then push without a local change
    pub async fn refresh(&self) -> Result<bool> {
        let _guard = self.lock.lock().await;
        let updated = self.sync_down().await?;
        self.sync_up().await?;
        Ok(updated)
    }
}

fn as_pull(e: CkmanError) -> CkmanError {
    match e {
        CkmanError::SyncPull(_) => e,
        other => CkmanError::SyncPull(other.to_string()),
    }
}

fn as_push(e: CkmanError) -> CkmanError {
    match e {
        CkmanError::SyncPush(_) => e,
        other => CkmanError::SyncPush(other.to_string()),
    }
}
