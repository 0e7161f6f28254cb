//! Cluster Registry
//!
//! Local source of truth for every managed cluster:
//! - Cluster name -> cluster definition
//! - Logical cluster name -> member cluster names
//! - Snapshot version used by the sync protocol
//!
//! Both maps sit behind one mutex so readers always see a consistent pair.
//! The registry is loaded from its snapshot file on start and flushed back
//! on shutdown; the sync protocol keeps it aligned with the remote store.

pub mod store;
pub mod sync;

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, info};

use crate::error::{CkmanError, Result};
use crate::types::ClickHouseConfig;

pub use store::{MemoryConfigStore, NacosConfigStore, RemoteConfigStore};
pub use sync::ConfigSync;

/// Serialized form of the whole registry, shared through the remote store
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RegistrySnapshot {
    #[serde(default)]
    pub config_version: u64,
    #[serde(default)]
    pub clusters: BTreeMap<String, ClickHouseConfig>,
    #[serde(default)]
    pub logic_clusters: BTreeMap<String, Vec<String>>,
}

impl RegistrySnapshot {
    pub fn marshal(&self) -> Result<Vec<u8>> {
        Ok(serde_json::to_vec_pretty(self)?)
    }

    pub fn unmarshal(payload: &[u8]) -> Result<Self> {
        Ok(serde_json::from_slice(payload)?)
    }
}

#[derive(Debug, Default)]
struct RegistryState {
    snapshot: RegistrySnapshot,
    /// Mutated since the last publish
    dirty: bool,
}

impl RegistryState {
    fn register(&mut self, conf: ClickHouseConfig) {
        if let Some(logic) = conf.logic_cluster.clone() {
            let members = self.snapshot.logic_clusters.entry(logic).or_default();
            if !members.contains(&conf.cluster) {
                members.push(conf.cluster.clone());
            }
        }
        self.snapshot.clusters.insert(conf.cluster.clone(), conf);
        self.dirty = true;
    }
}

#[derive(Debug)]
pub struct ClusterRegistry {
    path: PathBuf,
    state: Mutex<RegistryState>,
}

impl ClusterRegistry {
    /// Open the registry backed by `path`, loading the last snapshot if present
    pub fn open(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        let snapshot = if path.exists() {
            let snapshot = RegistrySnapshot::unmarshal(&fs::read(&path)?)?;
            info!(
                "loaded {} clusters (config version {}) from {}",
                snapshot.clusters.len(),
                snapshot.config_version,
                path.display()
            );
            snapshot
        } else {
            debug!("no cluster file at {}, starting empty", path.display());
            RegistrySnapshot::default()
        };
        Ok(Self {
            path,
            state: Mutex::new(RegistryState { snapshot, dirty: false }),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn get_cluster(&self, name: &str) -> Option<ClickHouseConfig> {
        self.state.lock().snapshot.clusters.get(name).cloned()
    }

    pub fn contains_cluster(&self, name: &str) -> bool {
        self.state.lock().snapshot.clusters.contains_key(name)
    }

    pub fn cluster_names(&self) -> Vec<String> {
        self.state.lock().snapshot.clusters.keys().cloned().collect()
    }

    pub fn set_cluster(&self, conf: ClickHouseConfig) {
        let mut state = self.state.lock();
        state.snapshot.clusters.insert(conf.cluster.clone(), conf);
        state.dirty = true;
    }

    pub fn get_logic_cluster(&self, logic: &str) -> Option<Vec<String>> {
        self.state.lock().snapshot.logic_clusters.get(logic).cloned()
    }

    pub fn set_logic_cluster(&self, logic: &str, members: Vec<String>) {
        let mut state = self.state.lock();
        state.snapshot.logic_clusters.insert(logic.to_string(), members);
        state.dirty = true;
    }

    /// Existing member definitions of `logic`, in membership order
    pub fn logic_members(&self, logic: &str) -> Vec<ClickHouseConfig> {
        let state = self.state.lock();
        state
            .snapshot
            .logic_clusters
            .get(logic)
            .map(|names| {
                names
                    .iter()
                    .filter_map(|name| state.snapshot.clusters.get(name).cloned())
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Store a cluster and, if it names one, append it to its logical cluster
    pub fn register_cluster(&self, conf: ClickHouseConfig) {
        self.state.lock().register(conf);
    }

    /// Like `register_cluster`, but refuses a name that is already taken
    pub fn register_new_cluster(&self, conf: ClickHouseConfig) -> Result<()> {
        let mut state = self.state.lock();
        if state.snapshot.clusters.contains_key(&conf.cluster) {
            return Err(CkmanError::invalid_params(format!("cluster {} already exists", conf.cluster)));
        }
        state.register(conf);
        Ok(())
    }

    pub fn config_version(&self) -> u64 {
        self.state.lock().snapshot.config_version
    }

    pub fn snapshot(&self) -> RegistrySnapshot {
        self.state.lock().snapshot.clone()
    }

    /// Adopt `remote` wholesale unless it equals local state or is older than it.
    /// Returns whether local state changed.
    pub(crate) fn replace_if_newer(&self, remote: RegistrySnapshot) -> bool {
        let mut state = self.state.lock();
        if remote == state.snapshot || remote.config_version < state.snapshot.config_version {
            return false;
        }
        debug!(
            "replacing local config version {} with remote version {}",
            state.snapshot.config_version, remote.config_version
        );
        state.snapshot = remote;
        state.dirty = false;
        true
    }

    /// Serialize for publishing, bumping the version if anything changed
    pub(crate) fn prepare_publish(&self) -> Result<Vec<u8>> {
        let mut state = self.state.lock();
        if state.dirty {
            state.snapshot.config_version += 1;
            state.dirty = false;
        }
        state.snapshot.marshal()
    }

    /// Write a serialized snapshot to the cluster file
    pub fn persist(&self, payload: &[u8]) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)?;
            }
        }
        let temp_path = self.path.with_extension("tmp");
        fs::write(&temp_path, payload)?;
        fs::rename(&temp_path, &self.path)?;
        Ok(())
    }

    /// Write current state to disk, used on shutdown
    pub fn flush(&self) -> Result<()> {
        let payload = self.snapshot().marshal()?;
        self.persist(&payload)
    }
}
