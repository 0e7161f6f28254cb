//! Deployment service
//!
//! Runs one deployment request end to end:
//! - preflight validation
//! - the phase pipeline
//! - schema propagation when joining a logical cluster
//! - registration under the config sync lock
//!
//! Every outcome is reported as a `DeployResponse`.

use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info, info_span, warn, Instrument};
use uuid::Uuid;

use crate::clickhouse::schema::propagate_schema;
use crate::clickhouse::{ClickHouseConnector, HttpConnector};
use crate::config::{CkmanConfig, DeployConfig};
use crate::deploy::{check_deploy_params, deploy_package, package_names, CkDeploy, DeployOptions};
use crate::error::{CkmanError, Result};
use crate::registry::{ClusterRegistry, ConfigSync, MemoryConfigStore, NacosConfigStore, RemoteConfigStore};
use crate::remote::{RemoteExecutor, SshExecutor};
use crate::types::{ClickHouseConfig, DeployResponse, RetCode};

pub struct DeployService {
    config: DeployConfig,
    sync: Arc<ConfigSync>,
    executor: Arc<dyn RemoteExecutor>,
    connector: Arc<dyn ClickHouseConnector>,
}

impl DeployService {
    /// Create a new service from explicit collaborators
    pub fn new(
        config: DeployConfig,
        sync: Arc<ConfigSync>,
        executor: Arc<dyn RemoteExecutor>,
        connector: Arc<dyn ClickHouseConnector>,
    ) -> Self {
        Self { config, sync, executor, connector }
    }

    /// Wire up SSH, the ClickHouse HTTP client and the config store
    /// described by the manager configuration
    pub fn from_config(config: &CkmanConfig) -> Result<Self> {
        let registry = Arc::new(ClusterRegistry::open(&config.registry.cluster_file)?);
        let store: Arc<dyn RemoteConfigStore> = if config.nacos.enabled {
            info!("sharing cluster config through nacos at {}", config.nacos.addr);
            Arc::new(NacosConfigStore::new(config.nacos.clone())?)
        } else {
            Arc::new(MemoryConfigStore::new())
        };
        let executor = Arc::new(SshExecutor::new(
            Duration::from_secs(config.deploy.ssh_timeout_secs),
            config.deploy.ssh_connect_timeout_secs,
        ));
        let connector = Arc::new(HttpConnector::new(Duration::from_secs(config.clickhouse.timeout_secs))?);
        Ok(Self::new(
            config.deploy.clone(),
            Arc::new(ConfigSync::new(registry, store)),
            executor,
            connector,
        ))
    }

    pub fn registry(&self) -> &Arc<ClusterRegistry> {
        self.sync.registry()
    }

    pub fn sync(&self) -> &Arc<ConfigSync> {
        &self.sync
    }

    /// Deploy a new ClickHouse cluster and register it
    pub async fn deploy_ck(&self, conf: ClickHouseConfig) -> DeployResponse {
        let span = info_span!("deploy", task = %Uuid::new_v4(), cluster = %conf.cluster);
        self.run_deploy(conf).instrument(span).await
    }

    async fn run_deploy(&self, mut conf: ClickHouseConfig) -> DeployResponse {
        if let Err(e) = check_deploy_params(&mut conf, self.registry(), self.executor.as_ref()).await {
            warn!("deploy request rejected: {}", e);
            return DeployResponse::failure(RetCode::InvalidParams, e.detail());
        }

        let peers = conf
            .logic_cluster
            .as_deref()
            .map(|logic| self.registry().logic_members(logic))
            .unwrap_or_default();

        let packages = package_names(&conf.version);
        let mut deployer = CkDeploy::new(
            conf,
            packages,
            DeployOptions::from_config(&self.config),
            self.executor.clone(),
            self.connector.clone(),
        )
        .with_logic_peers(peers.clone());

        if let Err(failure) = deploy_package(&mut deployer, self.config.check_retries).await {
            error!("{}", failure);
            return DeployResponse::failure(RetCode::from(failure.phase), failure.source.detail());
        }
        let conf = deployer.into_config();
        info!("cluster {} deployed on {} hosts", conf.cluster, conf.hosts.len());

        let mut warnings = Vec::new();
        if let Some(logic) = conf.logic_cluster.as_deref() {
            if !peers.is_empty() && !self.sync_logic_schema(&peers, &conf, logic).await {
                let msg = format!("sync logic schema of {} to {} failed", logic, conf.cluster);
                warn!("{}", msg);
                warnings.push(msg);
            }
        }

        let stored = conf.for_storage();
        if let Err(e) = self.sync.try_mutate(move |registry| registry.register_new_cluster(stored)).await {
            error!("registering cluster failed: {}", e);
            let code = match e {
                CkmanError::InvalidParams(_) => RetCode::InvalidParams,
                CkmanError::SyncPull(_) => RetCode::GetNacosConfigFail,
                _ => RetCode::PubNacosConfigFail,
            };
            return DeployResponse::failure(code, e.detail());
        }
        DeployResponse::success(warnings)
    }

    /// Copy the logical-cluster schema from the first member that can serve it
    async fn sync_logic_schema(&self, peers: &[ClickHouseConfig], conf: &ClickHouseConfig, logic: &str) -> bool {
        for peer in peers {
            if propagate_schema(peer, conf, logic, self.connector.as_ref()).await {
                return true;
            }
        }
        false
    }
}
