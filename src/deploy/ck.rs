//! ClickHouse deployment over SSH

use async_trait::async_trait;
use futures::future::join_all;
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

use super::render::{render_host_configs, ConfigFile};
use super::{for_each_host, Deploy};
use crate::clickhouse::{ClickHouseConnector, ConnectOptions};
use crate::config::DeployConfig;
use crate::error::{CkmanError, Result};
use crate::remote::{RemoteExecutor, SshOptions};
use crate::types::{ClickHouseConfig, DEFAULT_DATABASE};

/// Packages installed for `version`, in install order
pub fn package_names(version: &str) -> Vec<String> {
    vec![
        format!("clickhouse-common-static-{}-2.x86_64.rpm", version),
        format!("clickhouse-server-{}-2.noarch.rpm", version),
        format!("clickhouse-client-{}-2.noarch.rpm", version),
    ]
}

#[derive(Debug, Clone)]
pub struct DeployOptions {
    /// Local directory holding the rpm packages
    pub package_dir: PathBuf,
    /// Work directory on every host
    pub remote_dir: String,
    /// Delay between health check attempts
    pub check_interval: Duration,
}

impl DeployOptions {
    pub fn from_config(config: &DeployConfig) -> Self {
        Self {
            package_dir: config.package_dir.clone(),
            remote_dir: config.remote_dir.trim_end_matches('/').to_string(),
            check_interval: config.check_interval(),
        }
    }
}

/// Deploys one ClickHouse cluster from rpm packages
pub struct CkDeploy {
    conf: ClickHouseConfig,
    packages: Vec<String>,
    opts: DeployOptions,
    ssh: SshOptions,
    logic_peers: Vec<ClickHouseConfig>,
    rendered: HashMap<String, Vec<ConfigFile>>,
    executor: Arc<dyn RemoteExecutor>,
    connector: Arc<dyn ClickHouseConnector>,
}

impl CkDeploy {
    /// Create a new deployment for a validated cluster definition
    pub fn new(
        conf: ClickHouseConfig,
        packages: Vec<String>,
        opts: DeployOptions,
        executor: Arc<dyn RemoteExecutor>,
        connector: Arc<dyn ClickHouseConnector>,
    ) -> Self {
        let ssh = SshOptions::from_config(&conf);
        Self {
            conf,
            packages,
            opts,
            ssh,
            logic_peers: Vec::new(),
            rendered: HashMap::new(),
            executor,
            connector,
        }
    }

    /// Existing members of the logical cluster being joined, rendered into
    /// the logical cluster section of `metrika.xml`
    pub fn with_logic_peers(mut self, peers: Vec<ClickHouseConfig>) -> Self {
        self.logic_peers = peers;
        self
    }

    pub fn config(&self) -> &ClickHouseConfig {
        &self.conf
    }

    pub fn into_config(self) -> ClickHouseConfig {
        self.conf
    }

    fn hosts(&self) -> Vec<String> {
        self.conf.replica_hosts().into_iter().map(String::from).collect()
    }

    fn remote_package(&self, package: &str) -> String {
        format!("{}/{}", self.opts.remote_dir, package)
    }

    async fn ping_all(&self) -> Result<()> {
        let hosts = self.hosts();
        let connector = &self.connector;
        let conf = &self.conf;
        for_each_host(&hosts, |host| async move {
            connector
                .connect(&ConnectOptions::for_host(conf, host, DEFAULT_DATABASE))
                .await
                .map(|_| ())
        })
        .await
    }
}

#[async_trait]
impl Deploy for CkDeploy {
    async fn init(&mut self) -> Result<()> {
        for package in &self.packages {
            let path = self.opts.package_dir.join(package);
            let found = tokio::fs::metadata(&path).await.map(|m| m.is_file()).unwrap_or(false);
            if !found {
                return Err(CkmanError::deploy(format!("package {} not found", path.display())));
            }
        }

        let hosts = self.hosts();
        let executor = &self.executor;
        let ssh = &self.ssh;
        let results = join_all(hosts.iter().map(|host| async move {
            executor
                .execute(ssh, host, "hostname -f")
                .await
                .map(|out| (host.clone(), out.trim().to_string()))
        }))
        .await;
        let hostnames = results.into_iter().collect::<Result<HashMap<_, _>>>()?;

        for replica in self.conf.shards.iter_mut().flat_map(|s| s.replicas.iter_mut()) {
            if let Some(name) = hostnames.get(&replica.ip) {
                replica.hostname = name.clone();
            }
        }

        let mut rendered = HashMap::with_capacity(hosts.len());
        for host in &hosts {
            rendered.insert(host.clone(), render_host_configs(&self.conf, &self.logic_peers, host)?);
        }
        self.rendered = rendered;
        debug!("rendered configuration for {} hosts", hosts.len());
        Ok(())
    }

    async fn prepare(&mut self) -> Result<()> {
        let hosts = self.hosts();
        let this = &*self;
        let mkdir = format!("mkdir -p {}", this.opts.remote_dir);
        let mkdir = &mkdir;
        for_each_host(&hosts, |host| async move {
            this.executor.execute(&this.ssh, host, mkdir).await?;
            for package in &this.packages {
                let local = this.opts.package_dir.join(package);
                this.executor
                    .copy_file(&this.ssh, host, &local, &this.remote_package(package))
                    .await?;
            }
            info!("packages copied to {}", host);
            Ok(())
        })
        .await
    }

    async fn install(&mut self) -> Result<()> {
        let hosts = self.hosts();
        let files: Vec<String> = self.packages.iter().map(|p| self.remote_package(p)).collect();

        let mut dirs = vec![format!("{}clickhouse", self.conf.path)];
        if let Some(storage) = &self.conf.storage {
            dirs.extend(storage.disks.iter().filter_map(|d| d.local.as_ref()).map(|l| l.path.clone()));
        }
        let dirs = dirs.join(" ");

        let cmds = vec![
            self.ssh.privileged(&format!("rpm -ivh --force {}", files.join(" "))),
            self.ssh.privileged(&format!(
                "mkdir -p {0} && chown -R clickhouse:clickhouse {0}",
                dirs
            )),
        ];
        let executor = &self.executor;
        let ssh = &self.ssh;
        let cmds = &cmds;
        for_each_host(&hosts, |host| async move {
            for cmd in cmds {
                executor.execute(ssh, host, cmd).await?;
            }
            Ok(())
        })
        .await
    }

    async fn config(&mut self) -> Result<()> {
        let hosts = self.hosts();
        let executor = &self.executor;
        let ssh = &self.ssh;
        let rendered = &self.rendered;
        for_each_host(&hosts, |host| async move {
            let files = rendered
                .get(host)
                .ok_or_else(|| CkmanError::deploy(format!("no configuration rendered for {}", host)))?;
            for file in files {
                executor.write_file(ssh, host, &file.path, &file.content).await?;
            }
            Ok(())
        })
        .await
    }

    async fn start(&mut self) -> Result<()> {
        let hosts = self.hosts();
        let cmd = self.ssh.privileged("systemctl daemon-reload && systemctl start clickhouse-server");
        let executor = &self.executor;
        let ssh = &self.ssh;
        let cmd = &cmd;
        for_each_host(&hosts, |host| async move { executor.execute(ssh, host, cmd).await.map(|_| ()) })
            .await
    }

    async fn check(&mut self, retries: usize) -> Result<()> {
        let mut last_error = None;
        for attempt in 1..=retries {
            match self.ping_all().await {
                Ok(()) => {
                    info!("cluster {} is healthy after {} attempt(s)", self.conf.cluster, attempt);
                    return Ok(());
                }
                Err(e) => {
                    warn!("health check {}/{} for {} failed: {}", attempt, retries, self.conf.cluster, e);
                    last_error = Some(e);
                }
            }
            if attempt < retries {
                tokio::time::sleep(self.opts.check_interval).await;
            }
        }
        let reason = last_error.map(|e| e.to_string()).unwrap_or_else(|| "no attempt made".to_string());
        Err(CkmanError::deploy(format!(
            "cluster {} not healthy after {} attempts: {}",
            self.conf.cluster, retries, reason
        )))
    }
}
