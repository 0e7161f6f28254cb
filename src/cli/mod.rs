//! CLI Handler for ckman
//!
//! Provides command-line interface functionality for:
//! - Deploying a cluster from a YAML/JSON definition
//! - Inspecting the cluster registry and logical clusters
//! - Previewing a shard topology
//! - Forcing a config sync round

use clap::{Parser, Subcommand};
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, info};

use crate::deploy::build_shards;
use crate::error::{CkmanError, Result};
use crate::hosts::parse_hosts;
use crate::service::DeployService;
use crate::types::{ClickHouseConfig, DeployResponse};

#[derive(Parser)]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    /// Manager configuration file
    #[arg(short, long, global = true)]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug, Clone, PartialEq, Eq)]
pub enum Commands {
    /// Deploy a new ClickHouse cluster
    Deploy {
        /// Cluster definition (YAML or JSON)
        #[arg(short, long)]
        file: PathBuf,
    },
    /// List registered clusters
    Clusters,
    /// Print one registered cluster
    Show { name: String },
    /// List the members of a logical cluster
    Logic { name: String },
    /// Preview the shard layout for a host list
    Topology {
        /// Hosts, comma separated; `a.b.c.[x-y]` ranges are expanded
        #[arg(long, value_delimiter = ',', required = true)]
        hosts: Vec<String>,
        /// Two replicas per shard
        #[arg(long)]
        replica: bool,
    },
    /// Pull the shared cluster config and publish the local one
    Sync,
}

pub struct CliHandler {
    service: DeployService,
}

impl CliHandler {
    pub fn new(service: DeployService) -> Self {
        Self { service }
    }

    pub fn service(&self) -> &DeployService {
        &self.service
    }

    pub async fn handle(&self, command: Commands) -> Result<()> {
        debug!("handling {:?}", command);
        match command {
            Commands::Deploy { file } => {
                let conf = read_cluster_file(&file)?;
                let response = self.service.deploy_ck(conf).await;
                println!("{}", serde_json::to_string_pretty(&response)?);
                into_result(response)
            }
            Commands::Clusters => {
                for name in self.service.registry().cluster_names() {
                    println!("{}", name);
                }
                Ok(())
            }
            Commands::Show { name } => {
                let conf = self
                    .service
                    .registry()
                    .get_cluster(&name)
                    .ok_or_else(|| CkmanError::invalid_params(format!("cluster {} not found", name)))?;
                print!("{}", serde_yaml::to_string(&masked(conf))?);
                Ok(())
            }
            Commands::Logic { name } => {
                let members = self
                    .service
                    .registry()
                    .get_logic_cluster(&name)
                    .ok_or_else(|| CkmanError::invalid_params(format!("logic cluster {} not found", name)))?;
                for member in members {
                    println!("{}", member);
                }
                Ok(())
            }
            Commands::Topology { hosts, replica } => {
                for (i, shard) in preview_topology(&hosts, replica)?.iter().enumerate() {
                    println!("shard {}: {}", i + 1, shard.join(", "));
                }
                Ok(())
            }
            Commands::Sync => {
                let updated = self.service.sync().refresh().await?;
                info!(
                    "config version {} ({})",
                    self.service.registry().config_version(),
                    if updated { "updated from remote" } else { "unchanged" }
                );
                Ok(())
            }
        }
    }
}

fn read_cluster_file(path: &Path) -> Result<ClickHouseConfig> {
    let contents = fs::read_to_string(path)
        .map_err(|e| CkmanError::invalid_params(format!("failed to read {}: {}", path.display(), e)))?;
    // JSON documents are valid YAML
    serde_yaml::from_str(&contents)
        .map_err(|e| CkmanError::invalid_params(format!("failed to parse {}: {}", path.display(), e)))
}

fn masked(mut conf: ClickHouseConfig) -> ClickHouseConfig {
    for secret in [&mut conf.password, &mut conf.ssh_password] {
        if !secret.is_empty() {
            *secret = "******".to_string();
        }
    }
    conf
}

fn into_result(response: DeployResponse) -> Result<()> {
    if response.is_success() {
        Ok(())
    } else {
        Err(CkmanError::deploy(format!("{} {}", response.code.code(), response.message)))
    }
}

/// Replica addresses of each shard the deployment would create
pub fn preview_topology(hosts: &[String], replica: bool) -> Result<Vec<Vec<String>>> {
    let hosts = parse_hosts(hosts)?;
    if replica && hosts.len() % 2 != 0 {
        return Err(CkmanError::invalid_params(format!(
            "replicated cluster needs an even number of hosts, got {}",
            hosts.len()
        )));
    }
    Ok(build_shards(&hosts, replica)
        .into_iter()
        .map(|shard| shard.replicas.into_iter().map(|r| r.ip).collect())
        .collect())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_deploy_command() {
        let cli = Cli::try_parse_from(["ckman", "--config", "/etc/ckman.yml", "deploy", "-f", "c1.yml"]).unwrap();
        assert_eq!(cli.config, Some(PathBuf::from("/etc/ckman.yml")));
        assert_eq!(cli.command, Commands::Deploy { file: PathBuf::from("c1.yml") });
    }

    #[test]
    fn test_parse_topology_command() {
        let cli = Cli::try_parse_from(["ckman", "topology", "--hosts", "10.0.0.[1-4]", "--replica"]).unwrap();
        assert_eq!(
            cli.command,
            Commands::Topology { hosts: vec!["10.0.0.[1-4]".to_string()], replica: true }
        );
    }

    #[test]
    fn test_preview_topology() {
        let shards = preview_topology(&["10.0.0.[1-4]".to_string()], true).unwrap();
        assert_eq!(
            shards,
            vec![vec!["10.0.0.1", "10.0.0.2"], vec!["10.0.0.3", "10.0.0.4"]]
        );
        assert!(preview_topology(&["10.0.0.[1-3]".to_string()], true).is_err());
    }

    #[test]
    fn test_masked_hides_secrets() {
        let conf: ClickHouseConfig = serde_yaml::from_str(
            "cluster: c\nversion: '21.9'\nhosts: [h]\nzk_nodes: [z]\nssh_user: root\nssh_password: pw\npath: /d/\n",
        )
        .unwrap();
        let shown = masked(conf);
        assert_eq!(shown.ssh_password, "******");
        assert_eq!(shown.password, "");
    }
}
