//! Preflight checks for a deployment request
//!
//! Checks run in a fixed order and stop at the first problem. The request is
//! only normalized once every check has passed, so a rejected request comes
//! back exactly as it was submitted.

use std::collections::HashSet;

use super::{for_each_host, topology::build_shards};
use crate::error::{CkmanError, Result};
use crate::hosts::parse_hosts;
use crate::registry::ClusterRegistry;
use crate::remote::{RemoteExecutor, SshOptions};
use crate::types::{ClickHouseConfig, ClusterMode, SshAuth, Storage, DEFAULT_DISK, DEFAULT_USER};
use crate::version::{ClickHouseVersion, MIN_HDFS_VERSION};

/// Command run as the `sshd` account to prove a directory is reachable
pub fn access_check_command(path: &str) -> String {
    format!("su sshd -s /bin/bash -c \"cd {} && echo $?\"", path)
}

fn invalid(msg: impl Into<String>) -> CkmanError {
    CkmanError::invalid_params(msg)
}

/// Names that end up as XML element names in the rendered config files
fn check_identifier(kind: &str, name: &str) -> Result<()> {
    let mut chars = name.chars();
    let valid_start = chars.next().is_some_and(|c| c.is_ascii_alphabetic() || c == '_');
    if !valid_start || !chars.all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-') {
        return Err(invalid(format!(
            "{} name {:?} must start with a letter or '_' and contain only letters, digits, '_' or '-'",
            kind, name
        )));
    }
    Ok(())
}

fn check_dir(kind: &str, path: &str) -> Result<()> {
    if !path.starts_with('/') || !path.ends_with('/') {
        return Err(invalid(format!("{} {} must be absolute and end with '/'", kind, path)));
    }
    Ok(())
}

fn check_endpoint(disk: &str, endpoint: &str) -> Result<()> {
    if !endpoint.ends_with('/') {
        return Err(invalid(format!("endpoint {} of disk {} must end with '/'", endpoint, disk)));
    }
    Ok(())
}

fn check_paths(conf: &ClickHouseConfig) -> Result<()> {
    check_dir("path", &conf.path)?;
    let Some(storage) = &conf.storage else {
        return Ok(());
    };
    for disk in &storage.disks {
        if let Some(local) = &disk.local {
            check_dir("disk path", &local.path)?;
        }
        if let Some(hdfs) = &disk.hdfs {
            check_endpoint(&disk.name, &hdfs.endpoint)?;
        }
        if let Some(s3) = &disk.s3 {
            check_endpoint(&disk.name, &s3.endpoint)?;
        }
    }
    Ok(())
}

fn check_storage(storage: &Storage, version: ClickHouseVersion) -> Result<()> {
    let mut names: HashSet<&str> = HashSet::new();
    for disk in &storage.disks {
        if disk.name.is_empty() {
            return Err(invalid("disk name must not be empty"));
        }
        if disk.name == DEFAULT_DISK {
            return Err(invalid(format!("disk name {} is reserved", DEFAULT_DISK)));
        }
        check_identifier("disk", &disk.name)?;
        if !names.insert(disk.name.as_str()) {
            return Err(invalid(format!("disk {} is duplicate", disk.name)));
        }
        let configured = match disk.disk_type.as_str() {
            "local" => disk.local.is_some(),
            "hdfs" => {
                if version < MIN_HDFS_VERSION {
                    return Err(invalid(format!(
                        "disk {}: hdfs requires clickhouse {} or newer, got {}",
                        disk.name, MIN_HDFS_VERSION, version
                    )));
                }
                disk.hdfs.is_some()
            }
            "s3" => disk.s3.is_some(),
            other => {
                return Err(invalid(format!("disk {}: unsupported type {}", disk.name, other)));
            }
        };
        if !configured {
            return Err(invalid(format!(
                "disk {}: missing {} settings",
                disk.name, disk.disk_type
            )));
        }
    }

    for policy in &storage.policies {
        check_identifier("policy", &policy.name)?;
        for volume in &policy.volumes {
            check_identifier("volume", &volume.name)?;
            for disk in &volume.disks {
                if disk != DEFAULT_DISK && !names.contains(disk.as_str()) {
                    return Err(invalid(format!(
                        "policy {} references unknown disk {}",
                        policy.name, disk
                    )));
                }
            }
        }
    }
    Ok(())
}

fn check_users(conf: &ClickHouseConfig) -> Result<()> {
    let mut names = HashSet::new();
    for user in &conf.users_conf.users {
        if user.name.is_empty() {
            return Err(invalid("user name must not be empty"));
        }
        if user.name == DEFAULT_USER {
            return Err(invalid(format!("user {} is reserved", DEFAULT_USER)));
        }
        check_identifier("user", &user.name)?;
        if !names.insert(user.name.as_str()) {
            return Err(invalid(format!("user {} is duplicate", user.name)));
        }
        if user.password.is_empty() {
            return Err(invalid(format!("user {} has no password", user.name)));
        }
    }
    Ok(())
}

async fn check_access(
    conf: &ClickHouseConfig,
    hosts: &[String],
    executor: &dyn RemoteExecutor,
) -> Result<()> {
    let ssh = SshOptions::from_config(conf);
    let mut dirs = vec![conf.path.clone()];
    if let Some(storage) = &conf.storage {
        dirs.extend(storage.disks.iter().filter_map(|d| d.local.as_ref()).map(|l| l.path.clone()));
    }
    let checks: Vec<(String, String)> = dirs
        .into_iter()
        .map(|dir| {
            let cmd = ssh.privileged(&access_check_command(&dir));
            (dir, cmd)
        })
        .collect();
    let ssh = &ssh;
    let checks = &checks;

    for_each_host(hosts, |host| async move {
        for (dir, cmd) in checks {
            let out = executor
                .execute(ssh, host, cmd)
                .await
                .map_err(|e| invalid(format!("host {}: cannot access {}: {}", host, dir, e)))?;
            if out.trim() != "0" {
                return Err(invalid(format!("host {}: {} is not accessible", host, dir)));
            }
        }
        Ok(())
    })
    .await
}

/// Validate a deployment request and, on success, fill in its derived fields
/// (parsed hosts and ZooKeeper nodes, shard topology, mode and user).
pub async fn check_deploy_params(
    conf: &mut ClickHouseConfig,
    registry: &ClusterRegistry,
    executor: &dyn RemoteExecutor,
) -> Result<()> {
    let cluster = conf.cluster.trim();
    if cluster.is_empty() {
        return Err(invalid("cluster name must not be empty"));
    }
    check_identifier("cluster", cluster)?;
    if registry.contains_cluster(cluster) {
        return Err(invalid(format!("cluster {} already exists", cluster)));
    }
    let version: ClickHouseVersion = conf.version.parse()?;

    if conf.hosts.is_empty() {
        return Err(invalid("hosts must not be empty"));
    }
    let hosts = parse_hosts(&conf.hosts)?;

    if conf.is_replica && hosts.len() % 2 != 0 {
        return Err(invalid(format!(
            "replicated cluster needs an even number of hosts, got {}",
            hosts.len()
        )));
    }

    if conf.zk_nodes.is_empty() {
        return Err(invalid("zookeeper nodes must not be empty"));
    }
    let zk_nodes = parse_hosts(&conf.zk_nodes)?;

    if let Some(logic) = conf.logic_cluster.as_deref().map(str::trim).filter(|l| !l.is_empty()) {
        check_identifier("logic cluster", logic)?;
        for member in registry.logic_members(logic) {
            if member.password != conf.password {
                return Err(invalid(format!(
                    "default password differs from cluster {} of logic cluster {}",
                    member.cluster, logic
                )));
            }
        }
    }

    if conf.ssh_user.is_empty() {
        return Err(invalid("ssh user must not be empty"));
    }
    if conf.auth_type != SshAuth::PublicKey && conf.ssh_password.is_empty() {
        return Err(invalid("ssh password must not be empty"));
    }

    check_paths(conf)?;
    if let Some(storage) = &conf.storage {
        check_storage(storage, version)?;
    }
    check_users(conf)?;
    check_access(conf, &hosts, executor).await?;

    conf.shards = build_shards(&hosts, conf.is_replica);
    conf.hosts = hosts;
    conf.zk_nodes = zk_nodes;
    conf.mode = ClusterMode::Deploy;
    conf.user = DEFAULT_USER.to_string();
    conf.normalize();
    Ok(())
}
