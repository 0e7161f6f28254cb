//! Cluster Definition Types
//!
//! Core types describing one managed ClickHouse cluster:
//! - Shard/replica topology
//! - SSH credentials used for deployment
//! - Storage disks and policies
//! - Extra users
//!
//! The same type doubles as the deployment request body and the record kept
//! in the cluster registry.

use serde::{Deserialize, Serialize};

pub const DEFAULT_USER: &str = "default";
pub const DEFAULT_DATABASE: &str = "default";
pub const DEFAULT_DISK: &str = "default";

/// How the management server authenticates over SSH
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum SshAuth {
    /// Password is used and kept in the registry
    #[default]
    Password,
    /// Password is used for this deployment only and stripped before storing
    PasswordNotSaved,
    /// Key based auth, no password required
    PublicKey,
}

/// How the cluster came under management
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum ClusterMode {
    #[default]
    Deploy,
    Import,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct Replica {
    pub ip: String,
    /// Filled in during the init phase
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub hostname: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct Shard {
    pub replicas: Vec<Replica>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct DiskLocal {
    pub path: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub keep_free_space_bytes: Option<u64>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct DiskHdfs {
    pub endpoint: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct DiskS3 {
    pub endpoint: String,
    #[serde(default)]
    pub access_key_id: String,
    #[serde(default)]
    pub secret_access_key: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub region: Option<String>,
    #[serde(default)]
    pub use_environment_credentials: bool,
}

/// A storage disk. `disk_type` stays a plain string so that unknown types are
/// reported by validation rather than by the deserializer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct Disk {
    pub name: String,
    #[serde(rename = "type")]
    pub disk_type: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub local: Option<DiskLocal>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub hdfs: Option<DiskHdfs>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub s3: Option<DiskS3>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct Volume {
    pub name: String,
    pub disks: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_data_part_size_bytes: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub prefer_not_to_merge: Option<bool>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct Policy {
    pub name: String,
    pub volumes: Vec<Volume>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub move_factor: Option<f64>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct Storage {
    #[serde(default)]
    pub disks: Vec<Disk>,
    #[serde(default)]
    pub policies: Vec<Policy>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct User {
    pub name: String,
    pub password: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub profile: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub quota: Option<String>,
    /// Allowed client networks, any when empty
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub networks: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct UsersConf {
    #[serde(default)]
    pub users: Vec<User>,
}

/// One managed ClickHouse cluster
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClickHouseConfig {
    /// Unique cluster name
    pub cluster: String,
    /// Target ClickHouse version, e.g. `21.9.3.30`
    pub version: String,
    pub hosts: Vec<String>,
    /// Derived from `hosts` and `is_replica` during validation
    #[serde(default)]
    pub shards: Vec<Shard>,
    #[serde(default)]
    pub is_replica: bool,
    pub zk_nodes: Vec<String>,
    #[serde(default = "default_zk_port")]
    pub zk_port: u16,
    #[serde(default = "default_tcp_port")]
    pub port: u16,
    #[serde(default = "default_http_port")]
    pub http_port: u16,
    /// ClickHouse user the manager connects as
    #[serde(default = "default_user")]
    pub user: String,
    /// Password of the default user
    #[serde(default)]
    pub password: String,
    pub ssh_user: String,
    #[serde(default)]
    pub ssh_password: String,
    #[serde(default = "default_ssh_port")]
    pub ssh_port: u16,
    #[serde(default)]
    pub auth_type: SshAuth,
    /// Main data directory, must end with '/'
    pub path: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub storage: Option<Storage>,
    #[serde(default)]
    pub users_conf: UsersConf,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub logic_cluster: Option<String>,
    #[serde(default)]
    pub mode: ClusterMode,
}

fn default_zk_port() -> u16 { 2181 }
fn default_tcp_port() -> u16 { 9000 }
fn default_http_port() -> u16 { 8123 }
fn default_ssh_port() -> u16 { 22 }
fn default_user() -> String { DEFAULT_USER.to_string() }

impl ClickHouseConfig {
    /// Fill in derived defaults after validation
    pub fn normalize(&mut self) {
        if self.zk_port == 0 {
            self.zk_port = default_zk_port();
        }
        if self.port == 0 {
            self.port = default_tcp_port();
        }
        if self.http_port == 0 {
            self.http_port = default_http_port();
        }
        if self.ssh_port == 0 {
            self.ssh_port = default_ssh_port();
        }
        self.cluster = self.cluster.trim().to_string();
        if let Some(logic) = self.logic_cluster.as_mut() {
            *logic = logic.trim().to_string();
        }
        if matches!(self.logic_cluster.as_deref(), Some("")) {
            self.logic_cluster = None;
        }
    }

    /// Copy suitable for the registry: credentials the user asked us not to
    /// keep are dropped.
    pub fn for_storage(&self) -> Self {
        let mut conf = self.clone();
        if conf.auth_type == SshAuth::PasswordNotSaved {
            conf.ssh_password.clear();
        }
        conf
    }

    /// All replica addresses in shard/replica order, or the raw host list for
    /// a cluster whose topology was never derived
    pub fn replica_hosts(&self) -> Vec<&str> {
        if self.shards.is_empty() {
            return self.hosts.iter().map(String::as_str).collect();
        }
        self.shards
            .iter()
            .flat_map(|shard| shard.replicas.iter().map(|r| r.ip.as_str()))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> ClickHouseConfig {
        serde_yaml::from_str(
            r#"
cluster: c1
version: 21.9.3.30
hosts: [10.0.0.1, 10.0.0.2]
zk_nodes: [10.0.0.10]
ssh_user: root
ssh_password: secret
auth_type: password_not_saved
path: /data/
"#,
        )
        .unwrap()
    }

    #[test]
    fn test_defaults_from_yaml() {
        let conf = sample();
        assert_eq!(conf.port, 9000);
        assert_eq!(conf.http_port, 8123);
        assert_eq!(conf.zk_port, 2181);
        assert_eq!(conf.ssh_port, 22);
        assert_eq!(conf.user, DEFAULT_USER);
        assert_eq!(conf.mode, ClusterMode::Deploy);
        assert!(conf.shards.is_empty());
    }

    #[test]
    fn test_for_storage_strips_unsaved_password() {
        let conf = sample();
        assert_eq!(conf.for_storage().ssh_password, "");

        let mut kept = sample();
        kept.auth_type = SshAuth::Password;
        assert_eq!(kept.for_storage().ssh_password, "secret");
    }

    #[test]
    fn test_normalize_drops_blank_logic_cluster() {
        let mut conf = sample();
        conf.logic_cluster = Some("  ".to_string());
        conf.normalize();
        assert_eq!(conf.logic_cluster, None);
    }
}
