//! Per-host ClickHouse configuration files
//!
//! Produces the `config.d`/`users.d` overrides written during the config
//! phase: cluster topology, ZooKeeper and macros (`metrika.xml`), data paths
//! and ports (`custom.xml`), storage disks and policies (`storage.xml`) and
//! users (`users.xml`).

use sha2::{Digest, Sha256};

use super::topology::build_shards;
use crate::error::{CkmanError, Result};
use crate::types::{ClickHouseConfig, Disk, Shard, Storage, DEFAULT_USER};
use crate::version::ClickHouseVersion;

pub const CONFIG_DIR: &str = "/etc/clickhouse-server/config.d";
pub const USERS_DIR: &str = "/etc/clickhouse-server/users.d";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConfigFile {
    pub path: String,
    pub content: String,
}

struct Xml {
    buf: String,
    depth: usize,
}

impl Xml {
    fn new(root: &str) -> Self {
        let mut xml = Self { buf: String::from("<?xml version=\"1.0\"?>\n"), depth: 0 };
        xml.open(root);
        xml
    }

    fn indent(&mut self) {
        self.buf.push_str(&"    ".repeat(self.depth));
    }

    fn open(&mut self, tag: &str) -> &mut Self {
        self.indent();
        self.buf.push_str(&format!("<{}>\n", tag));
        self.depth += 1;
        self
    }

    fn close(&mut self, tag: &str) -> &mut Self {
        self.depth -= 1;
        self.indent();
        self.buf.push_str(&format!("</{}>\n", tag));
        self
    }

    fn leaf(&mut self, tag: &str, value: impl ToString) -> &mut Self {
        self.indent();
        self.buf.push_str(&format!("<{0}>{1}</{0}>\n", tag, escape(&value.to_string())));
        self
    }

    fn finish(mut self, root: &str) -> String {
        self.close(root);
        self.buf
    }
}

fn escape(s: &str) -> String {
    s.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
        .replace('"', "&quot;")
        .replace('\'', "&apos;")
}

fn sha256_hex(password: &str) -> String {
    format!("{:x}", Sha256::digest(password.as_bytes()))
}

/// Root element of config overrides; releases from 22.x on use `clickhouse`
fn root_tag(conf: &ClickHouseConfig) -> Result<&'static str> {
    let version: ClickHouseVersion = conf.version.parse()?;
    Ok(if version.major >= 22 { "clickhouse" } else { "yandex" })
}

fn write_shards(xml: &mut Xml, conf: &ClickHouseConfig, shards: &[Shard]) {
    for shard in shards {
        xml.open("shard");
        xml.leaf("internal_replication", shard.replicas.len() > 1);
        for replica in &shard.replicas {
            xml.open("replica")
                .leaf("host", &replica.ip)
                .leaf("port", conf.port)
                .leaf("user", &conf.user)
                .leaf("password", &conf.password)
                .close("replica");
        }
        xml.close("shard");
    }
}

/// 1-based shard index of `host` in the topology
fn shard_index(conf: &ClickHouseConfig, host: &str) -> Option<usize> {
    conf.shards
        .iter()
        .position(|shard| shard.replicas.iter().any(|r| r.ip == host))
        .map(|i| i + 1)
}

pub fn render_metrika(conf: &ClickHouseConfig, logic_peers: &[ClickHouseConfig], host: &str) -> Result<String> {
    let root = root_tag(conf)?;
    let shard = shard_index(conf, host)
        .ok_or_else(|| CkmanError::deploy(format!("host {} is not part of cluster {}", host, conf.cluster)))?;

    let mut xml = Xml::new(root);
    xml.open("remote_servers");
    xml.open(&conf.cluster);
    write_shards(&mut xml, conf, &conf.shards);
    xml.close(&conf.cluster);
    if let Some(logic) = &conf.logic_cluster {
        xml.open(logic);
        for peer in logic_peers.iter().filter(|p| p.cluster != conf.cluster) {
            // imported clusters may carry only a host list
            if peer.shards.is_empty() {
                write_shards(&mut xml, peer, &build_shards(&peer.hosts, false));
            } else {
                write_shards(&mut xml, peer, &peer.shards);
            }
        }
        write_shards(&mut xml, conf, &conf.shards);
        xml.close(logic);
    }
    xml.close("remote_servers");

    xml.open("zookeeper");
    for (i, node) in conf.zk_nodes.iter().enumerate() {
        xml.indent();
        xml.buf.push_str(&format!("<node index=\"{}\">\n", i + 1));
        xml.depth += 1;
        xml.leaf("host", node).leaf("port", conf.zk_port);
        xml.close("node");
    }
    xml.close("zookeeper");

    xml.open("macros")
        .leaf("cluster", &conf.cluster)
        .leaf("shard", shard)
        .leaf("replica", host)
        .close("macros");

    xml.open("distributed_ddl")
        .leaf("path", format!("/clickhouse/task_queue/ddl/{}", conf.cluster))
        .close("distributed_ddl");
    Ok(xml.finish(root))
}

pub fn render_custom(conf: &ClickHouseConfig) -> Result<String> {
    let root = root_tag(conf)?;
    let base = format!("{}clickhouse/", conf.path);
    let mut xml = Xml::new(root);
    xml.leaf("path", &base)
        .leaf("tmp_path", format!("{}tmp/", base))
        .leaf("user_files_path", format!("{}user_files/", base))
        .leaf("format_schema_path", format!("{}format_schemas/", base))
        .leaf("listen_host", "::")
        .leaf("tcp_port", conf.port)
        .leaf("http_port", conf.http_port);
    Ok(xml.finish(root))
}

fn write_disk(xml: &mut Xml, disk: &Disk) {
    xml.open(&disk.name);
    match disk.disk_type.as_str() {
        "local" => {
            if let Some(local) = &disk.local {
                xml.leaf("path", &local.path);
                if let Some(bytes) = local.keep_free_space_bytes {
                    xml.leaf("keep_free_space_bytes", bytes);
                }
            }
        }
        "hdfs" => {
            xml.leaf("type", "hdfs");
            if let Some(hdfs) = &disk.hdfs {
                xml.leaf("endpoint", &hdfs.endpoint);
            }
        }
        "s3" => {
            xml.leaf("type", "s3");
            if let Some(s3) = &disk.s3 {
                xml.leaf("endpoint", &s3.endpoint);
                if s3.use_environment_credentials {
                    xml.leaf("use_environment_credentials", true);
                } else {
                    xml.leaf("access_key_id", &s3.access_key_id)
                        .leaf("secret_access_key", &s3.secret_access_key);
                }
                if let Some(region) = &s3.region {
                    xml.leaf("region", region);
                }
            }
        }
        _ => {}
    }
    xml.close(&disk.name);
}

pub fn render_storage(conf: &ClickHouseConfig, storage: &Storage) -> Result<String> {
    let root = root_tag(conf)?;
    let mut xml = Xml::new(root);
    xml.open("storage_configuration");
    xml.open("disks");
    for disk in &storage.disks {
        write_disk(&mut xml, disk);
    }
    xml.close("disks");
    xml.open("policies");
    for policy in &storage.policies {
        xml.open(&policy.name);
        xml.open("volumes");
        for volume in &policy.volumes {
            xml.open(&volume.name);
            for disk in &volume.disks {
                xml.leaf("disk", disk);
            }
            if let Some(bytes) = volume.max_data_part_size_bytes {
                xml.leaf("max_data_part_size_bytes", bytes);
            }
            if let Some(prefer) = volume.prefer_not_to_merge {
                xml.leaf("prefer_not_to_merge", prefer);
            }
            xml.close(&volume.name);
        }
        xml.close("volumes");
        if let Some(factor) = policy.move_factor {
            xml.leaf("move_factor", factor);
        }
        xml.close(&policy.name);
    }
    xml.close("policies");
    xml.close("storage_configuration");
    Ok(xml.finish(root))
}

pub fn render_users(conf: &ClickHouseConfig) -> Result<String> {
    let root = root_tag(conf)?;
    let mut xml = Xml::new(root);
    xml.open("users");
    xml.open(DEFAULT_USER)
        .leaf("password_sha256_hex", sha256_hex(&conf.password))
        .close(DEFAULT_USER);
    for user in &conf.users_conf.users {
        xml.open(&user.name);
        xml.leaf("password_sha256_hex", sha256_hex(&user.password))
            .leaf("profile", user.profile.as_deref().unwrap_or("default"))
            .leaf("quota", user.quota.as_deref().unwrap_or("default"));
        xml.open("networks");
        if user.networks.is_empty() {
            xml.leaf("ip", "::/0");
        }
        for network in &user.networks {
            xml.leaf("ip", network);
        }
        xml.close("networks");
        xml.close(&user.name);
    }
    xml.close("users");
    Ok(xml.finish(root))
}

/// Every file the config phase writes to `host`
pub fn render_host_configs(
    conf: &ClickHouseConfig,
    logic_peers: &[ClickHouseConfig],
    host: &str,
) -> Result<Vec<ConfigFile>> {
    let mut files = vec![
        ConfigFile {
            path: format!("{}/metrika.xml", CONFIG_DIR),
            content: render_metrika(conf, logic_peers, host)?,
        },
        ConfigFile {
            path: format!("{}/custom.xml", CONFIG_DIR),
            content: render_custom(conf)?,
        },
        ConfigFile {
            path: format!("{}/users.xml", USERS_DIR),
            content: render_users(conf)?,
        },
    ];
    if let Some(storage) = &conf.storage {
        files.push(ConfigFile {
            path: format!("{}/storage.xml", CONFIG_DIR),
            content: render_storage(conf, storage)?,
        });
    }
    Ok(files)
}
