#![allow(dead_code)]

use async_trait::async_trait;
use parking_lot::Mutex;
use serde_json::json;
use std::collections::HashSet;
use std::path::Path;
use std::sync::Arc;

use ckman_core::clickhouse::{ClickHouseConnection, ClickHouseConnector, ConnectOptions, Row};
use ckman_core::config::DeployConfig;
use ckman_core::deploy::package_names;
use ckman_core::registry::{ClusterRegistry, ConfigSync, MemoryConfigStore, RemoteConfigStore};
use ckman_core::remote::{RemoteExecutor, SshOptions};
use ckman_core::types::ClickHouseConfig;
use ckman_core::{CkmanError, DeployService, Result};

pub const VERSION: &str = "21.9.3.30";

/// Records every remote call. Commands containing `fail_on` fail, and the
/// access check prints `1` on denied hosts.
#[derive(Default)]
pub struct MockExecutor {
    pub commands: Mutex<Vec<(String, String)>>,
    pub copied: Mutex<Vec<(String, String)>>,
    pub written: Mutex<Vec<(String, String, String)>>,
    fail_on: Mutex<Option<String>>,
    denied: Mutex<HashSet<String>>,
}

impl MockExecutor {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn fail_on(&self, pattern: &str) {
        *self.fail_on.lock() = Some(pattern.to_string());
    }

    pub fn deny_access(&self, host: &str) {
        self.denied.lock().insert(host.to_string());
    }

    pub fn commands_matching(&self, pattern: &str) -> Vec<(String, String)> {
        self.commands
            .lock()
            .iter()
            .filter(|(_, cmd)| cmd.contains(pattern))
            .cloned()
            .collect()
    }

    /// Total calls that change state on a host
    pub fn side_effects(&self) -> usize {
        self.copied.lock().len()
            + self.written.lock().len()
            + self.commands.lock().iter().filter(|(_, c)| !c.contains("su sshd")).count()
    }
}

#[async_trait]
impl RemoteExecutor for MockExecutor {
    async fn execute(&self, _opts: &SshOptions, host: &str, cmd: &str) -> Result<String> {
        self.commands.lock().push((host.to_string(), cmd.to_string()));
        if let Some(pattern) = self.fail_on.lock().as_deref() {
            if cmd.contains(pattern) {
                return Err(CkmanError::remote(format!("{}: exit status 1", host)));
            }
        }
        if cmd.contains("su sshd") {
            let out = if self.denied.lock().contains(host) { "1\n" } else { "0\n" };
            return Ok(out.to_string());
        }
        if cmd == "hostname -f" {
            return Ok(format!("ck-{}\n", host));
        }
        Ok(String::new())
    }

    async fn copy_file(&self, _opts: &SshOptions, host: &str, _local: &Path, remote: &str) -> Result<()> {
        self.copied.lock().push((host.to_string(), remote.to_string()));
        Ok(())
    }

    async fn write_file(&self, _opts: &SshOptions, host: &str, remote: &str, content: &str) -> Result<()> {
        self.written
            .lock()
            .push((host.to_string(), remote.to_string(), content.to_string()));
        Ok(())
    }
}

#[derive(Default)]
struct ServerState {
    down: HashSet<String>,
    distributed: Vec<Row>,
    locals: Vec<(String, String, String)>,
    failing_statement: Option<String>,
    executed: Vec<(String, String)>,
}

/// Fake ClickHouse servers sharing one catalog
#[derive(Default, Clone)]
pub struct MockConnector {
    state: Arc<Mutex<ServerState>>,
}

impl MockConnector {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn take_down(&self, host: &str) {
        self.state.lock().down.insert(host.to_string());
    }

    pub fn fail_statement(&self, pattern: &str) {
        self.state.lock().failing_statement = Some(pattern.to_string());
    }

    pub fn add_local(&self, database: &str, name: &str, engine: &str) {
        let ddl = format!(
            "CREATE TABLE {}.{} (`id` UInt64, `ts` DateTime) ENGINE = {} ORDER BY id",
            database, name, engine
        );
        self.state
            .lock()
            .locals
            .push((database.to_string(), name.to_string(), ddl));
    }

    pub fn add_distributed(&self, database: &str, name: &str, logic: &str, local_db: &str, local_table: &str) {
        let engine_full = format!("Distributed('{}', '{}', '{}', rand())", logic, local_db, local_table);
        let row = json!({
            "database": database,
            "name": name,
            "create_table_query": format!(
                "CREATE TABLE {}.{} (`id` UInt64, `ts` DateTime) ENGINE = {}",
                database, name, engine_full
            ),
            "engine_full": engine_full,
        });
        if let Some(row) = row.as_object() {
            self.state.lock().distributed.push(row.clone());
        }
    }

    pub fn executed(&self) -> Vec<(String, String)> {
        self.state.lock().executed.clone()
    }
}

#[async_trait]
impl ClickHouseConnector for MockConnector {
    async fn connect(&self, opts: &ConnectOptions) -> Result<Box<dyn ClickHouseConnection>> {
        if self.state.lock().down.contains(&opts.host) {
            return Err(CkmanError::clickhouse(format!("{}: connection refused", opts.host)));
        }
        Ok(Box::new(MockConnection {
            host: opts.host.clone(),
            state: self.state.clone(),
        }))
    }
}

struct MockConnection {
    host: String,
    state: Arc<Mutex<ServerState>>,
}

#[async_trait]
impl ClickHouseConnection for MockConnection {
    async fn ping(&self) -> Result<()> {
        Ok(())
    }

    async fn execute(&self, statement: &str) -> Result<()> {
        let mut state = self.state.lock();
        if let Some(pattern) = state.failing_statement.as_deref() {
            if statement.contains(pattern) {
                return Err(CkmanError::clickhouse(format!("{}: Code: 62. Syntax error", self.host)));
            }
        }
        state.executed.push((self.host.clone(), statement.to_string()));
        Ok(())
    }

    async fn query(&self, statement: &str) -> Result<Vec<Row>> {
        let state = self.state.lock();
        if statement.contains("engine = 'Distributed'") {
            return Ok(state.distributed.clone());
        }
        let rows: Vec<Row> = state
            .locals
            .iter()
            .filter(|(db, name, _)| {
                statement.contains(&format!("database = '{}'", db)) && statement.contains(&format!("name = '{}'", name))
            })
            .filter_map(|(_, _, ddl)| json!({ "create_table_query": ddl }).as_object().cloned())
            .collect();
        Ok(rows)
    }
}

pub fn cluster_conf(name: &str, hosts: &[&str], replicated: bool) -> ClickHouseConfig {
    let mut conf: ClickHouseConfig = serde_yaml::from_str(&format!(
        r#"
cluster: {}
version: {}
hosts: []
zk_nodes: [192.168.0.100, 192.168.0.101, 192.168.0.102]
password: ck_pass
ssh_user: root
ssh_password: ssh_pass
path: /data01/
"#,
        name, VERSION
    ))
    .unwrap();
    conf.hosts = hosts.iter().map(|h| h.to_string()).collect();
    conf.is_replica = replicated;
    conf
}

pub fn package_dir() -> tempfile::TempDir {
    let dir = tempfile::tempdir().unwrap();
    for name in package_names(VERSION) {
        std::fs::write(dir.path().join(name), b"rpm").unwrap();
    }
    dir
}

pub struct Harness {
    pub service: DeployService,
    pub executor: Arc<MockExecutor>,
    pub connector: Arc<MockConnector>,
    pub store: Arc<MemoryConfigStore>,
    pub workdir: tempfile::TempDir,
    pub packages: tempfile::TempDir,
}

impl Harness {
    pub fn new() -> Self {
        Self::with_store(Arc::new(MemoryConfigStore::new()))
    }

    pub fn with_store(store: Arc<MemoryConfigStore>) -> Self {
        let workdir = tempfile::tempdir().unwrap();
        let packages = package_dir();
        let executor = MockExecutor::new();
        let connector = MockConnector::new();
        let registry = Arc::new(ClusterRegistry::open(workdir.path().join("clusters.json")).unwrap());
        let remote: Arc<dyn RemoteConfigStore> = store.clone();
        let sync = Arc::new(ConfigSync::new(registry, remote));
        let config = DeployConfig {
            package_dir: packages.path().to_path_buf(),
            check_interval_secs: 0,
            ..Default::default()
        };
        let service = DeployService::new(config, sync, executor.clone(), connector.clone());
        Self { service, executor, connector, store, workdir, packages }
    }

    pub fn registry(&self) -> &ClusterRegistry {
        self.service.registry()
    }
}
