//! ClickHouse access
//!
//! Provides:
//! - Connection traits used by the health check and schema propagation
//! - An implementation over the ClickHouse HTTP interface
//! - Logical-cluster schema extraction and replay (`schema`)

pub mod schema;

use async_trait::async_trait;
use serde_json::{Map, Value};
use std::time::Duration;
use tracing::debug;

use crate::error::{CkmanError, Result};
use crate::hosts::bracket_ipv6;
use crate::types::ClickHouseConfig;

pub type Row = Map<String, Value>;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectOptions {
    pub host: String,
    pub port: u16,
    pub database: String,
    pub user: String,
    pub password: String,
}

impl ConnectOptions {
    pub fn for_host(conf: &ClickHouseConfig, host: &str, database: &str) -> Self {
        Self {
            host: host.to_string(),
            port: conf.http_port,
            database: database.to_string(),
            user: conf.user.clone(),
            password: conf.password.clone(),
        }
    }
}

#[async_trait]
pub trait ClickHouseConnection: Send + Sync {
    async fn ping(&self) -> Result<()>;

    async fn execute(&self, statement: &str) -> Result<()>;

    /// Run a SELECT and return its rows as JSON objects
    async fn query(&self, statement: &str) -> Result<Vec<Row>>;
}

#[async_trait]
pub trait ClickHouseConnector: Send + Sync {
    /// Open a connection and verify it with a ping
    async fn connect(&self, opts: &ConnectOptions) -> Result<Box<dyn ClickHouseConnection>>;
}

/// Connector speaking the HTTP interface (port 8123 by default)
#[derive(Debug, Clone)]
pub struct HttpConnector {
    client: reqwest::Client,
}

impl HttpConnector {
    pub fn new(timeout: Duration) -> Result<Self> {
        let client = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self { client })
    }
}

#[async_trait]
impl ClickHouseConnector for HttpConnector {
    async fn connect(&self, opts: &ConnectOptions) -> Result<Box<dyn ClickHouseConnection>> {
        let conn = HttpConnection {
            client: self.client.clone(),
            base_url: format!("http://{}:{}", bracket_ipv6(&opts.host), opts.port),
            opts: opts.clone(),
        };
        conn.ping().await?;
        Ok(Box::new(conn))
    }
}

struct HttpConnection {
    client: reqwest::Client,
    base_url: String,
    opts: ConnectOptions,
}

impl HttpConnection {
    async fn post(&self, statement: &str) -> Result<String> {
        debug!("[{}] {}", self.opts.host, statement);
        let resp = self
            .client
            .post(format!("{}/", self.base_url))
            .query(&[("database", self.opts.database.as_str())])
            .header("X-ClickHouse-User", &self.opts.user)
            .header("X-ClickHouse-Key", &self.opts.password)
            .body(statement.to_string())
            .send()
            .await
            .map_err(|e| CkmanError::clickhouse(format!("{}: {}", self.opts.host, e)))?;

        let status = resp.status();
        let body = resp.text().await?;
        if !status.is_success() {
            return Err(CkmanError::clickhouse(format!(
                "{}: {} {}",
                self.opts.host,
                status,
                body.trim()
            )));
        }
        Ok(body)
    }
}

#[async_trait]
impl ClickHouseConnection for HttpConnection {
    async fn ping(&self) -> Result<()> {
        let resp = self
            .client
            .get(format!("{}/ping", self.base_url))
            .send()
            .await
            .map_err(|e| CkmanError::clickhouse(format!("{}: {}", self.opts.host, e)))?;
        if !resp.status().is_success() {
            return Err(CkmanError::clickhouse(format!(
                "{}: ping returned {}",
                self.opts.host,
                resp.status()
            )));
        }
        Ok(())
    }

    async fn execute(&self, statement: &str) -> Result<()> {
        self.post(statement).await.map(|_| ())
    }

    async fn query(&self, statement: &str) -> Result<Vec<Row>> {
        let body = self
            .post(&format!("{} FORMAT JSONEachRow", statement.trim_end_matches(';')))
            .await?;
        parse_json_each_row(&body)
    }
}

fn parse_json_each_row(body: &str) -> Result<Vec<Row>> {
    body.lines()
        .filter(|line| !line.trim().is_empty())
        .map(|line| serde_json::from_str::<Row>(line).map_err(Into::into))
        .collect()
}

/// First replica, in shard/replica order, that accepts a connection
pub async fn first_available_host(
    conf: &ClickHouseConfig,
    connector: &dyn ClickHouseConnector,
) -> Option<String> {
    for host in conf.replica_hosts() {
        let opts = ConnectOptions::for_host(conf, host, crate::types::DEFAULT_DATABASE);
        match connector.connect(&opts).await {
            Ok(_) => return Some(host.to_string()),
            Err(e) => debug!("host {} of cluster {} unavailable: {}", host, conf.cluster, e),
        }
    }
    None
}
