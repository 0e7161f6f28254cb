//! Remote command execution
//!
//! The deployment engine only needs three primitives from a remote host:
//! run a command and collect stdout, copy a local file over, and write a
//! small text file. `SshExecutor` provides them on top of the OpenSSH
//! client binaries.

mod ssh;

use async_trait::async_trait;
use std::path::Path;

use crate::error::Result;
use crate::types::{ClickHouseConfig, SshAuth};

pub use ssh::SshExecutor;

/// Credentials and port used to reach every host of one cluster
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SshOptions {
    pub user: String,
    pub password: Option<String>,
    pub port: u16,
}

impl SshOptions {
    pub fn from_config(conf: &ClickHouseConfig) -> Self {
        let password = match conf.auth_type {
            SshAuth::PublicKey => None,
            _ if conf.ssh_password.is_empty() => None,
            _ => Some(conf.ssh_password.clone()),
        };
        Self {
            user: conf.ssh_user.clone(),
            password,
            port: conf.ssh_port,
        }
    }

    /// Wrap a command so it runs with root privileges
    pub fn privileged(&self, cmd: &str) -> String {
        if self.user == "root" {
            cmd.to_string()
        } else {
            format!("sudo bash -c '{}'", cmd.replace('\'', r"'\''"))
        }
    }
}

#[async_trait]
pub trait RemoteExecutor: Send + Sync {
    /// Run `cmd` on `host`; a non-zero exit status is an error
    async fn execute(&self, opts: &SshOptions, host: &str, cmd: &str) -> Result<String>;

    async fn copy_file(&self, opts: &SshOptions, host: &str, local: &Path, remote: &str) -> Result<()>;

    async fn write_file(&self, opts: &SshOptions, host: &str, remote: &str, content: &str) -> Result<()>;
}
