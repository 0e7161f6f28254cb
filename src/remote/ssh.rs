use async_trait::async_trait;
use std::path::Path;
use std::process::Stdio;
use std::time::Duration;
use tokio::io::AsyncWriteExt;
use tokio::process::Command;
use tracing::debug;

use super::{RemoteExecutor, SshOptions};
use crate::error::{CkmanError, Result};
use crate::hosts::bracket_ipv6;

/// Executor backed by the `ssh`/`scp` binaries. Password auth goes through
/// `sshpass -e`, which must be installed on the management host.
#[derive(Debug, Clone)]
pub struct SshExecutor {
    timeout: Duration,
    connect_timeout_secs: u64,
}

impl SshExecutor {
    pub fn new(timeout: Duration, connect_timeout_secs: u64) -> Self {
        Self { timeout, connect_timeout_secs }
    }

    fn base_command(&self, program: &str, opts: &SshOptions) -> Command {
        let mut cmd = match &opts.password {
            Some(password) => {
                let mut cmd = Command::new("sshpass");
                cmd.env("SSHPASS", password).arg("-e").arg(program);
                cmd
            }
            None => {
                let mut cmd = Command::new(program);
                cmd.arg("-o").arg("BatchMode=yes");
                cmd
            }
        };
        cmd.arg("-o")
            .arg("StrictHostKeyChecking=no")
            .arg("-o")
            .arg(format!("ConnectTimeout={}", self.connect_timeout_secs));
        cmd.kill_on_drop(true);
        cmd
    }

    async fn run(&self, mut cmd: Command, host: &str, stdin: Option<&str>) -> Result<String> {
        cmd.stdout(Stdio::piped()).stderr(Stdio::piped());
        cmd.stdin(if stdin.is_some() { Stdio::piped() } else { Stdio::null() });

        let mut child = cmd
            .spawn()
            .map_err(|e| CkmanError::remote(format!("{}: failed to spawn ssh client: {}", host, e)))?;
        if let (Some(input), Some(mut pipe)) = (stdin, child.stdin.take()) {
            pipe.write_all(input.as_bytes()).await?;
            pipe.shutdown().await?;
        }

        let output = tokio::time::timeout(self.timeout, child.wait_with_output())
            .await
            .map_err(|_| CkmanError::remote(format!("{}: command timed out after {:?}", host, self.timeout)))??;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(CkmanError::remote(format!(
                "{}: exit status {}: {}",
                host,
                output.status.code().unwrap_or(-1),
                stderr.trim()
            )));
        }
        Ok(String::from_utf8_lossy(&output.stdout).into_owned())
    }
}

/// `user@host:path` argument for scp, which needs IPv6 literals in brackets
fn scp_target(user: &str, host: &str, remote: &str) -> String {
    format!("{}@{}:{}", user, bracket_ipv6(host), remote)
}

#[async_trait]
impl RemoteExecutor for SshExecutor {
    async fn execute(&self, opts: &SshOptions, host: &str, cmd: &str) -> Result<String> {
        debug!("[{}] {}", host, cmd);
        let mut ssh = self.base_command("ssh", opts);
        ssh.arg("-p")
            .arg(opts.port.to_string())
            .arg(format!("{}@{}", opts.user, host))
            .arg(cmd);
        self.run(ssh, host, None).await
    }

    async fn copy_file(&self, opts: &SshOptions, host: &str, local: &Path, remote: &str) -> Result<()> {
        debug!("[{}] copy {} -> {}", host, local.display(), remote);
        let mut scp = self.base_command("scp", opts);
        scp.arg("-P")
            .arg(opts.port.to_string())
            .arg(local)
            .arg(scp_target(&opts.user, host, remote));
        self.run(scp, host, None).await.map(|_| ())
    }

    async fn write_file(&self, opts: &SshOptions, host: &str, remote: &str, content: &str) -> Result<()> {
        debug!("[{}] write {}", host, remote);
        let mut ssh = self.base_command("ssh", opts);
        ssh.arg("-p")
            .arg(opts.port.to_string())
            .arg(format!("{}@{}", opts.user, host))
            .arg(opts.privileged(&format!("cat > {}", remote)));
        self.run(ssh, host, Some(content)).await.map(|_| ())
    }
}
