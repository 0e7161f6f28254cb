//! Deployment Pipeline
//!
//! A deployment walks a fixed sequence of phases:
//!
//! `Init -> Prepare -> Install -> Config -> Start -> Check`
//!
//! Every phase must succeed on all hosts before the next one starts. The
//! first failure ends the run and names its phase; nothing is rolled back.
//! Only `Check` retries, up to the budget handed to it.

pub mod ck;
pub mod render;
pub mod topology;
pub mod validate;

use async_trait::async_trait;
use futures::future::join_all;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::future::Future;
use tracing::info;

use crate::error::{CkmanError, Result};

pub use ck::{package_names, CkDeploy, DeployOptions};
pub use topology::build_shards;
pub use validate::check_deploy_params;

/// Health check attempts used by the standard workflow
pub const DEFAULT_CHECK_RETRIES: usize = 5;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Phase {
    Init,
    Prepare,
    Install,
    Config,
    Start,
    Check,
}

impl Phase {
    pub const ALL: [Phase; 6] = [
        Phase::Init,
        Phase::Prepare,
        Phase::Install,
        Phase::Config,
        Phase::Start,
        Phase::Check,
    ];
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Phase::Init => "init",
            Phase::Prepare => "prepare",
            Phase::Install => "install",
            Phase::Config => "config",
            Phase::Start => "start",
            Phase::Check => "check",
        };
        f.write_str(name)
    }
}

/// Terminal failure state of a pipeline run
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{phase} phase failed: {source}")]
pub struct PhaseFailure {
    pub phase: Phase,
    pub source: CkmanError,
}

/// One deployment target, driven phase by phase
#[async_trait]
pub trait Deploy: Send {
    async fn init(&mut self) -> Result<()>;
    async fn prepare(&mut self) -> Result<()>;
    async fn install(&mut self) -> Result<()>;
    async fn config(&mut self) -> Result<()>;
    async fn start(&mut self) -> Result<()>;
    /// Poll service health, at most `retries` times
    async fn check(&mut self, retries: usize) -> Result<()>;
}

/// Run every phase in order, stopping at the first failure
pub async fn deploy_package<D>(d: &mut D, check_retries: usize) -> std::result::Result<(), PhaseFailure>
where
    D: Deploy + ?Sized,
{
    for phase in Phase::ALL {
        info!("start {} phase", phase);
        let result = match phase {
            Phase::Init => d.init().await,
            Phase::Prepare => d.prepare().await,
            Phase::Install => d.install().await,
            Phase::Config => d.config().await,
            Phase::Start => d.start().await,
            Phase::Check => d.check(check_retries).await,
        };
        result.map_err(|source| PhaseFailure { phase, source })?;
    }
    Ok(())
}

/// Run `op` for every host concurrently; fails with the first host error in
/// host order once all hosts have finished.
pub async fn for_each_host<'a, F, Fut>(hosts: &'a [String], op: F) -> Result<()>
where
    F: Fn(&'a str) -> Fut,
    Fut: Future<Output = Result<()>>,
{
    let results = join_all(hosts.iter().map(|host| op(host.as_str()))).await;
    results.into_iter().collect()
}
