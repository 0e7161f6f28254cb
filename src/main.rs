use anyhow::Result;
use clap::Parser;
use tracing::error;

use ckman_core::cli::{Cli, CliHandler};
use ckman_core::config::CkmanConfig;
use ckman_core::logging;
use ckman_core::service::DeployService;

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let config_path = cli.config.clone().unwrap_or_else(CkmanConfig::get_config_path);
    let config = CkmanConfig::load(&config_path)?;
    logging::init(&config.logging)?;

    let handler = CliHandler::new(DeployService::from_config(&config)?);
    let result = handler.handle(cli.command).await;
    if let Err(e) = handler.service().registry().flush() {
        error!("failed to write cluster file: {}", e);
    }
    result?;
    Ok(())
}
