pub mod cli;
pub mod clickhouse;
pub mod config;
pub mod deploy;
pub mod error;
pub mod hosts;
pub mod logging;
pub mod registry;
pub mod remote;
pub mod service;
pub mod types;
pub mod version;

// Re-export common types
pub use config::CkmanConfig;
pub use deploy::{deploy_package, Deploy, Phase, PhaseFailure};
pub use error::{CkmanError, Result};
pub use registry::{ClusterRegistry, ConfigSync};
pub use service::DeployService;
pub use types::{ClickHouseConfig, DeployResponse, RetCode};
