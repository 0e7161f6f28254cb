//! Configuration Management
//!
//! Provides functionality for:
//! - Loading/saving the manager configuration (YAML)
//! - Default configuration

use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::debug;

use crate::error::CkmanError;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub level: String,
    /// Directory for the rolling JSON log files
    #[serde(default = "default_log_dir")]
    pub dir: PathBuf,
    /// Also log to the console
    #[serde(default = "default_true")]
    pub console: bool,
    /// Number of daily log files to keep
    #[serde(default = "default_log_files")]
    pub files_to_keep: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeployConfig {
    /// Local directory holding the ClickHouse rpm packages
    #[serde(default = "default_package_dir")]
    pub package_dir: PathBuf,
    /// Scratch directory on target hosts
    #[serde(default = "default_remote_dir")]
    pub remote_dir: String,
    /// Health check attempts before the check phase gives up
    #[serde(default = "default_check_retries")]
    pub check_retries: usize,
    /// Delay between health check attempts in seconds
    #[serde(default = "default_check_interval")]
    pub check_interval_secs: u64,
    /// Timeout for a single remote command in seconds
    #[serde(default = "default_ssh_timeout")]
    pub ssh_timeout_secs: u64,
    #[serde(default = "default_ssh_connect_timeout")]
    pub ssh_connect_timeout_secs: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RegistryConfig {
    /// Local snapshot of all managed clusters
    #[serde(default = "default_cluster_file")]
    pub cluster_file: PathBuf,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NacosConfig {
    /// Share cluster config with other manager instances through Nacos
    #[serde(default)]
    pub enabled: bool,
    #[serde(default = "default_nacos_addr")]
    pub addr: String,
    #[serde(default)]
    pub namespace: String,
    #[serde(default = "default_nacos_group")]
    pub group: String,
    #[serde(default = "default_nacos_data_id")]
    pub data_id: String,
    #[serde(default)]
    pub username: String,
    #[serde(default)]
    pub password: String,
    #[serde(default = "default_nacos_timeout")]
    pub timeout_secs: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClickHouseClientConfig {
    /// HTTP request timeout in seconds
    #[serde(default = "default_ck_timeout")]
    pub timeout_secs: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct CkmanConfig {
    #[serde(default)]
    pub logging: LoggingConfig,
    #[serde(default)]
    pub deploy: DeployConfig,
    #[serde(default)]
    pub registry: RegistryConfig,
    #[serde(default)]
    pub nacos: NacosConfig,
    #[serde(default)]
    pub clickhouse: ClickHouseClientConfig,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            dir: default_log_dir(),
            console: default_true(),
            files_to_keep: default_log_files(),
        }
    }
}

impl Default for DeployConfig {
    fn default() -> Self {
        Self {
            package_dir: default_package_dir(),
            remote_dir: default_remote_dir(),
            check_retries: default_check_retries(),
            check_interval_secs: default_check_interval(),
            ssh_timeout_secs: default_ssh_timeout(),
            ssh_connect_timeout_secs: default_ssh_connect_timeout(),
        }
    }
}

impl Default for RegistryConfig {
    fn default() -> Self {
        Self {
            cluster_file: default_cluster_file(),
        }
    }
}

impl Default for NacosConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            addr: default_nacos_addr(),
            namespace: String::new(),
            group: default_nacos_group(),
            data_id: default_nacos_data_id(),
            username: String::new(),
            password: String::new(),
            timeout_secs: default_nacos_timeout(),
        }
    }
}

impl Default for ClickHouseClientConfig {
    fn default() -> Self {
        Self {
            timeout_secs: default_ck_timeout(),
        }
    }
}

// Default value functions
fn default_log_level() -> String { "info".to_string() }
fn default_log_dir() -> PathBuf { PathBuf::from("logs") }
fn default_true() -> bool { true }
fn default_log_files() -> usize { 7 }
fn default_package_dir() -> PathBuf { PathBuf::from("package") }
fn default_remote_dir() -> String { "/tmp/ckman".to_string() }
fn default_check_retries() -> usize { 5 }
fn default_check_interval() -> u64 { 10 }
fn default_ssh_timeout() -> u64 { 300 }
fn default_ssh_connect_timeout() -> u64 { 10 }
fn default_cluster_file() -> PathBuf { PathBuf::from("conf/clusters.json") }
fn default_nacos_addr() -> String { "http://127.0.0.1:8848".to_string() }
fn default_nacos_group() -> String { "DEFAULT_GROUP".to_string() }
fn default_nacos_data_id() -> String { "ckman".to_string() }
fn default_nacos_timeout() -> u64 { 5 }
fn default_ck_timeout() -> u64 { 30 }

impl DeployConfig {
    pub fn check_interval(&self) -> Duration {
        Duration::from_secs(self.check_interval_secs)
    }
}

impl CkmanConfig {
    /// Load configuration from file, writing the defaults if it does not exist yet
    pub fn load(path: &Path) -> Result<Self, CkmanError> {
        if !path.exists() {
            debug!("Configuration file not found at {:?}, creating default", path);
            let config = CkmanConfig::default();
            config.save(path)?;
            return Ok(config);
        }

        let contents = fs::read_to_string(path)
            .map_err(|e| CkmanError::Config(format!("Failed to read config file: {}", e)))?;

        serde_yaml::from_str(&contents)
            .map_err(|e| CkmanError::Config(format!("Failed to parse config file: {}", e)))
    }

    /// Save configuration to file
    pub fn save(&self, path: &Path) -> Result<(), CkmanError> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)
                .map_err(|e| CkmanError::Config(format!("Failed to create config directory: {}", e)))?;
        }
        let yaml = serde_yaml::to_string(self)
            .map_err(|e| CkmanError::Config(format!("Failed to serialize config: {}", e)))?;

        // Write atomically using a temporary file
        let temp_path = path.with_extension("tmp");
        fs::write(&temp_path, yaml)
            .map_err(|e| CkmanError::Config(format!("Failed to write config: {}", e)))?;
        fs::rename(&temp_path, path)
            .map_err(|e| CkmanError::Config(format!("Failed to save config: {}", e)))?;
        Ok(())
    }

    /// Get configuration file path
    pub fn get_config_path() -> PathBuf {
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("ckman")
            .join("ckman.yml")
    }
}
