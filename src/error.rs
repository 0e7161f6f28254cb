use thiserror::Error;
use std::io;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum CkmanError {
    /// Rejected deployment request; nothing has been touched yet
    #[error("Invalid params: {0}")]
    InvalidParams(String),

    #[error("Remote execution error: {0}")]
    Remote(String),

    #[error("Deploy error: {0}")]
    Deploy(String),

    #[error("ClickHouse error: {0}")]
    ClickHouse(String),

    /// Fetching the remote config snapshot failed
    #[error("Config pull error: {0}")]
    SyncPull(String),

    /// Publishing the local snapshot failed; the local registry keeps the change
    #[error("Config push error: {0}")]
    SyncPush(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("IO error: {0}")]
    Io(String),

    #[error("JSON error: {0}")]
    Json(String),

    #[error("YAML error: {0}")]
    Yaml(String),

    #[error("HTTP error: {0}")]
    Http(String),
}

pub type Result<T> = std::result::Result<T, CkmanError>;

impl CkmanError {
    pub fn invalid_params(msg: impl Into<String>) -> Self {
        CkmanError::InvalidParams(msg.into())
    }

    pub fn remote(msg: impl Into<String>) -> Self {
        CkmanError::Remote(msg.into())
    }

    pub fn deploy(msg: impl Into<String>) -> Self {
        CkmanError::Deploy(msg.into())
    }

    pub fn clickhouse(msg: impl Into<String>) -> Self {
        CkmanError::ClickHouse(msg.into())
    }

    /// The message without the variant prefix
    pub fn detail(&self) -> &str {
        match self {
            CkmanError::InvalidParams(msg)
            | CkmanError::Remote(msg)
            | CkmanError::Deploy(msg)
            | CkmanError::ClickHouse(msg)
            | CkmanError::SyncPull(msg)
            | CkmanError::SyncPush(msg)
            | CkmanError::Config(msg)
            | CkmanError::Io(msg)
            | CkmanError::Json(msg)
            | CkmanError::Yaml(msg)
            | CkmanError::Http(msg) => msg,
        }
    }
}

impl From<io::Error> for CkmanError {
    fn from(e: io::Error) -> Self {
        CkmanError::Io(e.to_string())
    }
}

impl From<serde_json::Error> for CkmanError {
    fn from(e: serde_json::Error) -> Self {
        CkmanError::Json(e.to_string())
    }
}

impl From<serde_yaml::Error> for CkmanError {
    fn from(e: serde_yaml::Error) -> Self {
        CkmanError::Yaml(e.to_string())
    }
}

impl From<reqwest::Error> for CkmanError {
    fn from(e: reqwest::Error) -> Self {
        CkmanError::Http(e.to_string())
    }
}
