use serde::{Deserialize, Serialize};
use std::fmt;

use crate::deploy::Phase;

/// Stable result codes returned for every deployment attempt
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RetCode {
    Success,
    InvalidParams,
    InitPackageFail,
    PreparePackageFail,
    InstallPackageFail,
    ConfigPackageFail,
    StartPackageFail,
    CheckPackageFail,
    GetNacosConfigFail,
    PubNacosConfigFail,
}

impl RetCode {
    pub fn code(&self) -> &'static str {
        match self {
            RetCode::Success => "0000",
            RetCode::InvalidParams => "5000",
            RetCode::InitPackageFail => "5011",
            RetCode::PreparePackageFail => "5012",
            RetCode::InstallPackageFail => "5013",
            RetCode::ConfigPackageFail => "5014",
            RetCode::StartPackageFail => "5015",
            RetCode::CheckPackageFail => "5016",
            RetCode::GetNacosConfigFail => "5031",
            RetCode::PubNacosConfigFail => "5032",
        }
    }

    pub fn message(&self) -> &'static str {
        match self {
            RetCode::Success => "success",
            RetCode::InvalidParams => "invalid params",
            RetCode::InitPackageFail => "init package failed",
            RetCode::PreparePackageFail => "prepare package failed",
            RetCode::InstallPackageFail => "install package failed",
            RetCode::ConfigPackageFail => "config package failed",
            RetCode::StartPackageFail => "start package failed",
            RetCode::CheckPackageFail => "check package failed",
            RetCode::GetNacosConfigFail => "get remote config failed",
            RetCode::PubNacosConfigFail => "publish remote config failed",
        }
    }
}

impl From<Phase> for RetCode {
    fn from(phase: Phase) -> Self {
        match phase {
            Phase::Init => RetCode::InitPackageFail,
            Phase::Prepare => RetCode::PreparePackageFail,
            Phase::Install => RetCode::InstallPackageFail,
            Phase::Config => RetCode::ConfigPackageFail,
            Phase::Start => RetCode::StartPackageFail,
            Phase::Check => RetCode::CheckPackageFail,
        }
    }
}

impl fmt::Display for RetCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.code(), self.message())
    }
}

/// Outcome of one deployment request
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeployResponse {
    pub code: RetCode,
    pub message: String,
    /// Non-fatal problems, e.g. schema propagation that did not go through
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub warnings: Vec<String>,
}

impl DeployResponse {
    pub fn success(warnings: Vec<String>) -> Self {
        Self {
            code: RetCode::Success,
            message: RetCode::Success.message().to_string(),
            warnings,
        }
    }

    pub fn failure(code: RetCode, detail: impl fmt::Display) -> Self {
        Self {
            code,
            message: format!("{}: {}", code.message(), detail),
            warnings: Vec::new(),
        }
    }

    pub fn is_success(&self) -> bool {
        self.code == RetCode::Success
    }
}
