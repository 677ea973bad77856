use serde::{Deserialize, Serialize};
use std::fmt;

/// 规则状态
///
/// `UNINITIALIZED → INITIALIZING → IDLE ⇄ RUNNING`，`DISABLED` 可从任意状态进入。
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RuleStatus {
    Uninitialized,
    Initializing,
    Idle,
    Running,
    Disabled,
}

impl fmt::Display for RuleStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            RuleStatus::Uninitialized => "UNINITIALIZED",
            RuleStatus::Initializing => "INITIALIZING",
            RuleStatus::Idle => "IDLE",
            RuleStatus::Running => "RUNNING",
            RuleStatus::Disabled => "DISABLED",
        };
        f.write_str(name)
    }
}

/// 状态原因
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RuleStatusDetail {
    #[default]
    None,
    HandlerMissingError,
    HandlerInitializingError,
    InvalidRule,
    Disabled,
}

/// 状态 + 原因 + 描述
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RuleStatusInfo {
    pub status: RuleStatus,
    pub detail: RuleStatusDetail,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

impl RuleStatusInfo {
    pub fn new(status: RuleStatus) -> Self {
        Self {
            status,
            detail: RuleStatusDetail::None,
            description: None,
        }
    }

    pub fn with_detail(status: RuleStatus, detail: RuleStatusDetail, description: impl Into<String>) -> Self {
        Self {
            status,
            detail,
            description: Some(description.into()),
        }
    }

    pub fn disabled() -> Self {
        Self {
            status: RuleStatus::Disabled,
            detail: RuleStatusDetail::Disabled,
            description: None,
        }
    }
}

impl Default for RuleStatusInfo {
    fn default() -> Self {
        Self::new(RuleStatus::Uninitialized)
    }
}

impl fmt::Display for RuleStatusInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.status)?;
        if self.detail != RuleStatusDetail::None {
            write!(f, " ({:?})", self.detail)?;
        }
        if let Some(description) = &self.description {
            write!(f, ": {}", description)?;
        }
        Ok(())
    }
}
