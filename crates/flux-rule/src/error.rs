use crate::reference::ReferenceError;
use crate::status::RuleStatus;
use thiserror::Error;

/// 规则引擎错误
#[derive(Debug, Error)]
pub enum RuleError {
    #[error("Rule not found: {0}")]
    NotFound(String),

    #[error("Rule already exists: {0}")]
    AlreadyExists(String),

    #[error("Invalid rule '{uid}': {reason}")]
    Invalid { uid: String, reason: String },

    #[error("Rule '{uid}' is not idle (status: {status})")]
    NotIdle { uid: String, status: RuleStatus },

    #[error("Rule engine has been disposed")]
    Disposed,

    #[error(transparent)]
    Reference(#[from] ReferenceError),
}

impl RuleError {
    pub fn invalid(uid: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::Invalid {
            uid: uid.into(),
            reason: reason.into(),
        }
    }
}

pub type Result<T> = std::result::Result<T, RuleError>;
