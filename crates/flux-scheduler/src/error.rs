use thiserror::Error;

/// 调度器错误
#[derive(Debug, Error)]
pub enum SchedulerError {
    #[error("Failed to build scheduler runtime: {0}")]
    Runtime(#[from] std::io::Error),

    #[error("Invalid cron expression '{expression}': {reason}")]
    InvalidCron { expression: String, reason: String },

    #[error("Cron scheduler error: {0}")]
    Cron(String),

    #[error("Scheduler is closed")]
    Closed,
}

impl SchedulerError {
    pub fn invalid_cron(expression: impl Into<String>, reason: impl ToString) -> Self {
        Self::InvalidCron {
            expression: expression.into(),
            reason: reason.to_string(),
        }
    }

    pub fn cron(reason: impl ToString) -> Self {
        Self::Cron(reason.to_string())
    }
}

pub type Result<T> = std::result::Result<T, SchedulerError>;
