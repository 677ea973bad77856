use chrono::{DateTime, Utc};
use flux_core::ExecutionSource;
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use tokio::sync::RwLock;

/// 规则执行记录
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RuleExecution {
    pub id: String,
    pub rule_uid: String,
    /// 触发来源：触发器 ID，或 run_now 的来源
    pub source: String,
    pub started_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
    pub status: ExecutionStatus,
    pub error: Option<String>,
}

/// 执行状态
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExecutionStatus {
    Running,
    Success,
    /// 条件不满足或规则状态在执行中改变
    Skipped,
    Failed,
}

impl RuleExecution {
    pub fn start(rule_uid: &str, source: impl Into<String>) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            rule_uid: rule_uid.to_string(),
            source: source.into(),
            started_at: Utc::now(),
            finished_at: None,
            status: ExecutionStatus::Running,
            error: None,
        }
    }

    pub fn finish(&mut self, status: ExecutionStatus, error: Option<String>) {
        self.finished_at = Some(Utc::now());
        self.status = status;
        self.error = error;
    }
}

/// 触发来源描述
pub fn source_label(trigger_id: Option<&str>, source: Option<ExecutionSource>) -> String {
    match (trigger_id, source) {
        (Some(trigger), _) => format!("trigger:{}", trigger),
        (None, Some(source)) => source.to_string(),
        (None, None) => "unknown".to_string(),
    }
}

/// 有界执行历史（超出上限时丢弃最旧的记录）
pub struct ExecutionHistory {
    limit: usize,
    executions: RwLock<VecDeque<RuleExecution>>,
}

impl ExecutionHistory {
    pub fn new(limit: usize) -> Self {
        Self {
            limit: limit.max(1),
            executions: RwLock::new(VecDeque::new()),
        }
    }

    pub async fn record(&self, execution: RuleExecution) {
        let mut executions = self.executions.write().await;
        if let Some(existing) = executions.iter_mut().find(|e| e.id == execution.id) {
            *existing = execution;
            return;
        }
        executions.push_back(execution);
        while executions.len() > self.limit {
            executions.pop_front();
        }
    }

    /// 最新的在前
    pub async fn query(&self, rule_uid: Option<&str>, limit: usize) -> Vec<RuleExecution> {
        let executions = self.executions.read().await;
        // 按开始顺序记录，倒序即最新在前
        executions
            .iter()
            .rev()
            .filter(|e| rule_uid.map_or(true, |uid| e.rule_uid == uid))
            .take(limit)
            .cloned()
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_history_is_bounded_and_updatable() {
        let history = ExecutionHistory::new(2);
        let mut first = RuleExecution::start("r1", "API");
        history.record(first.clone()).await;
        first.finish(ExecutionStatus::Success, None);
        history.record(first.clone()).await;
        assert_eq!(history.query(None, 10).await.len(), 1);
        assert_eq!(history.query(None, 10).await[0].status, ExecutionStatus::Success);

        history.record(RuleExecution::start("r2", "API")).await;
        history.record(RuleExecution::start("r1", "script")).await;
        let all = history.query(None, 10).await;
        assert_eq!(all.len(), 2);
        assert!(all.iter().all(|e| e.id != first.id));
        assert_eq!(history.query(Some("r2"), 10).await.len(), 1);
    }

    #[test]
    fn test_source_label() {
        assert_eq!(source_label(Some("t1"), None), "trigger:t1");
        assert_eq!(source_label(None, Some(ExecutionSource::Api)), "API");
    }
}
