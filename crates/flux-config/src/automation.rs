use serde::{Deserialize, Serialize};

/// 自动化引擎全局配置
#[derive(Debug, Clone, Default, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct AutomationConfig {
    pub engine: EngineConfig,
    pub scheduler: SchedulerConfig,
    pub logging: LoggingConfig,
}

/// 规则运行中再次触发时的处理策略
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ConcurrencyPolicy {
    /// 丢弃（记录日志）
    #[default]
    Drop,
    /// 排队等待上一次执行结束
    Queue,
}

/// 引擎配置
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct EngineConfig {
    pub concurrency_policy: ConcurrencyPolicy,
    /// 执行历史保留条数
    pub execution_history_limit: usize,
    /// 事件总线容量
    pub event_bus_capacity: usize,
    /// 重新初始化规则前的延迟（毫秒）
    pub rule_init_delay_ms: u64,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            concurrency_policy: ConcurrencyPolicy::Drop,
            execution_history_limit: 1000,
            event_bus_capacity: 1024,
            rule_init_delay_ms: 500,
        }
    }
}

/// 调度器配置
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct SchedulerConfig {
    /// 专用线程池大小
    pub worker_threads: usize,
    pub thread_name: String,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            worker_threads: 2,
            thread_name: "flux-scheduler".to_string(),
        }
    }
}

/// 日志配置
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct LoggingConfig {
    pub level: String,
    pub json: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            json: false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_automation_config() {
        let config = AutomationConfig::default();
        assert_eq!(config.engine.concurrency_policy, ConcurrencyPolicy::Drop);
        assert_eq!(config.engine.execution_history_limit, 1000);
        assert_eq!(config.scheduler.worker_threads, 2);
        assert_eq!(config.logging.level, "info");
    }

    #[test]
    fn test_partial_toml_keeps_defaults() {
        let config: AutomationConfig = toml::from_str(
            r#"
[engine]
concurrency_policy = "queue"
"#,
        )
        .unwrap();
        assert_eq!(config.engine.concurrency_policy, ConcurrencyPolicy::Queue);
        assert_eq!(config.engine.event_bus_capacity, 1024);
        assert_eq!(config.scheduler, SchedulerConfig::default());
    }
}
