pub mod loader;

use anyhow::Result;
use flux_config::AutomationConfig;
use flux_core::EventBus;
use flux_rule::{Rule, RuleEngine};
use flux_scheduler::Scheduler;
use std::sync::Arc;
use tracing::{info, warn};

pub use loader::load_rules;

/// 运行时共享状态（供 main.rs 和测试使用）
pub struct AppState {
    pub event_bus: Arc<EventBus>,
    pub scheduler: Arc<Scheduler>,
    pub engine: Arc<RuleEngine>,
}

impl AppState {
    /// 按配置创建事件总线、调度器和规则引擎
    pub fn build(config: &AutomationConfig) -> Result<Self> {
        let event_bus = Arc::new(EventBus::new(config.engine.event_bus_capacity));
        let scheduler = Arc::new(Scheduler::new(&config.scheduler)?.with_event_bus(event_bus.clone()));
        let engine = RuleEngine::new(config.engine.clone(), scheduler.clone(), event_bus.clone());
        Ok(Self {
            event_bus,
            scheduler,
            engine,
        })
    }

    /// 注册规则，返回成功注册的数量；单条失败只记录日志
    pub async fn register_rules(&self, rules: Vec<Rule>) -> usize {
        let mut registered = 0;
        for rule in rules {
            let uid = rule.uid.clone();
            match self.engine.add_rule(rule).await {
                Ok(uid) => {
                    let status = self.engine.status_info(&uid).await.unwrap_or_default();
                    info!(rule_uid = %uid, status = %status, "Rule registered");
                    registered += 1;
                }
                Err(e) => warn!(rule_uid = %uid, error = %e, "Failed to register rule"),
            }
        }
        registered
    }

    /// 释放引擎并停止调度器
    pub async fn shutdown(&self) {
        self.engine.dispose().await;
        self.scheduler.shutdown();
        info!("Automation runtime stopped");
    }
}
