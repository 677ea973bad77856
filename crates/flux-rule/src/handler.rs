//! 模块处理器
//!
//! 每个模块在规则的一次激活期间绑定一个处理器：
//! - 触发器：注册回调，触发时把输出交给引擎
//! - 条件：`is_satisfied`
//! - 动作：`execute`，可返回输出

use crate::context::{ExecutionContext, Outputs};
use crate::error::Result as RuleResult;
use crate::model::ModuleKind;
use crate::status::RuleStatus;
use async_trait::async_trait;
use flux_core::{EventBus, ExecutionSource};
use flux_scheduler::{CronScheduler, Scheduler};
use flux_script::ScriptEngine;
use std::fmt;
use std::sync::Arc;

/// 触发器触发时的回调
#[async_trait]
pub trait TriggerCallback: Send + Sync {
    async fn triggered(&self, outputs: Outputs);
}

/// 触发器处理器
#[async_trait]
pub trait TriggerHandler: Send + Sync {
    /// 订阅事件源；失败时规则停留在 UNINITIALIZED
    async fn register(&self, callback: Arc<dyn TriggerCallback>) -> anyhow::Result<()>;

    /// 取消订阅
    async fn dispose(&self) {}
}

/// 条件处理器
#[async_trait]
pub trait ConditionHandler: Send + Sync {
    async fn is_satisfied(&self, context: &ExecutionContext) -> anyhow::Result<bool>;

    async fn dispose(&self) {}
}

/// 动作处理器
#[async_trait]
pub trait ActionHandler: Send + Sync {
    /// `Ok(None)` 表示没有产生输出
    async fn execute(&self, context: &ExecutionContext) -> anyhow::Result<Option<Outputs>>;

    async fn dispose(&self) {}
}

/// 处理器（按模块种类区分）
#[derive(Clone)]
pub enum ModuleHandler {
    Trigger(Arc<dyn TriggerHandler>),
    Condition(Arc<dyn ConditionHandler>),
    Action(Arc<dyn ActionHandler>),
}

impl ModuleHandler {
    pub fn trigger(handler: impl TriggerHandler + 'static) -> Self {
        Self::Trigger(Arc::new(handler))
    }

    pub fn condition(handler: impl ConditionHandler + 'static) -> Self {
        Self::Condition(Arc::new(handler))
    }

    pub fn action(handler: impl ActionHandler + 'static) -> Self {
        Self::Action(Arc::new(handler))
    }

    pub fn kind(&self) -> ModuleKind {
        match self {
            ModuleHandler::Trigger(_) => ModuleKind::Trigger,
            ModuleHandler::Condition(_) => ModuleKind::Condition,
            ModuleHandler::Action(_) => ModuleKind::Action,
        }
    }

    pub async fn dispose(&self) {
        match self {
            ModuleHandler::Trigger(h) => h.dispose().await,
            ModuleHandler::Condition(h) => h.dispose().await,
            ModuleHandler::Action(h) => h.dispose().await,
        }
    }
}

impl fmt::Debug for ModuleHandler {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ModuleHandler::{}", self.kind())
    }
}

/// 条件评估结果
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConditionOutcome {
    Satisfied,
    NotSatisfied,
    Failed(String),
}

impl ConditionOutcome {
    pub async fn evaluate(handler: &dyn ConditionHandler, context: &ExecutionContext) -> Self {
        match handler.is_satisfied(context).await {
            Ok(true) => ConditionOutcome::Satisfied,
            Ok(false) => ConditionOutcome::NotSatisfied,
            Err(e) => ConditionOutcome::Failed(format!("{:#}", e)),
        }
    }
}

/// 处理器访问引擎的入口（弱引用，不延长引擎生命周期）
#[async_trait]
pub trait ModuleHandlerCallback: Send + Sync {
    /// 规则不存在时为 None
    async fn is_enabled(&self, rule_uid: &str) -> Option<bool>;

    async fn set_enabled(&self, rule_uid: &str, enabled: bool) -> RuleResult<()>;

    async fn status(&self, rule_uid: &str) -> Option<RuleStatus>;

    async fn run_now(
        &self,
        rule_uid: &str,
        consider_conditions: bool,
        context: ExecutionContext,
        source: ExecutionSource,
    ) -> RuleResult<()>;
}

/// 创建处理器时可用的共享服务
#[derive(Clone)]
pub struct HandlerContext {
    pub callback: Arc<dyn ModuleHandlerCallback>,
    pub scheduler: Arc<Scheduler>,
    pub cron: Arc<CronScheduler>,
    pub event_bus: Arc<EventBus>,
    pub script_engine: Arc<ScriptEngine>,
}
