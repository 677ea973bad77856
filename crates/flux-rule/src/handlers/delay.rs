use crate::context::{ExecutionContext, Outputs};
use crate::handler::{ActionHandler, HandlerContext, ModuleHandler, ModuleHandlerCallback};
use crate::model::Module;
use anyhow::anyhow;
use async_trait::async_trait;
use chrono::Utc;
use flux_core::ExecutionSource;
use flux_scheduler::{task, Scheduler, Timer};
use serde_json::json;
use std::sync::{Arc, Mutex};
use tracing::debug;

pub const TYPE_UID: &str = "timer.DelayAction";

/// 延迟运行规则
///
/// 配置：`delayMs`，`ruleUID`。每次执行都把同一个定时器重新调度到 `now + delayMs`，
/// 所以连续触发只会在最后一次之后运行一次。
pub struct DelayActionHandler {
    rule_uid: String,
    module_id: String,
    target: String,
    delay: chrono::Duration,
    scheduler: Arc<Scheduler>,
    callback: Arc<dyn ModuleHandlerCallback>,
    timer: Mutex<Option<Timer>>,
    /// 最近一次执行的上下文，定时器触发时传给目标规则
    latest: Arc<Mutex<ExecutionContext>>,
}

pub fn create(module: &Module, rule_uid: &str, context: &HandlerContext) -> anyhow::Result<ModuleHandler> {
    let delay_ms = module
        .config_u64("delayMs")
        .ok_or_else(|| anyhow!("Module '{}' is missing the 'delayMs' configuration", module.id))?;
    let target = module
        .config_str("ruleUID")
        .ok_or_else(|| anyhow!("Module '{}' is missing the 'ruleUID' configuration", module.id))?;

    Ok(ModuleHandler::action(DelayActionHandler {
        rule_uid: rule_uid.to_string(),
        module_id: module.id.clone(),
        target: target.to_string(),
        delay: chrono::Duration::milliseconds(i64::try_from(delay_ms)?),
        scheduler: context.scheduler.clone(),
        callback: context.callback.clone(),
        timer: Mutex::new(None),
        latest: Arc::new(Mutex::new(ExecutionContext::new())),
    }))
}

impl DelayActionHandler {
    fn new_timer(&self, at: chrono::DateTime<Utc>) -> Timer {
        let callback = self.callback.clone();
        let target = self.target.clone();
        let latest = self.latest.clone();
        self.scheduler.schedule_named(
            format!("{}.{}", self.rule_uid, self.module_id),
            task(move || {
                let callback = callback.clone();
                let target = target.clone();
                let context = latest.lock().map(|c| c.clone()).unwrap_or_default();
                async move {
                    callback
                        .run_now(&target, true, context, ExecutionSource::Script)
                        .await?;
                    Ok(())
                }
            }),
            at,
        )
    }
}

#[async_trait]
impl ActionHandler for DelayActionHandler {
    async fn execute(&self, context: &ExecutionContext) -> anyhow::Result<Option<Outputs>> {
        if let Ok(mut latest) = self.latest.lock() {
            *latest = context.clone();
        }

        let at = Utc::now()
            .checked_add_signed(self.delay)
            .ok_or_else(|| anyhow!("Delay of {}ms is out of range", self.delay.num_milliseconds()))?;
        let mut timer = self
            .timer
            .lock()
            .map_err(|_| anyhow!("Delay timer lock poisoned"))?;
        match timer.as_ref() {
            Some(existing) => {
                if !existing.reschedule(at) {
                    return Err(anyhow!("Scheduler is closed"));
                }
            }
            None => *timer = Some(self.new_timer(at)),
        }

        debug!(rule_uid = %self.rule_uid, module_id = %self.module_id, at = %at, "Delay scheduled");
        Ok(Some(Outputs::from([("scheduledAt".to_string(), json!(at.to_rfc3339()))])))
    }

    async fn dispose(&self) {
        let timer = self.timer.lock().ok().and_then(|mut timer| timer.take());
        if let Some(timer) = timer {
            timer.cancel();
        }
    }
}
