use crate::context::Outputs;
use crate::handler::{HandlerContext, ModuleHandler, TriggerCallback, TriggerHandler};
use crate::model::Module;
use anyhow::anyhow;
use async_trait::async_trait;
use flux_scheduler::{cron_callback, CronScheduler};
use serde_json::json;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};
use uuid::Uuid;

pub const TYPE_UID: &str = "timer.GenericCronTrigger";

/// Cron 触发器
///
/// 配置：`cronExpression`（6 段，秒在最前）
pub struct CronTriggerHandler {
    module_id: String,
    rule_uid: String,
    expression: String,
    cron: Arc<CronScheduler>,
    job: Mutex<Option<Uuid>>,
}

pub fn create(module: &Module, rule_uid: &str, context: &HandlerContext) -> anyhow::Result<ModuleHandler> {
    let expression = module
        .config_str("cronExpression")
        .ok_or_else(|| anyhow!("Module '{}' is missing the 'cronExpression' configuration", module.id))?;
    CronScheduler::validate(expression)?;

    Ok(ModuleHandler::trigger(CronTriggerHandler {
        module_id: module.id.clone(),
        rule_uid: rule_uid.to_string(),
        expression: expression.to_string(),
        cron: context.cron.clone(),
        job: Mutex::new(None),
    }))
}

#[async_trait]
impl TriggerHandler for CronTriggerHandler {
    async fn register(&self, callback: Arc<dyn TriggerCallback>) -> anyhow::Result<()> {
        let job = self
            .cron
            .add(
                &self.expression,
                cron_callback(move |at| {
                    let callback = callback.clone();
                    async move {
                        let outputs = Outputs::from([("event".to_string(), json!(at.to_rfc3339()))]);
                        callback.triggered(outputs).await;
                    }
                }),
            )
            .await?;

        *self.job.lock().await = Some(job);
        info!(
            rule_uid = %self.rule_uid,
            module_id = %self.module_id,
            cron = %self.expression,
            "Schedule trigger registered"
        );
        Ok(())
    }

    async fn dispose(&self) {
        if let Some(job) = self.job.lock().await.take() {
            if let Err(e) = self.cron.remove(&job).await {
                warn!(module_id = %self.module_id, error = %e, "Failed to remove cron job");
            } else {
                debug!(module_id = %self.module_id, "Cron job removed");
            }
        }
    }
}
