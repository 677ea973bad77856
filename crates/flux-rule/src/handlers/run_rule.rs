use crate::context::{ExecutionContext, Outputs};
use crate::handler::{ActionHandler, HandlerContext, ModuleHandler, ModuleHandlerCallback};
use crate::model::Module;
use anyhow::bail;
use async_trait::async_trait;
use flux_core::ExecutionSource;
use std::sync::Arc;
use tracing::{debug, warn};

pub const TYPE_UID: &str = "core.RunRuleAction";

/// 运行其他规则
///
/// 配置：`ruleUIDs`，`considerConditions`（默认 true）
pub struct RunRuleActionHandler {
    rule_uid: String,
    rule_uids: Vec<String>,
    consider_conditions: bool,
    callback: Arc<dyn ModuleHandlerCallback>,
}

pub fn create(module: &Module, rule_uid: &str, context: &HandlerContext) -> anyhow::Result<ModuleHandler> {
    let rule_uids = module.config_list("ruleUIDs");
    if rule_uids.is_empty() {
        bail!("Module '{}' is missing the 'ruleUIDs' configuration", module.id);
    }
    Ok(ModuleHandler::action(RunRuleActionHandler {
        rule_uid: rule_uid.to_string(),
        rule_uids,
        consider_conditions: module.config_bool("considerConditions").unwrap_or(true),
        callback: context.callback.clone(),
    }))
}

#[async_trait]
impl ActionHandler for RunRuleActionHandler {
    async fn execute(&self, context: &ExecutionContext) -> anyhow::Result<Option<Outputs>> {
        for uid in &self.rule_uids {
            if uid == &self.rule_uid {
                warn!(rule_uid = %self.rule_uid, "Rule cannot run itself, skipped");
                continue;
            }
            debug!(rule_uid = %self.rule_uid, target = %uid, "Running rule");
            if let Err(e) = self
                .callback
                .run_now(uid, self.consider_conditions, context.clone(), ExecutionSource::Script)
                .await
            {
                warn!(rule_uid = %self.rule_uid, target = %uid, error = %e, "Failed to run rule");
            }
        }
        Ok(None)
    }
}
