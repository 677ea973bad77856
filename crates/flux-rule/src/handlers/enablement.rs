use crate::context::{ExecutionContext, Outputs};
use crate::handler::{ActionHandler, HandlerContext, ModuleHandler, ModuleHandlerCallback};
use crate::model::Module;
use anyhow::{anyhow, bail};
use async_trait::async_trait;
use std::sync::Arc;
use tracing::{info, warn};

pub const TYPE_UID: &str = "core.RuleEnablementAction";

/// 启用/禁用规则
///
/// 配置：`ruleUIDs`，`enable`
pub struct RuleEnablementActionHandler {
    rule_uids: Vec<String>,
    enable: bool,
    callback: Arc<dyn ModuleHandlerCallback>,
}

pub fn create(module: &Module, _rule_uid: &str, context: &HandlerContext) -> anyhow::Result<ModuleHandler> {
    let rule_uids = module.config_list("ruleUIDs");
    if rule_uids.is_empty() {
        bail!("Module '{}' is missing the 'ruleUIDs' configuration", module.id);
    }
    let enable = module
        .config_bool("enable")
        .ok_or_else(|| anyhow!("Module '{}' is missing the 'enable' configuration", module.id))?;

    Ok(ModuleHandler::action(RuleEnablementActionHandler {
        rule_uids,
        enable,
        callback: context.callback.clone(),
    }))
}

#[async_trait]
impl ActionHandler for RuleEnablementActionHandler {
    async fn execute(&self, _context: &ExecutionContext) -> anyhow::Result<Option<Outputs>> {
        for uid in &self.rule_uids {
            match self.callback.set_enabled(uid, self.enable).await {
                Ok(()) => info!(target_rule = %uid, enable = self.enable, "Rule enablement changed"),
                Err(e) => warn!(target_rule = %uid, error = %e, "Failed to change rule enablement"),
            }
        }
        Ok(None)
    }
}
