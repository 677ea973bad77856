use crate::context::{ExecutionContext, Outputs};
use crate::handler::{ActionHandler, HandlerContext, ModuleHandler};
use crate::model::Module;
use crate::reference;
use async_trait::async_trait;
use serde_json::json;
use tracing::info;

pub const TYPE_UID: &str = "core.LogAction";

/// 日志动作
///
/// 输出 `message`：配置的 `message` 模板（按上下文解析），未配置时为各输入的值。
pub struct LogActionHandler {
    rule_uid: String,
    module_id: String,
    message: Option<String>,
    inputs: Vec<String>,
}

pub fn create(module: &Module, rule_uid: &str, _context: &HandlerContext) -> anyhow::Result<ModuleHandler> {
    let mut inputs: Vec<String> = module.inputs.keys().cloned().collect();
    inputs.sort();
    Ok(ModuleHandler::action(LogActionHandler {
        rule_uid: rule_uid.to_string(),
        module_id: module.id.clone(),
        message: module.config_str("message").map(str::to_string),
        inputs,
    }))
}

#[async_trait]
impl ActionHandler for LogActionHandler {
    async fn execute(&self, context: &ExecutionContext) -> anyhow::Result<Option<Outputs>> {
        let message = match &self.message {
            Some(template) => reference::resolve_pattern(template, context)?,
            None => self
                .inputs
                .iter()
                .map(|name| match context.get(name) {
                    Some(value) => format!("{}={}", name, value),
                    None => format!("{}=<unset>", name),
                })
                .collect::<Vec<_>>()
                .join(", "),
        };

        info!(
            rule_uid = %self.rule_uid,
            module_id = %self.module_id,
            message = %message,
            "Log action"
        );
        Ok(Some(Outputs::from([("message".to_string(), json!(message))])))
    }
}
