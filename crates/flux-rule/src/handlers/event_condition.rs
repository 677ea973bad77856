use crate::context::ExecutionContext;
use crate::handler::{ConditionHandler, HandlerContext, ModuleHandler};
use crate::model::Module;
use async_trait::async_trait;
use regex::Regex;
use serde_json::Value;
use tracing::debug;

pub const TYPE_UID: &str = "core.GenericEventCondition";

/// 事件条件
///
/// 检查输入 `event`（事件触发器的输出）。配置 `topic`、`source` 支持 `*` 和 `?` 通配，
/// `payload` 是在负载文本中查找的正则。未配置的项不参与判断。
pub struct EventConditionHandler {
    module_id: String,
    topic: Option<Regex>,
    source: Option<Regex>,
    payload: Option<Regex>,
}

pub fn create(module: &Module, _rule_uid: &str, _context: &HandlerContext) -> anyhow::Result<ModuleHandler> {
    Ok(ModuleHandler::condition(EventConditionHandler {
        module_id: module.id.clone(),
        topic: module.config_str("topic").map(wildcard).transpose()?,
        source: module.config_str("source").map(wildcard).transpose()?,
        payload: module.config_str("payload").map(Regex::new).transpose()?,
    }))
}

/// `*` 匹配任意字符序列，`?` 匹配单个字符，整体匹配
fn wildcard(pattern: &str) -> Result<Regex, regex::Error> {
    let escaped = regex::escape(pattern).replace(r"\*", ".*").replace(r"\?", ".");
    Regex::new(&format!("^{}$", escaped))
}

fn text(value: Option<&Value>) -> Option<String> {
    match value? {
        Value::Null => None,
        Value::String(s) => Some(s.clone()),
        other => Some(other.to_string()),
    }
}

fn matches(pattern: &Option<Regex>, value: Option<String>) -> bool {
    match pattern {
        Some(pattern) => value.is_some_and(|v| pattern.is_match(&v)),
        None => true,
    }
}

#[async_trait]
impl ConditionHandler for EventConditionHandler {
    async fn is_satisfied(&self, context: &ExecutionContext) -> anyhow::Result<bool> {
        let Some(event) = context.get("event") else {
            debug!(module_id = %self.module_id, "Event condition has no event input");
            return Ok(false);
        };

        Ok(matches(&self.topic, text(event.get("topic")))
            && matches(&self.source, text(event.get("source")))
            && matches(&self.payload, text(event.get("payload"))))
    }
}
