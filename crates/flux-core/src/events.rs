//! 自动化相关的总线事件
//!
//! 引擎只负责发布，日志/REST 等下游负责消费。

use flux_types::message::Message;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::fmt;

pub const RULES_TOPIC_PREFIX: &str = "flux/rules/";
pub const EXECUTION_TOPIC_PREFIX: &str = "flux/execution/";
pub const TIMERS_TOPIC_PREFIX: &str = "flux/timers/";

/// 执行触发来源
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ExecutionSource {
    #[serde(rename = "script")]
    Script,
    #[serde(rename = "API")]
    Api,
}

impl fmt::Display for ExecutionSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ExecutionSource::Script => f.write_str("script"),
            ExecutionSource::Api => f.write_str("API"),
        }
    }
}

pub fn rule_status_topic(rule_uid: &str) -> String {
    format!("{RULES_TOPIC_PREFIX}{rule_uid}/state")
}

pub fn execution_topic(rule_uid: &str) -> String {
    format!("{EXECUTION_TOPIC_PREFIX}{rule_uid}/triggered")
}

pub fn timer_topic(identifier: &str) -> String {
    format!("{TIMERS_TOPIC_PREFIX}{identifier}/fired")
}

/// 规则状态变更事件
pub fn rule_status_changed(rule_uid: &str, status: Value, previous: Value) -> Message {
    Message::new(
        rule_status_topic(rule_uid),
        json!({ "ruleUID": rule_uid, "status": status, "previous": previous }),
    )
}

/// 规则执行触发事件（来源 script / API）
pub fn execution_triggered(rule_uid: &str, payload: Value, source: ExecutionSource) -> Message {
    Message::new(execution_topic(rule_uid), payload).with_source(source.to_string())
}

/// 定时器触发事件，来源可为空
pub fn timer_fired(identifier: Option<&str>, payload: Value) -> Message {
    let message = Message::new(timer_topic(identifier.unwrap_or("anonymous")), payload);
    match identifier {
        Some(id) => message.with_source(id),
        None => message,
    }
}
