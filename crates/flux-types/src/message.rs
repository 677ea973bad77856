use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// 总线消息
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    pub id: Uuid,
    pub topic: String,
    pub payload: serde_json::Value,
    /// 事件来源（可为空）
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source: Option<String>,
    pub timestamp: i64,
}

impl Message {
    pub fn new(topic: impl Into<String>, payload: serde_json::Value) -> Self {
        Self {
            id: Uuid::new_v4(),
            topic: topic.into(),
            payload,
            source: None,
            timestamp: chrono::Utc::now().timestamp_millis(),
        }
    }

    pub fn with_source(mut self, source: impl Into<String>) -> Self {
        self.source = Some(source.into());
        self
    }

    /// 主题匹配，支持末尾 `*` 通配
    pub fn matches_topic(&self, filter: &str) -> bool {
        match filter.strip_suffix('*') {
            Some(prefix) => self.topic.starts_with(prefix),
            None => self.topic == filter,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_topic_wildcard() {
        let msg = Message::new("flux/rules/r1/state", json!({}));
        assert!(msg.matches_topic("flux/rules/*"));
        assert!(msg.matches_topic("flux/rules/r1/state"));
        assert!(!msg.matches_topic("flux/timers/*"));
        assert!(!msg.matches_topic("flux/rules/r1"));
    }

    #[test]
    fn test_source_is_optional_in_json() {
        let msg: Message = serde_json::from_value(json!({
            "id": Uuid::new_v4(),
            "topic": "a",
            "payload": 1,
            "timestamp": 0
        }))
        .unwrap();
        assert!(msg.source.is_none());

        let msg = msg.with_source("API");
        assert_eq!(msg.source.as_deref(), Some("API"));
    }
}
