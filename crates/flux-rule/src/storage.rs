use crate::model::{Rule, UID_SEPARATOR};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;

/// 规则注册表（内存实现）
pub struct RuleRegistry {
    rules: Arc<RwLock<HashMap<String, Rule>>>,
}

impl RuleRegistry {
    pub fn new() -> Self {
        Self {
            rules: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    /// 保存规则，返回被替换的旧版本
    pub async fn save(&self, rule: Rule) -> Option<Rule> {
        let mut rules = self.rules.write().await;
        rules.insert(rule.uid.clone(), rule)
    }

    pub async fn get(&self, uid: &str) -> Option<Rule> {
        let rules = self.rules.read().await;
        rules.get(uid).cloned()
    }

    pub async fn contains(&self, uid: &str) -> bool {
        self.rules.read().await.contains_key(uid)
    }

    pub async fn delete(&self, uid: &str) -> Option<Rule> {
        let mut rules = self.rules.write().await;
        rules.remove(uid)
    }

    pub async fn list(&self) -> Vec<Rule> {
        let rules = self.rules.read().await;
        rules.values().cloned().collect()
    }

    pub async fn find_by_tag(&self, tag: &str) -> Vec<Rule> {
        let rules = self.rules.read().await;
        rules
            .values()
            .filter(|r| r.tags.iter().any(|t| t == tag))
            .cloned()
            .collect()
    }

    /// `prefix:name` 形式 UID 的前缀匹配
    pub async fn find_by_prefix(&self, prefix: &str) -> Vec<Rule> {
        let key = format!("{}{}", prefix, UID_SEPARATOR);
        let rules = self.rules.read().await;
        rules
            .values()
            .filter(|r| r.uid.starts_with(&key))
            .cloned()
            .collect()
    }
}

impl Default for RuleRegistry {
    fn default() -> Self {
        Self::new()
    }
}
