use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::HashMap;

/// 模块配置（透传给处理器，不做 schema 校验）
pub type Configuration = Map<String, Value>;

/// UID 前缀分隔符（`prefix:name`）
pub const UID_SEPARATOR: char = ':';

/// 模块种类
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ModuleKind {
    Trigger,
    Condition,
    Action,
}

impl std::fmt::Display for ModuleKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ModuleKind::Trigger => f.write_str("trigger"),
            ModuleKind::Condition => f.write_str("condition"),
            ModuleKind::Action => f.write_str("action"),
        }
    }
}

/// 规则中的一个模块
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Module {
    /// 模块 ID（规则内唯一）
    pub id: String,

    /// 模块类型 UID
    #[serde(rename = "type")]
    pub type_uid: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub label: Option<String>,

    #[serde(default)]
    pub configuration: Configuration,

    /// 输入名 → 引用表达式（`moduleId.output[.path]` 或 `${key}`）
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub inputs: HashMap<String, String>,
}

impl Module {
    pub fn new(id: impl Into<String>, type_uid: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            type_uid: type_uid.into(),
            label: None,
            configuration: Configuration::new(),
            inputs: HashMap::new(),
        }
    }

    pub fn with_config(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.configuration.insert(key.into(), value.into());
        self
    }

    pub fn with_input(mut self, name: impl Into<String>, reference: impl Into<String>) -> Self {
        self.inputs.insert(name.into(), reference.into());
        self
    }

    pub fn config_str(&self, key: &str) -> Option<&str> {
        self.configuration.get(key).and_then(Value::as_str)
    }

    /// 数字或数字字符串
    pub fn config_u64(&self, key: &str) -> Option<u64> {
        match self.configuration.get(key)? {
            Value::Number(n) => n.as_u64(),
            Value::String(s) => s.trim().parse().ok(),
            _ => None,
        }
    }

    /// 布尔或 "true"/"false"
    pub fn config_bool(&self, key: &str) -> Option<bool> {
        match self.configuration.get(key)? {
            Value::Bool(b) => Some(*b),
            Value::String(s) => s.trim().parse().ok(),
            _ => None,
        }
    }

    /// 字符串列表；单个字符串按逗号拆分
    pub fn config_list(&self, key: &str) -> Vec<String> {
        match self.configuration.get(key) {
            Some(Value::Array(items)) => items
                .iter()
                .filter_map(|item| item.as_str().map(str::to_string))
                .collect(),
            Some(Value::String(s)) => s
                .split(',')
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .map(str::to_string)
                .collect(),
            _ => Vec::new(),
        }
    }
}

/// 规则定义
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Rule {
    /// 规则 UID，可带前缀 `prefix:name`
    pub uid: String,

    #[serde(default)]
    pub name: String,

    #[serde(default)]
    pub description: String,

    #[serde(default)]
    pub tags: Vec<String>,

    /// 规则级配置，模块配置中的 `${key}` 据此解析
    #[serde(default)]
    pub configuration: Configuration,

    #[serde(default)]
    pub triggers: Vec<Module>,

    #[serde(default)]
    pub conditions: Vec<Module>,

    #[serde(default)]
    pub actions: Vec<Module>,
}

impl Rule {
    pub fn new(uid: impl Into<String>) -> Self {
        Self {
            uid: uid.into(),
            name: String::new(),
            description: String::new(),
            tags: Vec::new(),
            configuration: Configuration::new(),
            triggers: Vec::new(),
            conditions: Vec::new(),
            actions: Vec::new(),
        }
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    pub fn with_tag(mut self, tag: impl Into<String>) -> Self {
        self.tags.push(tag.into());
        self
    }

    pub fn with_trigger(mut self, module: Module) -> Self {
        self.triggers.push(module);
        self
    }

    pub fn with_condition(mut self, module: Module) -> Self {
        self.conditions.push(module);
        self
    }

    pub fn with_action(mut self, module: Module) -> Self {
        self.actions.push(module);
        self
    }

    /// `prefix:name` 中的前缀
    pub fn prefix(&self) -> Option<&str> {
        self.uid.split_once(UID_SEPARATOR).map(|(prefix, _)| prefix)
    }

    /// 按声明顺序遍历所有模块及其种类
    pub fn modules(&self) -> impl Iterator<Item = (ModuleKind, &Module)> {
        self.triggers
            .iter()
            .map(|m| (ModuleKind::Trigger, m))
            .chain(self.conditions.iter().map(|m| (ModuleKind::Condition, m)))
            .chain(self.actions.iter().map(|m| (ModuleKind::Action, m)))
    }

    pub fn module(&self, id: &str) -> Option<&Module> {
        self.modules().map(|(_, m)| m).find(|m| m.id == id)
    }
}

/// 模块类型声明的输入
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Input {
    pub name: String,

    #[serde(rename = "type", default)]
    pub type_tag: String,

    #[serde(default)]
    pub required: bool,
}

/// 模块类型声明的输出
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Output {
    pub name: String,

    #[serde(rename = "type", default)]
    pub type_tag: String,

    /// 复合类型：逗号分隔的子模块输出引用，如 `c1.out,c2.out.value`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reference: Option<String>,
}

impl Output {
    pub fn new(name: impl Into<String>, type_tag: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            type_tag: type_tag.into(),
            reference: None,
        }
    }

    pub fn with_reference(mut self, reference: impl Into<String>) -> Self {
        self.reference = Some(reference.into());
        self
    }
}

/// 模块类型定义；带子模块的是复合类型
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ModuleType {
    pub uid: String,

    pub kind: ModuleKind,

    #[serde(default)]
    pub label: String,

    #[serde(default)]
    pub description: String,

    #[serde(default)]
    pub inputs: Vec<Input>,

    #[serde(default)]
    pub outputs: Vec<Output>,

    /// 复合类型的子模块（按执行顺序）
    #[serde(default)]
    pub children: Vec<Module>,
}

impl ModuleType {
    pub fn new(uid: impl Into<String>, kind: ModuleKind) -> Self {
        Self {
            uid: uid.into(),
            kind,
            label: String::new(),
            description: String::new(),
            inputs: Vec::new(),
            outputs: Vec::new(),
            children: Vec::new(),
        }
    }

    pub fn with_child(mut self, module: Module) -> Self {
        self.children.push(module);
        self
    }

    pub fn with_output(mut self, output: Output) -> Self {
        self.outputs.push(output);
        self
    }

    pub fn is_composite(&self) -> bool {
        !self.children.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_rule_prefix() {
        assert_eq!(Rule::new("home:lights").prefix(), Some("home"));
        assert_eq!(Rule::new("lights").prefix(), None);
    }

    #[test]
    fn test_rule_serialization() {
        let rule: Rule = serde_json::from_value(json!({
            "uid": "r1",
            "triggers": [{"id": "t", "type": "core.GenericEventTrigger", "configuration": {"topic": "a/b"}}],
            "conditions": [{"id": "c", "type": "core.GenericCompareCondition", "inputs": {"input": "t.payload"}}],
            "actions": [{"id": "a", "type": "core.LogAction"}]
        }))
        .unwrap();

        assert_eq!(rule.triggers[0].config_str("topic"), Some("a/b"));
        assert_eq!(rule.conditions[0].inputs["input"], "t.payload");
        assert!(rule.tags.is_empty());

        let kinds: Vec<_> = rule.modules().map(|(kind, m)| (kind, m.id.as_str())).collect();
        assert_eq!(
            kinds,
            vec![
                (ModuleKind::Trigger, "t"),
                (ModuleKind::Condition, "c"),
                (ModuleKind::Action, "a")
            ]
        );
    }

    #[test]
    fn test_config_accessors() {
        let module = Module::new("m", "x")
            .with_config("delayMs", "250")
            .with_config("enable", false)
            .with_config("ruleUIDs", "a, b,,c");
        assert_eq!(module.config_u64("delayMs"), Some(250));
        assert_eq!(module.config_bool("enable"), Some(false));
        assert_eq!(module.config_list("ruleUIDs"), vec!["a", "b", "c"]);
        assert!(module.config_list("missing").is_empty());
    }
}
