//! 规则内模块间的输入连接

use crate::context::ExecutionContext;
use crate::model::Rule;
use crate::reference::{self, ReferenceError};
use serde_json::Value;
use std::collections::{HashMap, HashSet};

/// 输入连接
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Connection {
    /// `moduleId.outputName[.path]`：读取同一次触发中前面模块的输出
    Output {
        module_id: String,
        output: String,
        path: Vec<String>,
    },
    /// `${key}`：直接读取上下文
    Context { key: String },
}

impl Connection {
    pub fn parse(reference: &str) -> Result<Self, ReferenceError> {
        if let Some(key) = reference::reference_key(reference) {
            return Ok(Connection::Context { key: key.to_string() });
        }

        let mut tokens = reference::split_reference_to_tokens(reference.trim())?.into_iter();
        match (tokens.next(), tokens.next()) {
            (Some(module_id), Some(output)) => Ok(Connection::Output {
                module_id,
                output,
                path: tokens.collect(),
            }),
            _ => Err(ReferenceError::Syntax {
                reference: reference.to_string(),
                reason: "expected moduleId.outputName".to_string(),
            }),
        }
    }

    pub fn resolve(&self, context: &ExecutionContext) -> Option<Value> {
        match self {
            Connection::Context { key } => context.get(key).cloned(),
            Connection::Output { module_id, output, path } => {
                let value = context.get(&format!("{}.{}", module_id, output))?;
                reference::resolve_tokens(value, path).cloned()
            }
        }
    }
}

/// 已解析的输入（输入名 → 连接）
pub type Connections = Vec<(String, Connection)>;

pub fn parse_inputs(inputs: &HashMap<String, String>) -> Result<Connections, ReferenceError> {
    inputs
        .iter()
        .map(|(name, reference)| Ok((name.clone(), Connection::parse(reference)?)))
        .collect()
}

/// 模块上下文：触发上下文 + 已解析的输入；解析不到的输入不出现
pub fn module_context(connections: &Connections, context: &ExecutionContext) -> ExecutionContext {
    let mut module_context = context.clone();
    for (name, connection) in connections {
        if let Some(value) = connection.resolve(context) {
            module_context.insert(name.clone(), value);
        }
    }
    module_context
}

/// 校验规则结构：模块 ID 唯一、连接引用的模块存在
pub fn validate_rule(rule: &Rule) -> Result<(), String> {
    let mut ids = HashSet::new();
    for (_, module) in rule.modules() {
        if module.id.trim().is_empty() {
            return Err(format!("Module of type '{}' has an empty id", module.type_uid));
        }
        if !ids.insert(module.id.as_str()) {
            return Err(format!("Duplicate module id '{}'", module.id));
        }
    }

    for (_, module) in rule.modules() {
        for (name, reference) in &module.inputs {
            let connection = Connection::parse(reference)
                .map_err(|e| format!("Invalid input '{}' of module '{}': {}", name, module.id, e))?;
            if let Connection::Output { module_id, .. } = &connection {
                if !ids.contains(module_id.as_str()) {
                    return Err(format!(
                        "Input '{}' of module '{}' references unknown module '{}'",
                        name, module.id, module_id
                    ));
                }
            }
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::Module;
    use serde_json::json;

    #[test]
    fn test_parse_connections() {
        assert_eq!(
            Connection::parse("trigger.payload.items[0]").unwrap(),
            Connection::Output {
                module_id: "trigger".into(),
                output: "payload".into(),
                path: vec!["items".into(), "0".into()],
            }
        );
        assert_eq!(
            Connection::parse("${value}").unwrap(),
            Connection::Context { key: "value".into() }
        );
        assert!(Connection::parse("trigger").is_err());
    }

    #[test]
    fn test_module_context_resolves_inputs() {
        let context = ExecutionContext::from([
            ("t.payload".to_string(), json!({"temp": 21})),
            ("value".to_string(), json!(5)),
        ]);
        let connections = parse_inputs(&HashMap::from([
            ("temp".to_string(), "t.payload.temp".to_string()),
            ("direct".to_string(), "${value}".to_string()),
            ("missing".to_string(), "t.other".to_string()),
        ]))
        .unwrap();

        let module_context = module_context(&connections, &context);
        assert_eq!(module_context["temp"], json!(21));
        assert_eq!(module_context["direct"], json!(5));
        assert!(!module_context.contains_key("missing"));
        assert_eq!(module_context["value"], json!(5));
    }

    #[test]
    fn test_validate_rule() {
        let rule = Rule::new("r")
            .with_trigger(Module::new("t", "core.GenericEventTrigger"))
            .with_action(Module::new("a", "core.LogAction").with_input("x", "t.payload"));
        assert!(validate_rule(&rule).is_ok());

        let duplicate = rule.clone().with_condition(Module::new("a", "core.GenericCompareCondition"));
        assert!(validate_rule(&duplicate).unwrap_err().contains("Duplicate"));

        let dangling = Rule::new("r")
            .with_action(Module::new("a", "core.LogAction").with_input("x", "nope.out"));
        assert!(validate_rule(&dangling).unwrap_err().contains("unknown module"));
    }
}
