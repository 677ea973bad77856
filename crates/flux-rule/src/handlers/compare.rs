use crate::context::ExecutionContext;
use crate::handler::{ConditionHandler, HandlerContext, ModuleHandler};
use crate::model::Module;
use crate::reference;
use anyhow::{anyhow, bail};
use async_trait::async_trait;
use regex::Regex;
use serde_json::Value;
use std::cmp::Ordering;
use std::str::FromStr;
use tracing::debug;

pub const TYPE_UID: &str = "core.GenericCompareCondition";

/// 比较运算符
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Operator {
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
    Matches,
}

impl FromStr for Operator {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(match s.trim() {
            "=" | "==" => Operator::Eq,
            "!=" => Operator::Ne,
            "<" => Operator::Lt,
            "<=" => Operator::Le,
            ">" => Operator::Gt,
            ">=" => Operator::Ge,
            "matches" => Operator::Matches,
            other => bail!("Unsupported operator '{}'", other),
        })
    }
}

/// 比较条件
///
/// 输入 `input`（可用 `inputproperty` 取其子路径）与配置 `right` 比较。
/// 两边都能转成数字时按数字比较，否则按字符串比较。
pub struct CompareConditionHandler {
    module_id: String,
    operator: Operator,
    right: Value,
    input_property: Vec<String>,
    pattern: Option<Regex>,
}

pub fn create(module: &Module, _rule_uid: &str, _context: &HandlerContext) -> anyhow::Result<ModuleHandler> {
    let operator: Operator = module
        .config_str("operator")
        .ok_or_else(|| anyhow!("Module '{}' is missing the 'operator' configuration", module.id))?
        .parse()?;
    let right = module
        .configuration
        .get("right")
        .cloned()
        .ok_or_else(|| anyhow!("Module '{}' is missing the 'right' configuration", module.id))?;
    let input_property = match module.config_str("inputproperty") {
        Some(path) => reference::split_reference_to_tokens(path)?,
        None => Vec::new(),
    };
    let pattern = match operator {
        Operator::Matches => Some(Regex::new(&as_text(&right))?),
        _ => None,
    };

    Ok(ModuleHandler::condition(CompareConditionHandler {
        module_id: module.id.clone(),
        operator,
        right,
        input_property,
        pattern,
    }))
}

fn as_number(value: &Value) -> Option<f64> {
    match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

fn as_text(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

impl CompareConditionHandler {
    fn compare(&self, left: &Value) -> bool {
        if let Some(pattern) = &self.pattern {
            return pattern.is_match(&as_text(left));
        }

        let ordering = match (as_number(left), as_number(&self.right)) {
            (Some(l), Some(r)) => l.partial_cmp(&r),
            _ => Some(as_text(left).cmp(&as_text(&self.right))),
        };
        let Some(ordering) = ordering else {
            return false;
        };

        match self.operator {
            Operator::Eq => ordering == Ordering::Equal,
            Operator::Ne => ordering != Ordering::Equal,
            Operator::Lt => ordering == Ordering::Less,
            Operator::Le => ordering != Ordering::Greater,
            Operator::Gt => ordering == Ordering::Greater,
            Operator::Ge => ordering != Ordering::Less,
            Operator::Matches => false,
        }
    }
}

#[async_trait]
impl ConditionHandler for CompareConditionHandler {
    async fn is_satisfied(&self, context: &ExecutionContext) -> anyhow::Result<bool> {
        let Some(input) = context.get("input") else {
            debug!(module_id = %self.module_id, "Compare condition has no input");
            return Ok(false);
        };
        let Some(left) = reference::resolve_tokens(input, &self.input_property) else {
            debug!(module_id = %self.module_id, "Input property not found");
            return Ok(false);
        };
        Ok(self.compare(left))
    }
}
