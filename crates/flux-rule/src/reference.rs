//! 输出引用解析
//!
//! 路径语法：`a.b[0].c["k"]`，引号内的键可以包含 `.`、`[`、`]`。
//! 无法解析的中间段返回 `None`，只有路径本身的语法错误才返回 [`ReferenceError`]。

use crate::context::ExecutionContext;
use serde_json::{Map, Value};
use std::collections::HashMap;
use thiserror::Error;
use tracing::warn;

/// 引用语法错误
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ReferenceError {
    #[error("Invalid reference syntax in '{reference}': {reason}")]
    Syntax { reference: String, reason: String },

    #[error("Couldn't parse referenced key '{0}': expected reference syntax ${{referencedKey}}")]
    Unterminated(String),
}

impl ReferenceError {
    fn syntax(reference: &str, reason: impl Into<String>) -> Self {
        Self::Syntax {
            reference: reference.to_string(),
            reason: reason.into(),
        }
    }
}

/// 把引用路径拆成键/下标序列
///
/// # 错误
/// 空段、空的或未闭合的方括号、方括号内的非数字下标
pub fn split_reference_to_tokens(reference: &str) -> Result<Vec<String>, ReferenceError> {
    let mut tokens = Vec::new();
    let mut current = String::new();
    let mut chars = reference.chars().peekable();
    // 刚读过 `.`，后面必须有一个段
    let mut expect_segment = false;
    // 刚读过 `]`，后面只能是 `.`、`[` 或结尾
    let mut after_bracket = false;

    while let Some(c) = chars.next() {
        match c {
            '.' => {
                if current.is_empty() && !after_bracket {
                    return Err(ReferenceError::syntax(reference, "empty path segment"));
                }
                if !current.is_empty() {
                    tokens.push(std::mem::take(&mut current));
                }
                expect_segment = true;
                after_bracket = false;
            }
            '[' => {
                if !current.is_empty() {
                    tokens.push(std::mem::take(&mut current));
                }
                let token = if chars.peek() == Some(&'"') {
                    chars.next();
                    read_quoted_key(reference, &mut chars)?
                } else {
                    read_index(reference, &mut chars)?
                };
                tokens.push(token);
                expect_segment = false;
                after_bracket = true;
            }
            ']' => return Err(ReferenceError::syntax(reference, "unexpected ']'")),
            _ => {
                if after_bracket {
                    return Err(ReferenceError::syntax(reference, "expected '.' or '[' after ']'"));
                }
                current.push(c);
                expect_segment = false;
            }
        }
    }

    if expect_segment {
        return Err(ReferenceError::syntax(reference, "trailing '.'"));
    }
    if !current.is_empty() {
        tokens.push(current);
    }
    Ok(tokens)
}

fn read_quoted_key(
    reference: &str,
    chars: &mut std::iter::Peekable<std::str::Chars<'_>>,
) -> Result<String, ReferenceError> {
    let mut key = String::new();
    while let Some(c) = chars.next() {
        if c == '"' && chars.peek() == Some(&']') {
            chars.next();
            if key.is_empty() {
                return Err(ReferenceError::syntax(reference, "empty key"));
            }
            return Ok(key);
        }
        key.push(c);
    }
    Err(ReferenceError::syntax(reference, "unterminated '[\"'"))
}

fn read_index(
    reference: &str,
    chars: &mut std::iter::Peekable<std::str::Chars<'_>>,
) -> Result<String, ReferenceError> {
    let mut index = String::new();
    for c in chars.by_ref() {
        if c == ']' {
            if index.is_empty() {
                return Err(ReferenceError::syntax(reference, "empty index"));
            }
            return Ok(index);
        }
        if !c.is_ascii_digit() {
            return Err(ReferenceError::syntax(reference, "index must be a number"));
        }
        index.push(c);
    }
    Err(ReferenceError::syntax(reference, "unterminated '['"))
}

/// 按 token 逐层访问：对象按键、数组按下标
pub fn resolve_tokens<'a, S: AsRef<str>>(value: &'a Value, tokens: &[S]) -> Option<&'a Value> {
    tokens.iter().try_fold(value, |current, token| {
        let token = token.as_ref();
        match current {
            Value::Object(map) => map.get(token),
            Value::Array(items) => token.parse::<usize>().ok().and_then(|i| items.get(i)),
            _ => None,
        }
    })
}

/// 解析完整路径
pub fn resolve(value: &Value, path: &str) -> Result<Option<Value>, ReferenceError> {
    let tokens = split_reference_to_tokens(path)?;
    Ok(resolve_tokens(value, &tokens).cloned())
}

/// 是否为单一引用 `${key}`
pub fn is_reference(value: &str) -> bool {
    let trimmed = value.trim();
    trimmed.len() > 3
        && trimmed.rfind("${") == Some(0)
        && trimmed.find('}') == Some(trimmed.len() - 1)
}

/// 是否包含 `...${key}...` 形式的片段
pub fn contains_pattern(value: &str) -> bool {
    let trimmed = value.trim();
    match (trimmed.find("${"), trimmed.find('}')) {
        (Some(start), Some(end)) => start < end,
        _ => false,
    }
}

/// `${key}` 中的 key
pub fn reference_key(value: &str) -> Option<&str> {
    if !is_reference(value) {
        return None;
    }
    let trimmed = value.trim();
    Some(&trimmed[2..trimmed.len() - 1])
}

/// 解析单一引用；不是引用时原样返回字符串，找不到键返回 `None`
pub fn resolve_reference(reference: &str, context: &HashMap<String, Value>) -> Option<Value> {
    match reference_key(reference) {
        Some(key) => context.get(key).cloned(),
        None => Some(Value::String(reference.to_string())),
    }
}

/// 替换字符串中所有 `${key}` 片段，找不到的片段保持原样
///
/// # 错误
/// `${` 没有对应的 `}`
pub fn resolve_pattern(pattern: &str, context: &HashMap<String, Value>) -> Result<String, ReferenceError> {
    let mut result = String::with_capacity(pattern.len());
    let mut rest = pattern;

    while let Some(start) = rest.find("${") {
        result.push_str(&rest[..start]);
        let after = &rest[start + 2..];
        let end = after
            .find('}')
            .ok_or_else(|| ReferenceError::Unterminated(rest[start..].to_string()))?;
        let key = &after[..end];
        match context.get(key) {
            Some(Value::String(s)) => result.push_str(s),
            Some(Value::Null) | None => {
                warn!(key = %key, "Cannot find reference, it will remain the same");
                result.push_str("${");
                result.push_str(key);
                result.push('}');
            }
            Some(other) => result.push_str(&other.to_string()),
        }
        rest = &after[end + 1..];
    }
    result.push_str(rest);
    Ok(result)
}

/// 解析一个配置值（单一引用或模板）
pub fn resolve_property(value: &str, context: &HashMap<String, Value>) -> Result<Value, ReferenceError> {
    if is_reference(value) {
        if let Some(resolved) = resolve_reference(value, context) {
            return Ok(resolved);
        }
    } else if contains_pattern(value) {
        return resolve_pattern(value, context).map(Value::String);
    }
    Ok(Value::String(value.to_string()))
}

/// 用父模块的配置解析子模块配置中的引用
pub fn resolve_configuration(
    configuration: &Map<String, Value>,
    context: &HashMap<String, Value>,
) -> Result<Map<String, Value>, ReferenceError> {
    let mut resolved = Map::with_capacity(configuration.len());
    for (key, value) in configuration {
        let value = match value {
            Value::String(s) => resolve_property(s, context)?,
            Value::Array(items) => Value::Array(
                items
                    .iter()
                    .map(|item| match item {
                        Value::String(s) => resolve_property(s, context),
                        other => Ok(other.clone()),
                    })
                    .collect::<Result<Vec<_>, _>>()?,
            ),
            other => other.clone(),
        };
        resolved.insert(key.clone(), value);
    }
    Ok(resolved)
}

/// 复合模块子模块的上下文：`${parentInput}` 形式的输入从复合模块上下文取值
pub fn composite_child_context(
    inputs: &HashMap<String, String>,
    composite_context: &ExecutionContext,
) -> ExecutionContext {
    inputs
        .iter()
        .filter(|(_, reference)| is_reference(reference))
        .filter_map(|(name, reference)| {
            resolve_reference(reference, composite_context).map(|value| (name.clone(), value))
        })
        .collect()
}
