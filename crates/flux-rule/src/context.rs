use serde_json::Value;
use std::collections::HashMap;

/// 一次触发内共享的上下文（触发器输出 → 条件 → 动作）
pub type ExecutionContext = HashMap<String, Value>;

/// 模块输出（输出名 → 值）
pub type Outputs = HashMap<String, Value>;

/// 以 `prefix.key` 的形式写入模块输出
pub fn put_outputs(context: &mut ExecutionContext, module_id: &str, outputs: &Outputs) {
    for (key, value) in outputs {
        context.insert(format!("{}.{}", module_id, key), value.clone());
    }
}

/// 从对象构建上下文，非对象值放在 `value` 键下
pub fn context_from_value(value: Value) -> ExecutionContext {
    match value {
        Value::Object(map) => map.into_iter().collect(),
        Value::Null => ExecutionContext::new(),
        other => ExecutionContext::from([("value".to_string(), other)]),
    }
}
