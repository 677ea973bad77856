use anyhow::{anyhow, Result};
use rhai::{Dynamic, Engine, Scope, AST};
use serde_json::Value;
use std::collections::HashMap;
use std::sync::{Arc, RwLock};

/// 脚本执行上下文（规则上下文的只读视图）
pub type ScriptContext = HashMap<String, Value>;

pub struct ScriptEngine {
    engine: Engine,
    // Cache compiled scripts: script_id -> AST
    script_cache: RwLock<HashMap<String, AST>>,
}

impl Default for ScriptEngine {
    fn default() -> Self {
        Self::new()
    }
}

impl ScriptEngine {
    pub fn new() -> Self {
        let mut engine = Engine::new();
        let state_store: Arc<RwLock<HashMap<String, Dynamic>>> = Arc::new(RwLock::new(HashMap::new()));

        // Safety: Limit max operations
        engine.set_max_operations(100_000);
        engine.set_max_expr_depths(50, 50);

        engine.register_fn("now_ms", || chrono::Utc::now().timestamp_millis());

        let store = state_store.clone();
        engine.register_fn("state_get", move |key: &str| -> Dynamic {
            // 如果锁被污染，返回 UNIT（相当于 undefined）
            match store.read() {
                Ok(read) => read.get(key).cloned().unwrap_or(Dynamic::UNIT),
                Err(_) => {
                    tracing::error!("Failed to acquire read lock for state_get");
                    Dynamic::UNIT
                }
            }
        });

        let store = state_store;
        engine.register_fn("state_set", move |key: &str, value: Dynamic| {
            match store.write() {
                Ok(mut write) => {
                    write.insert(key.to_string(), value);
                }
                Err(_) => {
                    tracing::error!("Failed to acquire write lock for state_set");
                }
            }
        });

        engine.on_print(|x| {
            tracing::info!(target: "script", "{}", x);
        });

        engine.on_debug(|x, src, pos| {
            tracing::debug!(target: "script", source = ?src, position = ?pos, "{}", x);
        });

        Self {
            engine,
            script_cache: RwLock::new(HashMap::new()),
        }
    }

    pub fn compile_script(&self, script_id: &str, script: &str) -> Result<()> {
        let ast = self
            .engine
            .compile(script)
            .map_err(|e| anyhow!("Failed to compile script '{}': {}", script_id, e))?;
        let mut cache = self
            .script_cache
            .write()
            .map_err(|e| anyhow!("Failed to acquire write lock: {}", e))?;
        cache.insert(script_id.to_string(), ast);
        Ok(())
    }

    /// 执行条件脚本，结果必须是布尔值
    pub fn eval_condition(&self, script_id: &str, context: &ScriptContext) -> Result<bool> {
        self.eval::<bool>(script_id, context)
    }

    /// 执行动作脚本，返回脚本的最终值
    pub fn eval_action(&self, script_id: &str, context: &ScriptContext) -> Result<Value> {
        let result = self.eval::<Dynamic>(script_id, context)?;
        if result.is_unit() {
            return Ok(Value::Null);
        }
        rhai::serde::from_dynamic(&result)
            .map_err(|e| anyhow!("Script '{}' returned an unsupported value: {}", script_id, e))
    }

    fn eval<T: Clone + Send + Sync + 'static>(&self, script_id: &str, context: &ScriptContext) -> Result<T> {
        let cache = self
            .script_cache
            .read()
            .map_err(|e| anyhow!("Failed to acquire read lock: {}", e))?;
        let ast = cache
            .get(script_id)
            .ok_or_else(|| anyhow!("Script not found: {}", script_id))?;

        let mut scope = build_scope(context)?;
        self.engine
            .eval_ast_with_scope::<T>(&mut scope, ast)
            .map_err(|e| anyhow!("Script '{}' failed: {}", script_id, e))
    }

    pub fn get_script_ids(&self) -> Vec<String> {
        match self.script_cache.read() {
            Ok(cache) => cache.keys().cloned().collect(),
            Err(e) => {
                tracing::error!("Failed to acquire read lock in get_script_ids: {}", e);
                Vec::new()
            }
        }
    }

    pub fn remove_script(&self, id: &str) {
        match self.script_cache.write() {
            Ok(mut cache) => {
                cache.remove(id);
            }
            Err(e) => {
                tracing::error!("Failed to acquire write lock in remove_script: {}", e);
            }
        }
    }
}

/// 整个上下文以 `ctx` 注入；合法标识符的键同时作为顶层变量
fn build_scope(context: &ScriptContext) -> Result<Scope<'static>> {
    let mut scope = Scope::new();
    let mut ctx = rhai::Map::new();

    for (key, value) in context {
        let dynamic = rhai::serde::to_dynamic(value)
            .map_err(|e| anyhow!("Failed to convert context value '{}': {}", key, e))?;
        if is_identifier(key) {
            scope.push_dynamic(key.clone(), dynamic.clone());
        }
        ctx.insert(key.as_str().into(), dynamic);
    }

    scope.push("ctx", ctx);
    Ok(scope)
}

fn is_identifier(key: &str) -> bool {
    let mut chars = key.chars();
    match chars.next() {
        Some(c) if c.is_ascii_alphabetic() || c == '_' => {}
        _ => return false,
    }
    key != "ctx" && chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
}

mod tests;
