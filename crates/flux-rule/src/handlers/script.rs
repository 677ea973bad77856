use crate::context::{ExecutionContext, Outputs};
use crate::handler::{ActionHandler, ConditionHandler, HandlerContext, ModuleHandler};
use crate::model::Module;
use anyhow::anyhow;
use async_trait::async_trait;
use flux_script::ScriptEngine;
use serde_json::Value;
use std::sync::Arc;
use uuid::Uuid;

pub const CONDITION_TYPE_UID: &str = "script.ScriptCondition";
pub const ACTION_TYPE_UID: &str = "script.ScriptAction";

/// 已编译的脚本，释放时从缓存移除
struct CompiledScript {
    id: String,
    engine: Arc<ScriptEngine>,
}

impl CompiledScript {
    fn compile(module: &Module, rule_uid: &str, engine: &Arc<ScriptEngine>) -> anyhow::Result<Self> {
        let script = module
            .config_str("script")
            .ok_or_else(|| anyhow!("Module '{}' is missing the 'script' configuration", module.id))?;
        let id = format!("{}/{}/{}", rule_uid, module.id, Uuid::new_v4());
        engine.compile_script(&id, script)?;
        Ok(Self {
            id,
            engine: engine.clone(),
        })
    }

    fn release(&self) {
        self.engine.remove_script(&self.id);
    }
}

/// 脚本条件，脚本的值必须是布尔
pub struct ScriptConditionHandler {
    script: CompiledScript,
}

/// 脚本动作，脚本的值作为输出 `result`
pub struct ScriptActionHandler {
    script: CompiledScript,
}

pub fn create_condition(module: &Module, rule_uid: &str, context: &HandlerContext) -> anyhow::Result<ModuleHandler> {
    Ok(ModuleHandler::condition(ScriptConditionHandler {
        script: CompiledScript::compile(module, rule_uid, &context.script_engine)?,
    }))
}

pub fn create_action(module: &Module, rule_uid: &str, context: &HandlerContext) -> anyhow::Result<ModuleHandler> {
    Ok(ModuleHandler::action(ScriptActionHandler {
        script: CompiledScript::compile(module, rule_uid, &context.script_engine)?,
    }))
}

#[async_trait]
impl ConditionHandler for ScriptConditionHandler {
    async fn is_satisfied(&self, context: &ExecutionContext) -> anyhow::Result<bool> {
        self.script.engine.eval_condition(&self.script.id, context)
    }

    async fn dispose(&self) {
        self.script.release();
    }
}

#[async_trait]
impl ActionHandler for ScriptActionHandler {
    async fn execute(&self, context: &ExecutionContext) -> anyhow::Result<Option<Outputs>> {
        let result = self.script.engine.eval_action(&self.script.id, context)?;
        Ok(match result {
            Value::Null => None,
            value => Some(Outputs::from([("result".to_string(), value)])),
        })
    }

    async fn dispose(&self) {
        self.script.release();
    }
}
