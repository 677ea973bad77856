//! 内置模块处理器

pub mod compare;
pub mod cron;
pub mod delay;
pub mod enablement;
pub mod event;
pub mod event_condition;
pub mod log;
pub mod run_rule;
pub mod script;

use crate::factory::ModuleHandlerFactory;
use crate::handler::{HandlerContext, ModuleHandler};
use crate::model::Module;
use std::collections::HashMap;

type Constructor = fn(&Module, &str, &HandlerContext) -> anyhow::Result<ModuleHandler>;

/// 内置类型工厂：类型 UID → 构造函数
pub struct CoreModuleHandlerFactory {
    constructors: HashMap<&'static str, Constructor>,
}

impl Default for CoreModuleHandlerFactory {
    fn default() -> Self {
        Self::new()
    }
}

impl CoreModuleHandlerFactory {
    pub fn new() -> Self {
        let constructors: [(&'static str, Constructor); 10] = [
            (event::TYPE_UID, event::create),
            (event_condition::TYPE_UID, event_condition::create),
            (cron::TYPE_UID, cron::create),
            (compare::TYPE_UID, compare::create),
            (log::TYPE_UID, log::create),
            (run_rule::TYPE_UID, run_rule::create),
            (enablement::TYPE_UID, enablement::create),
            (delay::TYPE_UID, delay::create),
            (script::CONDITION_TYPE_UID, script::create_condition),
            (script::ACTION_TYPE_UID, script::create_action),
        ];
        Self {
            constructors: constructors.into_iter().collect(),
        }
    }
}

impl ModuleHandlerFactory for CoreModuleHandlerFactory {
    fn name(&self) -> &str {
        "core"
    }

    fn supported_types(&self) -> Vec<String> {
        self.constructors.keys().map(|uid| uid.to_string()).collect()
    }

    fn create_handler(
        &self,
        module: &Module,
        rule_uid: &str,
        context: &HandlerContext,
    ) -> anyhow::Result<Option<ModuleHandler>> {
        match self.constructors.get(module.type_uid.as_str()) {
            Some(constructor) => constructor(module, rule_uid, context).map(Some),
            None => Ok(None),
        }
    }
}
