//! 规则引擎
//!
//! 规则由触发器、条件、动作三类模块组成。触发器触发后按顺序评估条件，
//! 全部满足时按顺序执行动作；动作输出写入执行上下文，供后续模块通过输入连接引用。

pub mod composite;
pub mod connection;
pub mod context;
pub mod engine;
pub mod error;
pub mod execution;
pub mod factory;
pub mod handler;
pub mod handlers;
pub mod model;
pub mod module_type;
pub mod reference;
pub mod status;
pub mod storage;

pub use context::{ExecutionContext, Outputs};
pub use engine::RuleEngine;
pub use error::{Result, RuleError};
pub use execution::{ExecutionStatus, RuleExecution};
pub use factory::{HandlerFactoryRegistry, ModuleHandlerFactory};
pub use handler::{
    ActionHandler, ConditionHandler, HandlerContext, ModuleHandler, ModuleHandlerCallback, TriggerCallback,
    TriggerHandler,
};
pub use handlers::CoreModuleHandlerFactory;
pub use model::{Configuration, Input, Module, ModuleKind, ModuleType, Output, Rule};
pub use module_type::ModuleTypeRegistry;
pub use status::{RuleStatus, RuleStatusDetail, RuleStatusInfo};
pub use storage::RuleRegistry;
