//! 处理器工厂注册表
//!
//! 类型 UID → 工厂；工厂不认识的类型如果是复合类型，则由注册表递归创建子处理器。

use crate::composite::{self, Child, CompositeActionHandler, CompositeConditionHandler, CompositeTriggerHandler};
use crate::handler::{HandlerContext, ModuleHandler};
use crate::model::{Module, ModuleKind, ModuleType};
use crate::module_type::ModuleTypeRegistry;
use crate::reference;
use anyhow::{anyhow, bail};
use serde_json::Value;
use std::collections::HashMap;
use std::sync::{Arc, RwLock};
use tracing::{info, warn};

/// 处理器工厂
pub trait ModuleHandlerFactory: Send + Sync {
    /// 用于日志
    fn name(&self) -> &str;

    fn supported_types(&self) -> Vec<String>;

    /// 创建处理器
    ///
    /// - `Ok(None)`：不支持该类型
    /// - `Err(_)`：支持但配置错误
    fn create_handler(
        &self,
        module: &Module,
        rule_uid: &str,
        context: &HandlerContext,
    ) -> anyhow::Result<Option<ModuleHandler>>;

    /// 处理器被释放（在 `dispose` 之后调用）
    fn release_handler(&self, _module: &Module, _rule_uid: &str) {}
}

#[derive(Default)]
struct Factories {
    all: Vec<Arc<dyn ModuleHandlerFactory>>,
    by_type: HashMap<String, Arc<dyn ModuleHandlerFactory>>,
}

/// 工厂注册表
pub struct HandlerFactoryRegistry {
    factories: RwLock<Factories>,
    module_types: Arc<ModuleTypeRegistry>,
}

impl HandlerFactoryRegistry {
    pub fn new(module_types: Arc<ModuleTypeRegistry>) -> Self {
        Self {
            factories: RwLock::new(Factories::default()),
            module_types,
        }
    }

    pub fn module_types(&self) -> &Arc<ModuleTypeRegistry> {
        &self.module_types
    }

    /// 注册工厂，返回其支持的类型
    pub fn add_factory(&self, factory: Arc<dyn ModuleHandlerFactory>) -> Vec<String> {
        let types = factory.supported_types();
        let Ok(mut factories) = self.factories.write() else {
            warn!(factory = %factory.name(), "Factory registry lock poisoned, factory ignored");
            return Vec::new();
        };
        for type_uid in &types {
            if let Some(previous) = factories.by_type.insert(type_uid.clone(), factory.clone()) {
                warn!(
                    type_uid = %type_uid,
                    previous = %previous.name(),
                    factory = %factory.name(),
                    "Module type handled by a new factory"
                );
            }
        }
        factories.all.push(factory.clone());
        info!(factory = %factory.name(), types = ?types, "Handler factory added");
        types
    }

    /// 移除工厂，返回不再有处理器的类型
    pub fn remove_factory(&self, factory: &Arc<dyn ModuleHandlerFactory>) -> Vec<String> {
        let Ok(mut factories) = self.factories.write() else {
            return Vec::new();
        };
        factories.all.retain(|f| !Arc::ptr_eq(f, factory));
        let mut removed = Vec::new();
        factories.by_type.retain(|type_uid, f| {
            let keep = !Arc::ptr_eq(f, factory);
            if !keep {
                removed.push(type_uid.clone());
            }
            keep
        });
        info!(factory = %factory.name(), types = ?removed, "Handler factory removed");
        removed
    }

    pub fn factory_for(&self, type_uid: &str) -> Option<Arc<dyn ModuleHandlerFactory>> {
        self.factories.read().ok()?.by_type.get(type_uid).cloned()
    }

    pub fn supported_types(&self) -> Vec<String> {
        self.factories
            .read()
            .map(|f| f.by_type.keys().cloned().collect())
            .unwrap_or_default()
    }

    /// 创建模块处理器（复合类型递归创建）
    pub fn create_handler(
        &self,
        module: &Module,
        rule_uid: &str,
        context: &HandlerContext,
    ) -> anyhow::Result<Option<ModuleHandler>> {
        if let Some(factory) = self.factory_for(&module.type_uid) {
            return factory.create_handler(module, rule_uid, context);
        }
        match self.module_types.get(&module.type_uid) {
            Some(module_type) if module_type.is_composite() => {
                self.create_composite(module, &module_type, rule_uid, context)
            }
            _ => Ok(None),
        }
    }

    fn create_composite(
        &self,
        module: &Module,
        module_type: &ModuleType,
        rule_uid: &str,
        context: &HandlerContext,
    ) -> anyhow::Result<Option<ModuleHandler>> {
        // 输出映射先于子处理器解析，失败时没有需要释放的子模块
        let mappings = composite::output_mappings(&module_type.outputs)?;
        let parent_config: HashMap<String, Value> = module.configuration.clone().into_iter().collect();
        let mut children: Vec<(Module, ModuleHandler)> = Vec::with_capacity(module_type.children.len());

        for child in &module_type.children {
            let mut resolved = child.clone();
            let configuration = match reference::resolve_configuration(&child.configuration, &parent_config) {
                Ok(configuration) => configuration,
                Err(e) => {
                    self.release_children(children, rule_uid);
                    return Err(anyhow!("Child '{}' of composite type '{}': {}", child.id, module_type.uid, e));
                }
            };
            resolved.configuration = configuration;

            match self.create_handler(&resolved, rule_uid, context) {
                Ok(Some(handler)) if handler.kind() == module_type.kind => children.push((resolved, handler)),
                Ok(Some(handler)) => {
                    let error = anyhow!(
                        "Child '{}' of composite type '{}' is a {}, expected a {}",
                        child.id,
                        module_type.uid,
                        handler.kind(),
                        module_type.kind
                    );
                    children.push((resolved, handler));
                    self.release_children(children, rule_uid);
                    return Err(error);
                }
                Ok(None) => {
                    warn!(
                        rule_uid = %rule_uid,
                        module_id = %module.id,
                        child = %child.id,
                        type_uid = %child.type_uid,
                        "Missing handler for composite child"
                    );
                    self.release_children(children, rule_uid);
                    return Ok(None);
                }
                Err(e) => {
                    self.release_children(children, rule_uid);
                    return Err(e);
                }
            }
        }

        let handler = match module_type.kind {
            ModuleKind::Trigger => {
                let children = children
                    .into_iter()
                    .filter_map(|(m, h)| match h {
                        ModuleHandler::Trigger(h) => Some(Child::new(m, h)),
                        _ => None,
                    })
                    .collect();
                ModuleHandler::trigger(CompositeTriggerHandler::with_mappings(children, mappings))
            }
            ModuleKind::Condition => {
                let children = children
                    .into_iter()
                    .filter_map(|(m, h)| match h {
                        ModuleHandler::Condition(h) => Some(Child::new(m, h)),
                        _ => None,
                    })
                    .collect();
                ModuleHandler::condition(CompositeConditionHandler::new(module.id.clone(), children))
            }
            ModuleKind::Action => {
                let children = children
                    .into_iter()
                    .filter_map(|(m, h)| match h {
                        ModuleHandler::Action(h) => Some(Child::new(m, h)),
                        _ => None,
                    })
                    .collect();
                ModuleHandler::action(CompositeActionHandler::with_mappings(module.id.clone(), children, mappings))
            }
        };
        Ok(Some(handler))
    }

    fn release_children(&self, children: Vec<(Module, ModuleHandler)>, rule_uid: &str) {
        let mut handlers = Vec::with_capacity(children.len());
        for (child, handler) in children {
            self.release_handler(&child, rule_uid);
            handlers.push(handler);
        }
        if let Ok(runtime) = tokio::runtime::Handle::try_current() {
            runtime.spawn(async move {
                for handler in handlers {
                    handler.dispose().await;
                }
            });
        }
    }

    /// 通知工厂处理器已释放（复合类型递归到子模块）
    pub fn release_handler(&self, module: &Module, rule_uid: &str) {
        if let Some(factory) = self.factory_for(&module.type_uid) {
            factory.release_handler(module, rule_uid);
        } else if let Some(module_type) = self.module_types.get(&module.type_uid) {
            for child in &module_type.children {
                self.release_handler(child, rule_uid);
            }
        }
    }

    /// 模块依赖的所有类型（包括复合类型的子模块类型）
    pub fn dependent_types(&self, module: &Module) -> Vec<String> {
        let mut types = vec![module.type_uid.clone()];
        self.collect_child_types(&module.type_uid, &mut types, 0);
        types
    }

    fn collect_child_types(&self, type_uid: &str, types: &mut Vec<String>, depth: usize) {
        // 防止复合类型定义互相嵌套导致无限递归
        if depth > 32 {
            return;
        }
        if let Some(module_type) = self.module_types.get(type_uid) {
            for child in &module_type.children {
                types.push(child.type_uid.clone());
                self.collect_child_types(&child.type_uid, types, depth + 1);
            }
        }
    }

    /// 检查复合类型的嵌套深度
    pub fn check_nesting(&self, module: &Module) -> anyhow::Result<()> {
        fn walk(registry: &ModuleTypeRegistry, type_uid: &str, stack: &mut Vec<String>) -> anyhow::Result<()> {
            if stack.iter().any(|t| t == type_uid) {
                bail!("Composite type '{}' contains itself", type_uid);
            }
            if let Some(module_type) = registry.get(type_uid) {
                stack.push(type_uid.to_string());
                for child in &module_type.children {
                    walk(registry, &child.type_uid, stack)?;
                }
                stack.pop();
            }
            Ok(())
        }
        walk(&self.module_types, &module.type_uid, &mut Vec::new())
    }
}
