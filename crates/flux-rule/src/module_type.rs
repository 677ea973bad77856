use crate::model::ModuleType;
use std::collections::HashMap;
use std::sync::RwLock;
use tracing::{error, info};

/// 模块类型注册表（复合类型定义的来源）
#[derive(Default)]
pub struct ModuleTypeRegistry {
    types: RwLock<HashMap<String, ModuleType>>,
}

impl ModuleTypeRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// 添加或替换类型，返回被替换的旧定义
    pub fn add(&self, module_type: ModuleType) -> Option<ModuleType> {
        info!(
            type_uid = %module_type.uid,
            kind = %module_type.kind,
            composite = module_type.is_composite(),
            "Module type registered"
        );
        match self.types.write() {
            Ok(mut types) => types.insert(module_type.uid.clone(), module_type),
            Err(e) => {
                error!("Failed to acquire write lock for module types: {}", e);
                None
            }
        }
    }

    pub fn get(&self, uid: &str) -> Option<ModuleType> {
        self.types.read().ok().and_then(|types| types.get(uid).cloned())
    }

    pub fn remove(&self, uid: &str) -> Option<ModuleType> {
        self.types.write().ok().and_then(|mut types| types.remove(uid))
    }

    pub fn list(&self) -> Vec<ModuleType> {
        self.types
            .read()
            .map(|types| types.values().cloned().collect())
            .unwrap_or_default()
    }
}
