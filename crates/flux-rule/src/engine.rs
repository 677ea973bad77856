use crate::connection::{self, Connections};
use crate::context::{put_outputs, ExecutionContext, Outputs};
use crate::error::{Result, RuleError};
use crate::execution::{source_label, ExecutionHistory, ExecutionStatus, RuleExecution};
use crate::factory::{HandlerFactoryRegistry, ModuleHandlerFactory};
use crate::handler::{
    ActionHandler, ConditionHandler, ConditionOutcome, HandlerContext, ModuleHandler, ModuleHandlerCallback,
    TriggerCallback, TriggerHandler,
};
use crate::handlers::CoreModuleHandlerFactory;
use crate::model::{Module, ModuleKind, ModuleType, Rule};
use crate::module_type::ModuleTypeRegistry;
use crate::reference;
use crate::status::{RuleStatus, RuleStatusDetail, RuleStatusInfo};
use crate::storage::RuleRegistry;
use async_trait::async_trait;
use chrono::Utc;
use flux_config::{ConcurrencyPolicy, EngineConfig};
use flux_core::{events, EventBus, ExecutionSource};
use flux_scheduler::{task, CronScheduler, Scheduler, Timer};
use flux_script::ScriptEngine;
use serde_json::Value;
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, Weak};
use tokio::runtime::Handle;
use tokio::sync::RwLock;
use tracing::{debug, error, info, warn};

/// 激活期间的模块及其处理器
struct ActiveModule<H: ?Sized> {
    module: Module,
    connections: Connections,
    handler: Arc<H>,
}

/// 规则一次激活创建的全部处理器
struct ActiveHandlers {
    triggers: Vec<ActiveModule<dyn TriggerHandler>>,
    conditions: Vec<ActiveModule<dyn ConditionHandler>>,
    actions: Vec<ActiveModule<dyn ActionHandler>>,
    callbacks: Vec<Arc<RuleTriggerCallback>>,
    /// 依赖的模块类型（含复合类型的子类型）
    types: HashSet<String>,
}

impl ActiveHandlers {
    fn modules(&self) -> impl Iterator<Item = (&Module, ModuleHandler)> {
        self.triggers
            .iter()
            .map(|m| (&m.module, ModuleHandler::Trigger(m.handler.clone())))
            .chain(
                self.conditions
                    .iter()
                    .map(|m| (&m.module, ModuleHandler::Condition(m.handler.clone()))),
            )
            .chain(
                self.actions
                    .iter()
                    .map(|m| (&m.module, ModuleHandler::Action(m.handler.clone()))),
            )
    }
}

struct RuleState {
    info: RuleStatusInfo,
    enabled: bool,
    handlers: Option<Arc<ActiveHandlers>>,
    init_timer: Option<Timer>,
}

/// 规则的运行时状态
///
/// - `state`：状态机，同一规则的所有状态转换都在这把锁内完成
/// - `run_lock`：同一规则的动作序列不会并发执行
/// - `lifecycle`：激活/停用/更新/删除串行化
struct ManagedRule {
    uid: String,
    state: Mutex<RuleState>,
    run_lock: tokio::sync::Mutex<()>,
    lifecycle: tokio::sync::Mutex<()>,
}

impl ManagedRule {
    fn new(uid: &str) -> Self {
        Self {
            uid: uid.to_string(),
            state: Mutex::new(RuleState {
                info: RuleStatusInfo::default(),
                enabled: true,
                handlers: None,
                init_timer: None,
            }),
            run_lock: tokio::sync::Mutex::new(()),
            lifecycle: tokio::sync::Mutex::new(()),
        }
    }

    fn state(&self) -> MutexGuard<'_, RuleState> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn is_running(&self) -> bool {
        self.state().info.status == RuleStatus::Running
    }
}

/// 规则引擎
///
/// 管理规则的生命周期（状态机）并执行触发：条件按顺序评估，全部满足后按顺序执行动作。
pub struct RuleEngine {
    self_ref: Weak<RuleEngine>,

    config: EngineConfig,

    /// 规则定义
    registry: RuleRegistry,

    /// 规则运行时状态
    rules: RwLock<HashMap<String, Arc<ManagedRule>>>,

    factories: HandlerFactoryRegistry,

    /// 执行历史
    history: ExecutionHistory,

    event_bus: Arc<EventBus>,
    scheduler: Arc<Scheduler>,
    cron: Arc<CronScheduler>,

    /// Rhai 脚本引擎
    script_engine: Arc<ScriptEngine>,

    /// 规则初始化在这个运行时上执行
    runtime: Handle,

    disposed: AtomicBool,
}

impl RuleEngine {
    /// 创建引擎并注册内置处理器工厂
    pub fn new(config: EngineConfig, scheduler: Arc<Scheduler>, event_bus: Arc<EventBus>) -> Arc<Self> {
        let runtime = Handle::try_current().unwrap_or_else(|_| scheduler.handle().clone());
        let engine = Arc::new_cyclic(|self_ref| Self {
            self_ref: self_ref.clone(),
            history: ExecutionHistory::new(config.execution_history_limit),
            config,
            registry: RuleRegistry::new(),
            rules: RwLock::new(HashMap::new()),
            factories: HandlerFactoryRegistry::new(Arc::new(ModuleTypeRegistry::new())),
            event_bus,
            scheduler,
            cron: Arc::new(CronScheduler::new()),
            script_engine: Arc::new(ScriptEngine::new()),
            runtime,
            disposed: AtomicBool::new(false),
        });
        engine.factories.add_factory(Arc::new(CoreModuleHandlerFactory::new()));
        info!(policy = ?engine.config.concurrency_policy, "Rule engine created");
        engine
    }

    pub fn event_bus(&self) -> &Arc<EventBus> {
        &self.event_bus
    }

    pub fn module_types(&self) -> &Arc<ModuleTypeRegistry> {
        self.factories.module_types()
    }

    fn ensure_active(&self) -> Result<()> {
        if self.disposed.load(Ordering::SeqCst) {
            return Err(RuleError::Disposed);
        }
        Ok(())
    }

    async fn managed(&self, uid: &str) -> Option<Arc<ManagedRule>> {
        self.rules.read().await.get(uid).cloned()
    }

    fn handler_context(&self) -> HandlerContext {
        HandlerContext {
            callback: Arc::new(EngineCallback {
                engine: self.self_ref.clone(),
            }),
            scheduler: self.scheduler.clone(),
            cron: self.cron.clone(),
            event_bus: self.event_bus.clone(),
            script_engine: self.script_engine.clone(),
        }
    }

    // ---------------------------------------------------------------
    // 规则管理
    // ---------------------------------------------------------------

    /// 添加规则，UID 为空时自动生成
    ///
    /// # 错误
    /// - [`RuleError::AlreadyExists`]：UID 已存在
    pub async fn add_rule(&self, mut rule: Rule) -> Result<String> {
        self.ensure_active()?;
        if rule.uid.trim().is_empty() {
            rule.uid = uuid::Uuid::new_v4().to_string();
        }
        let uid = rule.uid.clone();

        let managed = {
            let mut rules = self.rules.write().await;
            if rules.contains_key(&uid) {
                return Err(RuleError::AlreadyExists(uid));
            }
            let managed = Arc::new(ManagedRule::new(&uid));
            rules.insert(uid.clone(), managed.clone());
            managed
        };
        self.registry.save(rule).await;
        info!(rule_uid = %uid, "Rule added");

        let _lifecycle = managed.lifecycle.lock().await;
        self.activate(&managed).await;
        Ok(uid)
    }

    /// 替换规则的模块列表，并重新激活
    pub async fn update_rule(&self, rule: Rule) -> Result<()> {
        self.ensure_active()?;
        let managed = self
            .managed(&rule.uid)
            .await
            .ok_or_else(|| RuleError::NotFound(rule.uid.clone()))?;

        let _lifecycle = managed.lifecycle.lock().await;
        self.deactivate(&managed).await;
        self.registry.save(rule).await;
        info!(rule_uid = %managed.uid, "Rule updated");

        if managed.state().enabled {
            self.update_status(&managed, RuleStatusInfo::new(RuleStatus::Uninitialized));
            self.activate(&managed).await;
        }
        Ok(())
    }

    /// 删除规则并释放其处理器和定时器
    pub async fn remove_rule(&self, uid: &str) -> Result<Rule> {
        let managed = self
            .rules
            .write()
            .await
            .remove(uid)
            .ok_or_else(|| RuleError::NotFound(uid.to_string()))?;

        let _lifecycle = managed.lifecycle.lock().await;
        cancel_init_timer(&managed);
        self.deactivate(&managed).await;
        let rule = self
            .registry
            .delete(uid)
            .await
            .ok_or_else(|| RuleError::NotFound(uid.to_string()))?;
        info!(rule_uid = %uid, "Rule removed");
        Ok(rule)
    }

    pub async fn get_rule(&self, uid: &str) -> Option<Rule> {
        self.registry.get(uid).await
    }

    pub async fn list_rules(&self) -> Vec<Rule> {
        self.registry.list().await
    }

    /// 按标签查找规则
    pub async fn rules_by_tag(&self, tag: &str) -> Vec<Rule> {
        self.registry.find_by_tag(tag).await
    }

    /// 按 UID 前缀（`prefix:`）查找规则
    pub async fn rules_by_prefix(&self, prefix: &str) -> Vec<Rule> {
        self.registry.find_by_prefix(prefix).await
    }

    /// 启用/禁用规则
    ///
    /// 禁用会注销触发器并进入 DISABLED；启用重新进入 INITIALIZING。
    pub async fn set_enabled(&self, uid: &str, enabled: bool) -> Result<()> {
        self.ensure_active()?;
        let managed = self
            .managed(uid)
            .await
            .ok_or_else(|| RuleError::NotFound(uid.to_string()))?;

        let _lifecycle = managed.lifecycle.lock().await;
        let was_enabled = std::mem::replace(&mut managed.state().enabled, enabled);
        if was_enabled == enabled {
            debug!(rule_uid = %uid, enabled, "Rule enablement unchanged");
            return Ok(());
        }

        if enabled {
            info!(rule_uid = %uid, "Rule enabled");
            self.update_status(&managed, RuleStatusInfo::new(RuleStatus::Uninitialized));
            self.activate(&managed).await;
        } else {
            info!(rule_uid = %uid, "Rule disabled");
            cancel_init_timer(&managed);
            self.deactivate(&managed).await;
            self.update_status(&managed, RuleStatusInfo::disabled());
        }
        Ok(())
    }

    pub async fn is_enabled(&self, uid: &str) -> Option<bool> {
        Some(self.managed(uid).await?.state().enabled)
    }

    pub async fn status(&self, uid: &str) -> Option<RuleStatus> {
        Some(self.managed(uid).await?.state().info.status)
    }

    pub async fn status_info(&self, uid: &str) -> Option<RuleStatusInfo> {
        Some(self.managed(uid).await?.state().info.clone())
    }

    // ---------------------------------------------------------------
    // 处理器工厂 / 模块类型
    // ---------------------------------------------------------------

    /// 注册工厂；等待处理器的规则在延迟后重新初始化
    pub async fn add_handler_factory(&self, factory: Arc<dyn ModuleHandlerFactory>) {
        self.factories.add_factory(factory);
        self.schedule_uninitialized().await;
    }

    /// 移除工厂；使用其类型的规则回到 UNINITIALIZED
    pub async fn remove_handler_factory(&self, factory: &Arc<dyn ModuleHandlerFactory>) {
        let removed: HashSet<String> = self.factories.remove_factory(factory).into_iter().collect();
        if removed.is_empty() {
            return;
        }

        let rules: Vec<_> = self.rules.read().await.values().cloned().collect();
        for managed in rules {
            let affected = {
                let state = managed.state();
                state
                    .handlers
                    .as_ref()
                    .and_then(|h| h.types.intersection(&removed).next().cloned())
            };
            let Some(type_uid) = affected else {
                continue;
            };

            let _lifecycle = managed.lifecycle.lock().await;
            self.deactivate(&managed).await;
            warn!(rule_uid = %managed.uid, type_uid = %type_uid, "Handler factory removed, rule uninitialized");
            self.update_status(
                &managed,
                RuleStatusInfo::with_detail(
                    RuleStatus::Uninitialized,
                    RuleStatusDetail::HandlerMissingError,
                    format!("Handler factory for module type '{}' was removed", type_uid),
                ),
            );
        }
    }

    /// 注册模块类型（通常是复合类型）
    pub async fn add_module_type(&self, module_type: ModuleType) {
        self.factories.module_types().add(module_type);
        self.schedule_uninitialized().await;
    }

    async fn schedule_uninitialized(&self) {
        let rules: Vec<_> = self.rules.read().await.values().cloned().collect();
        for managed in rules {
            let waiting = {
                let state = managed.state();
                state.enabled && state.info.status == RuleStatus::Uninitialized
            };
            if waiting {
                self.schedule_initialization(&managed);
            }
        }
    }

    /// 延迟 `rule_init_delay_ms` 后重新初始化（重复调用只延后一次）
    fn schedule_initialization(&self, managed: &Arc<ManagedRule>) {
        let delay = chrono::Duration::milliseconds(self.config.rule_init_delay_ms as i64);
        let at = Utc::now() + delay;

        let mut state = managed.state();
        if let Some(timer) = &state.init_timer {
            if timer.reschedule(at) {
                return;
            }
        }

        let engine = self.self_ref.clone();
        let runtime = self.runtime.clone();
        let uid = managed.uid.clone();
        debug!(rule_uid = %uid, delay_ms = self.config.rule_init_delay_ms, "Rule initialization scheduled");
        state.init_timer = Some(self.scheduler.schedule(
            task(move || {
                let engine = engine.clone();
                let runtime = runtime.clone();
                let uid = uid.clone();
                async move {
                    if let Some(engine) = engine.upgrade() {
                        runtime.spawn(async move { engine.reinitialize(&uid).await }).await?;
                    }
                    Ok(())
                }
            }),
            at,
        ));
    }

    async fn reinitialize(&self, uid: &str) {
        if self.disposed.load(Ordering::SeqCst) {
            return;
        }
        let Some(managed) = self.managed(uid).await else {
            return;
        };
        let _lifecycle = managed.lifecycle.lock().await;
        let waiting = {
            let state = managed.state();
            state.enabled && state.info.status == RuleStatus::Uninitialized
        };
        if waiting {
            self.activate(&managed).await;
        }
    }

    // ---------------------------------------------------------------
    // 激活 / 停用（调用方持有 lifecycle 锁）
    // ---------------------------------------------------------------

    async fn activate(&self, managed: &Arc<ManagedRule>) {
        if !managed.state().enabled {
            return;
        }
        let Some(rule) = self.registry.get(&managed.uid).await else {
            return;
        };
        let uid = managed.uid.as_str();

        self.update_status(managed, RuleStatusInfo::new(RuleStatus::Initializing));

        let prepared = match self.prepare_modules(&rule) {
            Ok(prepared) => prepared,
            Err(reason) => {
                warn!(rule_uid = %uid, reason = %reason, "Invalid rule");
                self.update_status(
                    managed,
                    RuleStatusInfo::with_detail(RuleStatus::Uninitialized, RuleStatusDetail::InvalidRule, reason),
                );
                return;
            }
        };

        let handlers = match self.create_handlers(uid, prepared).await {
            Ok(handlers) => handlers,
            Err(status) => {
                warn!(rule_uid = %uid, status = %status, "Failed to create rule handlers");
                self.update_status(managed, status);
                return;
            }
        };

        let mut callbacks = Vec::with_capacity(handlers.triggers.len());
        let mut failure = None;
        for trigger in &handlers.triggers {
            let callback = Arc::new(RuleTriggerCallback {
                engine: self.self_ref.clone(),
                rule_uid: uid.to_string(),
                trigger_id: trigger.module.id.clone(),
                active: AtomicBool::new(true),
            });
            callbacks.push(callback.clone());

            if let Err(e) = trigger.handler.register(callback).await {
                error!(rule_uid = %uid, module_id = %trigger.module.id, error = %e, "Failed to register trigger");
                failure = Some(format!("Trigger '{}' failed to register: {:#}", trigger.module.id, e));
                break;
            }
        }

        let handlers = ActiveHandlers { callbacks, ..handlers };
        if let Some(reason) = failure {
            self.release_handlers(uid, &handlers).await;
            self.update_status(
                managed,
                RuleStatusInfo::with_detail(
                    RuleStatus::Uninitialized,
                    RuleStatusDetail::HandlerInitializingError,
                    reason,
                ),
            );
            return;
        }

        let handlers = Arc::new(handlers);
        let (old, new) = {
            let mut state = managed.state();
            state.handlers = Some(handlers);
            let new = RuleStatusInfo::new(RuleStatus::Idle);
            (std::mem::replace(&mut state.info, new.clone()), new)
        };
        self.publish_status(uid, &old, &new);
        info!(rule_uid = %uid, "Rule initialized");
    }

    /// 校验结构并用规则级配置解析模块配置
    fn prepare_modules(&self, rule: &Rule) -> std::result::Result<Vec<(ModuleKind, Module, Connections)>, String> {
        connection::validate_rule(rule)?;

        let rule_config: HashMap<String, Value> = rule.configuration.clone().into_iter().collect();
        rule.modules()
            .map(|(kind, module)| -> std::result::Result<_, String> {
                self.factories.check_nesting(module).map_err(|e| e.to_string())?;
                let mut resolved = module.clone();
                resolved.configuration = reference::resolve_configuration(&module.configuration, &rule_config)
                    .map_err(|e| format!("Module '{}': {}", module.id, e))?;
                let connections = connection::parse_inputs(&module.inputs)
                    .map_err(|e| format!("Module '{}': {}", module.id, e))?;
                Ok((kind, resolved, connections))
            })
            .collect()
    }

    async fn create_handlers(
        &self,
        uid: &str,
        prepared: Vec<(ModuleKind, Module, Connections)>,
    ) -> std::result::Result<ActiveHandlers, RuleStatusInfo> {
        let context = self.handler_context();
        let mut handlers = ActiveHandlers {
            triggers: Vec::new(),
            conditions: Vec::new(),
            actions: Vec::new(),
            callbacks: Vec::new(),
            types: HashSet::new(),
        };
        let mut missing = Vec::new();
        let mut failures = Vec::new();

        for (kind, module, connections) in prepared {
            handlers.types.extend(self.factories.dependent_types(&module));
            match self.factories.create_handler(&module, uid, &context) {
                Ok(Some(handler)) if handler.kind() == kind => match handler {
                    ModuleHandler::Trigger(handler) => handlers.triggers.push(ActiveModule {
                        module,
                        connections,
                        handler,
                    }),
                    ModuleHandler::Condition(handler) => handlers.conditions.push(ActiveModule {
                        module,
                        connections,
                        handler,
                    }),
                    ModuleHandler::Action(handler) => handlers.actions.push(ActiveModule {
                        module,
                        connections,
                        handler,
                    }),
                },
                Ok(Some(handler)) => {
                    failures.push(format!(
                        "Module '{}' of type '{}' is a {}, expected a {}",
                        module.id,
                        module.type_uid,
                        handler.kind(),
                        kind
                    ));
                    handler.dispose().await;
                    self.factories.release_handler(&module, uid);
                }
                Ok(None) => missing.push(format!("Missing handler '{}' for module '{}'", module.type_uid, module.id)),
                Err(e) => failures.push(format!("Module '{}': {:#}", module.id, e)),
            }
        }

        if missing.is_empty() && failures.is_empty() {
            return Ok(handlers);
        }

        self.release_handlers(uid, &handlers).await;
        let status = if !missing.is_empty() {
            RuleStatusInfo::with_detail(
                RuleStatus::Uninitialized,
                RuleStatusDetail::HandlerMissingError,
                missing.join("\n"),
            )
        } else {
            RuleStatusInfo::with_detail(
                RuleStatus::Uninitialized,
                RuleStatusDetail::HandlerInitializingError,
                failures.join("\n"),
            )
        };
        Err(status)
    }

    async fn release_handlers(&self, uid: &str, handlers: &ActiveHandlers) {
        for callback in &handlers.callbacks {
            callback.active.store(false, Ordering::SeqCst);
        }
        for (module, handler) in handlers.modules() {
            handler.dispose().await;
            self.factories.release_handler(module, uid);
        }
    }

    async fn deactivate(&self, managed: &ManagedRule) {
        let handlers = managed.state().handlers.take();
        if let Some(handlers) = handlers {
            self.release_handlers(&managed.uid, &handlers).await;
            debug!(rule_uid = %managed.uid, "Rule handlers released");
        }
    }

    // ---------------------------------------------------------------
    // 状态
    // ---------------------------------------------------------------

    fn update_status(&self, managed: &ManagedRule, info: RuleStatusInfo) {
        let old = std::mem::replace(&mut managed.state().info, info.clone());
        self.publish_status(&managed.uid, &old, &info);
    }

    fn publish_status(&self, uid: &str, old: &RuleStatusInfo, new: &RuleStatusInfo) {
        if old == new {
            return;
        }
        debug!(rule_uid = %uid, from = %old.status, to = %new.status, "Rule status changed");
        let to_value = |info: &RuleStatusInfo| serde_json::to_value(info).unwrap_or(Value::Null);
        self.event_bus
            .emit(events::rule_status_changed(uid, to_value(new), to_value(old)));
    }

    // ---------------------------------------------------------------
    // 执行
    // ---------------------------------------------------------------

    /// 立即执行规则（来源 API），可选择跳过条件
    ///
    /// # 错误
    /// - [`RuleError::NotFound`]：规则不存在
    /// - [`RuleError::NotIdle`]：规则未初始化、已禁用或正在运行
    pub async fn run_now(&self, uid: &str, consider_conditions: bool, context: ExecutionContext) -> Result<()> {
        self.run_now_with_source(uid, consider_conditions, context, ExecutionSource::Api)
            .await
    }

    async fn run_now_with_source(
        &self,
        uid: &str,
        consider_conditions: bool,
        context: ExecutionContext,
        source: ExecutionSource,
    ) -> Result<()> {
        self.ensure_active()?;
        let managed = self
            .managed(uid)
            .await
            .ok_or_else(|| RuleError::NotFound(uid.to_string()))?;

        let Ok(_run) = managed.run_lock.try_lock() else {
            return Err(RuleError::NotIdle {
                uid: uid.to_string(),
                status: RuleStatus::Running,
            });
        };

        let payload = serde_json::to_value(&context).unwrap_or(Value::Null);
        self.event_bus.emit(events::execution_triggered(uid, payload, source));
        self.execute(&managed, context, consider_conditions, source.to_string())
            .await
    }

    /// 触发器触发
    async fn run_triggered(&self, uid: &str, trigger_id: &str, outputs: Outputs) {
        let Some(managed) = self.managed(uid).await else {
            return;
        };

        let _run = match self.config.concurrency_policy {
            ConcurrencyPolicy::Drop => match managed.run_lock.try_lock() {
                Ok(guard) => guard,
                Err(_) => {
                    warn!(rule_uid = %uid, trigger = %trigger_id, "Rule is already running, firing dropped");
                    return;
                }
            },
            ConcurrencyPolicy::Queue => managed.run_lock.lock().await,
        };

        let mut context = ExecutionContext::new();
        put_outputs(&mut context, trigger_id, &outputs);
        if let Err(e) = self
            .execute(&managed, context, true, source_label(Some(trigger_id), None))
            .await
        {
            error!(rule_uid = %uid, error = %e, "Failed to execute rule");
        }
    }

    /// 执行一次（调用方持有 run_lock）
    async fn execute(
        &self,
        managed: &Arc<ManagedRule>,
        context: ExecutionContext,
        consider_conditions: bool,
        source: String,
    ) -> Result<()> {
        let uid = managed.uid.as_str();
        let (handlers, old) = {
            let mut state = managed.state();
            let status = state.info.status;
            let handlers = match state.handlers.clone() {
                Some(handlers) if status == RuleStatus::Idle => handlers,
                _ => {
                    return Err(RuleError::NotIdle {
                        uid: uid.to_string(),
                        status,
                    })
                }
            };
            let old = std::mem::replace(&mut state.info, RuleStatusInfo::new(RuleStatus::Running));
            (handlers, old)
        };
        self.publish_status(uid, &old, &RuleStatusInfo::new(RuleStatus::Running));

        let mut execution = RuleExecution::start(uid, source);
        self.history.record(execution.clone()).await;

        // 模块在独立任务中运行，处理器 panic 时规则仍能回到 IDLE
        let run = tokio::spawn(Self::run_modules(
            managed.clone(),
            handlers,
            context,
            consider_conditions,
        ));
        let (status, error) = match run.await {
            Ok(result) => result,
            Err(e) => {
                error!(rule_uid = %uid, error = %e, "Rule execution panicked");
                (ExecutionStatus::Failed, Some(format!("Execution panicked: {}", e)))
            }
        };

        let finished = {
            let mut state = managed.state();
            (state.info.status == RuleStatus::Running)
                .then(|| std::mem::replace(&mut state.info, RuleStatusInfo::new(RuleStatus::Idle)))
        };
        if let Some(old) = finished {
            self.publish_status(uid, &old, &RuleStatusInfo::new(RuleStatus::Idle));
        }

        execution.finish(status, error);
        self.history.record(execution).await;
        Ok(())
    }

    async fn run_modules(
        managed: Arc<ManagedRule>,
        handlers: Arc<ActiveHandlers>,
        mut context: ExecutionContext,
        consider_conditions: bool,
    ) -> (ExecutionStatus, Option<String>) {
        let uid = managed.uid.as_str();
        let interrupted = || {
            debug!(rule_uid = %uid, "Rule status changed during execution, stopping");
            (ExecutionStatus::Skipped, Some("Rule left the RUNNING state".to_string()))
        };

        if consider_conditions {
            for condition in &handlers.conditions {
                if !managed.is_running() {
                    return interrupted();
                }
                let module_context = connection::module_context(&condition.connections, &context);
                match ConditionOutcome::evaluate(condition.handler.as_ref(), &module_context).await {
                    ConditionOutcome::Satisfied => {}
                    ConditionOutcome::NotSatisfied => {
                        debug!(rule_uid = %uid, condition = %condition.module.id, "The condition is not satisfied");
                        return (ExecutionStatus::Skipped, None);
                    }
                    ConditionOutcome::Failed(e) => {
                        warn!(rule_uid = %uid, condition = %condition.module.id, error = %e, "Condition evaluation failed");
                        return (ExecutionStatus::Skipped, Some(e));
                    }
                }
            }
        }

        for action in &handlers.actions {
            if !managed.is_running() {
                return interrupted();
            }
            let module_context = connection::module_context(&action.connections, &context);
            match action.handler.execute(&module_context).await {
                Ok(Some(outputs)) => put_outputs(&mut context, &action.module.id, &outputs),
                Ok(None) => {}
                Err(e) => {
                    let message = format!("{:#}", e);
                    error!(
                        rule_uid = %uid,
                        action = %action.module.id,
                        type_uid = %action.module.type_uid,
                        error = %message,
                        "Failed to execute action"
                    );
                    return (ExecutionStatus::Failed, Some(message));
                }
            }
        }
        (ExecutionStatus::Success, None)
    }

    /// 获取执行历史（最新的在前）
    pub async fn execution_history(&self, uid: Option<&str>, limit: usize) -> Vec<RuleExecution> {
        self.history.query(uid, limit).await
    }

    /// 释放所有规则的处理器和定时器
    pub async fn dispose(&self) {
        if self.disposed.swap(true, Ordering::SeqCst) {
            return;
        }
        let rules: Vec<_> = self.rules.read().await.values().cloned().collect();
        for managed in rules {
            let _lifecycle = managed.lifecycle.lock().await;
            cancel_init_timer(&managed);
            self.deactivate(&managed).await;
        }
        if let Err(e) = self.cron.shutdown().await {
            warn!(error = %e, "Failed to stop cron scheduler");
        }
        info!("Rule engine disposed");
    }
}

fn cancel_init_timer(managed: &ManagedRule) {
    if let Some(timer) = managed.state().init_timer.take() {
        timer.cancel();
    }
}

/// 触发器回调，绑定到规则的一次激活
struct RuleTriggerCallback {
    engine: Weak<RuleEngine>,
    rule_uid: String,
    trigger_id: String,
    /// 停用后仍在途的触发被忽略
    active: AtomicBool,
}

#[async_trait]
impl TriggerCallback for RuleTriggerCallback {
    async fn triggered(&self, outputs: Outputs) {
        if !self.active.load(Ordering::SeqCst) {
            debug!(rule_uid = %self.rule_uid, trigger = %self.trigger_id, "Trigger no longer active, ignored");
            return;
        }
        let Some(engine) = self.engine.upgrade() else {
            return;
        };
        let uid = self.rule_uid.clone();
        let trigger_id = self.trigger_id.clone();

        // 在独立任务中执行：触发器被释放时不会中断正在执行的动作
        let run = tokio::spawn(async move { engine.run_triggered(&uid, &trigger_id, outputs).await });
        if let Err(e) = run.await {
            error!(rule_uid = %self.rule_uid, error = %e, "Rule execution task failed");
        }
    }
}

/// 处理器使用的引擎入口
struct EngineCallback {
    engine: Weak<RuleEngine>,
}

impl EngineCallback {
    fn engine(&self) -> Result<Arc<RuleEngine>> {
        self.engine.upgrade().ok_or(RuleError::Disposed)
    }
}

#[async_trait]
impl ModuleHandlerCallback for EngineCallback {
    async fn is_enabled(&self, rule_uid: &str) -> Option<bool> {
        self.engine().ok()?.is_enabled(rule_uid).await
    }

    async fn set_enabled(&self, rule_uid: &str, enabled: bool) -> Result<()> {
        self.engine()?.set_enabled(rule_uid, enabled).await
    }

    async fn status(&self, rule_uid: &str) -> Option<RuleStatus> {
        self.engine().ok()?.status(rule_uid).await
    }

    async fn run_now(
        &self,
        rule_uid: &str,
        consider_conditions: bool,
        context: ExecutionContext,
        source: ExecutionSource,
    ) -> Result<()> {
        self.engine()?
            .run_now_with_source(rule_uid, consider_conditions, context, source)
            .await
    }
}
