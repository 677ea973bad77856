//! 复合模块处理器
//!
//! 子模块按声明顺序执行。子模块的上下文是父上下文加上其 `${parentInput}` 输入，
//! 兄弟模块的输出彼此不可见，只能通过父模块声明的输出映射暴露。

use crate::context::{ExecutionContext, Outputs};
use crate::handler::{ActionHandler, ConditionHandler, TriggerCallback, TriggerHandler};
use crate::model::{Module, Output};
use crate::reference::{self, ReferenceError};
use anyhow::Context as _;
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, warn};

/// 父输出 ← `childId.outputKey[.path]`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutputMapping {
    pub child_id: String,
    pub output_key: String,
    pub path: Vec<String>,
    pub parent_output: String,
}

/// 预先解析输出引用，保持声明顺序
///
/// 一个输出可以有多个逗号分隔的引用，后声明的匹配覆盖先声明的。
pub fn output_mappings(outputs: &[Output]) -> Result<Vec<OutputMapping>, ReferenceError> {
    let mut mappings = Vec::new();
    for output in outputs {
        let Some(references) = &output.reference else {
            continue;
        };
        for part in references.split(',') {
            let part = reference::reference_key(part).unwrap_or(part).trim();
            if part.is_empty() {
                continue;
            }
            let mut tokens = reference::split_reference_to_tokens(part)?.into_iter();
            match (tokens.next(), tokens.next()) {
                (Some(child_id), Some(output_key)) => mappings.push(OutputMapping {
                    child_id,
                    output_key,
                    path: tokens.collect(),
                    parent_output: output.name.clone(),
                }),
                _ => warn!(
                    output = %output.name,
                    reference = %part,
                    "Output reference does not name a child output, ignored"
                ),
            }
        }
    }
    Ok(mappings)
}

/// 把子模块输出投影到父输出；没有任何输出时返回 None
pub fn aggregate_outputs(mappings: &[OutputMapping], child_outputs: &HashMap<String, Outputs>) -> Option<Outputs> {
    let mut result = Outputs::new();
    for mapping in mappings {
        let Some(value) = child_outputs
            .get(&mapping.child_id)
            .and_then(|outputs| outputs.get(&mapping.output_key))
        else {
            continue;
        };
        if let Some(resolved) = reference::resolve_tokens(value, &mapping.path) {
            result.insert(mapping.parent_output.clone(), resolved.clone());
        }
    }
    (!result.is_empty()).then_some(result)
}

fn child_context(child: &Module, parent: &ExecutionContext) -> ExecutionContext {
    let mut context = parent.clone();
    context.extend(reference::composite_child_context(&child.inputs, parent));
    context
}

/// 子模块及其处理器
pub struct Child<H: ?Sized> {
    pub module: Module,
    pub handler: Arc<H>,
}

impl<H: ?Sized> Child<H> {
    pub fn new(module: Module, handler: Arc<H>) -> Self {
        Self { module, handler }
    }
}

/// 复合动作
pub struct CompositeActionHandler {
    module_id: String,
    children: Vec<Child<dyn ActionHandler>>,
    mappings: Vec<OutputMapping>,
}

impl CompositeActionHandler {
    pub fn new(
        module_id: impl Into<String>,
        children: Vec<Child<dyn ActionHandler>>,
        outputs: &[Output],
    ) -> Result<Self, ReferenceError> {
        Ok(Self::with_mappings(module_id, children, output_mappings(outputs)?))
    }

    /// 使用预先解析的输出映射
    pub fn with_mappings(
        module_id: impl Into<String>,
        children: Vec<Child<dyn ActionHandler>>,
        mappings: Vec<OutputMapping>,
    ) -> Self {
        Self {
            module_id: module_id.into(),
            children,
            mappings,
        }
    }
}

#[async_trait]
impl ActionHandler for CompositeActionHandler {
    async fn execute(&self, context: &ExecutionContext) -> anyhow::Result<Option<Outputs>> {
        let mut child_outputs = HashMap::new();
        for child in &self.children {
            let outputs = child
                .handler
                .execute(&child_context(&child.module, context))
                .await
                .with_context(|| {
                    format!("Child '{}' of composite '{}' failed", child.module.id, self.module_id)
                })?;
            if let Some(outputs) = outputs {
                child_outputs.insert(child.module.id.clone(), outputs);
            }
        }
        debug!(module_id = %self.module_id, children = self.children.len(), "Composite action executed");
        Ok(aggregate_outputs(&self.mappings, &child_outputs))
    }

    async fn dispose(&self) {
        for child in &self.children {
            child.handler.dispose().await;
        }
    }
}

/// 复合条件：所有子条件都满足
pub struct CompositeConditionHandler {
    module_id: String,
    children: Vec<Child<dyn ConditionHandler>>,
}

impl CompositeConditionHandler {
    pub fn new(module_id: impl Into<String>, children: Vec<Child<dyn ConditionHandler>>) -> Self {
        Self {
            module_id: module_id.into(),
            children,
        }
    }
}

#[async_trait]
impl ConditionHandler for CompositeConditionHandler {
    async fn is_satisfied(&self, context: &ExecutionContext) -> anyhow::Result<bool> {
        for child in &self.children {
            let satisfied = child
                .handler
                .is_satisfied(&child_context(&child.module, context))
                .await
                .with_context(|| {
                    format!("Child '{}' of composite '{}' failed", child.module.id, self.module_id)
                })?;
            if !satisfied {
                debug!(module_id = %self.module_id, child = %child.module.id, "Composite condition not satisfied");
                return Ok(false);
            }
        }
        Ok(true)
    }

    async fn dispose(&self) {
        for child in &self.children {
            child.handler.dispose().await;
        }
    }
}

/// 复合触发器：任一子触发器触发即触发
pub struct CompositeTriggerHandler {
    children: Vec<Child<dyn TriggerHandler>>,
    mappings: Arc<Vec<OutputMapping>>,
}

impl CompositeTriggerHandler {
    pub fn new(children: Vec<Child<dyn TriggerHandler>>, outputs: &[Output]) -> Result<Self, ReferenceError> {
        Ok(Self::with_mappings(children, output_mappings(outputs)?))
    }

    pub fn with_mappings(children: Vec<Child<dyn TriggerHandler>>, mappings: Vec<OutputMapping>) -> Self {
        Self {
            children,
            mappings: Arc::new(mappings),
        }
    }
}

struct ChildTriggerCallback {
    child_id: String,
    mappings: Arc<Vec<OutputMapping>>,
    parent: Arc<dyn TriggerCallback>,
}

#[async_trait]
impl TriggerCallback for ChildTriggerCallback {
    async fn triggered(&self, outputs: Outputs) {
        let child_outputs = HashMap::from([(self.child_id.clone(), outputs)]);
        let outputs = aggregate_outputs(&self.mappings, &child_outputs).unwrap_or_default();
        self.parent.triggered(outputs).await;
    }
}

#[async_trait]
impl TriggerHandler for CompositeTriggerHandler {
    async fn register(&self, callback: Arc<dyn TriggerCallback>) -> anyhow::Result<()> {
        for child in &self.children {
            let child_callback = Arc::new(ChildTriggerCallback {
                child_id: child.module.id.clone(),
                mappings: self.mappings.clone(),
                parent: callback.clone(),
            });
            child
                .handler
                .register(child_callback)
                .await
                .with_context(|| format!("Failed to register child trigger '{}'", child.module.id))?;
        }
        Ok(())
    }

    async fn dispose(&self) {
        for child in &self.children {
            child.handler.dispose().await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::{json, Value};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tokio::sync::Mutex;

    /// 返回固定输出并记录调用次数
    struct FixedAction {
        outputs: Option<Outputs>,
        fail: bool,
        calls: Arc<AtomicUsize>,
    }

    #[async_trait]
    impl ActionHandler for FixedAction {
        async fn execute(&self, _context: &ExecutionContext) -> anyhow::Result<Option<Outputs>> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            anyhow::ensure!(!self.fail, "child failed");
            Ok(self.outputs.clone())
        }
    }

    fn fixed(id: &str, outputs: Value, calls: &Arc<AtomicUsize>) -> Child<dyn ActionHandler> {
        let outputs: Outputs = serde_json::from_value(outputs).unwrap();
        Child::new(
            Module::new(id, "test.Fixed"),
            Arc::new(FixedAction {
                outputs: Some(outputs),
                fail: false,
                calls: calls.clone(),
            }) as Arc<dyn ActionHandler>,
        )
    }

    #[test]
    fn test_output_mappings_in_declaration_order() {
        let outputs = vec![
            Output::new("first", "number").with_reference("c1.out, ${c2.value.items[1]}"),
            Output::new("plain", "number"),
        ];
        let mappings = output_mappings(&outputs).unwrap();
        assert_eq!(mappings.len(), 2);
        assert_eq!(mappings[0].child_id, "c1");
        assert!(mappings[0].path.is_empty());
        assert_eq!(mappings[1].child_id, "c2");
        assert_eq!(mappings[1].output_key, "value");
        assert_eq!(mappings[1].path, vec!["items", "1"]);
        assert_eq!(mappings[1].parent_output, "first");
    }

    #[tokio::test]
    async fn test_only_mapped_child_output_is_exposed() {
        let calls = Arc::new(AtomicUsize::new(0));
        let handler = CompositeActionHandler::new(
            "composite",
            vec![fixed("c1", json!({"out": 10}), &calls), fixed("c2", json!({"out": 20}), &calls)],
            &[Output::new("parentName", "number").with_reference("c1.out")],
        )
        .unwrap();

        let outputs = handler.execute(&ExecutionContext::new()).await.unwrap();
        assert_eq!(outputs, Some(Outputs::from([("parentName".to_string(), json!(10))])));
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_last_declared_reference_wins() {
        let calls = Arc::new(AtomicUsize::new(0));
        let handler = CompositeActionHandler::new(
            "composite",
            vec![fixed("c1", json!({"out": 1}), &calls), fixed("c2", json!({"out": 2}), &calls)],
            &[Output::new("result", "number").with_reference("c2.out,c1.out")],
        )
        .unwrap();

        let outputs = handler.execute(&ExecutionContext::new()).await.unwrap().unwrap();
        assert_eq!(outputs["result"], json!(1));

        // 相同输入重复执行得到相同结果
        let again = handler.execute(&ExecutionContext::new()).await.unwrap().unwrap();
        assert_eq!(outputs, again);
    }

    #[tokio::test]
    async fn test_unresolved_remainder_is_skipped() {
        let calls = Arc::new(AtomicUsize::new(0));
        let handler = CompositeActionHandler::new(
            "composite",
            vec![fixed("c1", json!({"out": {"a": [1, 2]}}), &calls)],
            &[
                Output::new("second", "number").with_reference("c1.out.a[1]"),
                Output::new("missing", "number").with_reference("c1.out.b"),
            ],
        )
        .unwrap();

        let outputs = handler.execute(&ExecutionContext::new()).await.unwrap().unwrap();
        assert_eq!(outputs.len(), 1);
        assert_eq!(outputs["second"], json!(2));
    }

    #[tokio::test]
    async fn test_no_outputs_is_none_but_null_is_kept() {
        let calls = Arc::new(AtomicUsize::new(0));
        let empty = CompositeActionHandler::new("composite", vec![fixed("c1", json!({}), &calls)], &[
            Output::new("x", "any").with_reference("c1.out"),
        ])
        .unwrap();
        assert_eq!(empty.execute(&ExecutionContext::new()).await.unwrap(), None);

        let null = CompositeActionHandler::new("composite", vec![fixed("c1", json!({"out": null}), &calls)], &[
            Output::new("x", "any").with_reference("c1.out"),
        ])
        .unwrap();
        let outputs = null.execute(&ExecutionContext::new()).await.unwrap().unwrap();
        assert_eq!(outputs["x"], Value::Null);
    }

    #[tokio::test]
    async fn test_child_failure_stops_remaining_children() {
        let calls = Arc::new(AtomicUsize::new(0));
        let failing = Child::new(
            Module::new("bad", "test.Fixed"),
            Arc::new(FixedAction {
                outputs: None,
                fail: true,
                calls: calls.clone(),
            }) as Arc<dyn ActionHandler>,
        );
        let handler = CompositeActionHandler::new(
            "composite",
            vec![fixed("c1", json!({"out": 1}), &calls), failing, fixed("c3", json!({"out": 3}), &calls)],
            &[],
        )
        .unwrap();

        let err = handler.execute(&ExecutionContext::new()).await.unwrap_err();
        assert!(format!("{:#}", err).contains("Child 'bad'"));
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    /// 读取子上下文中的 `input` 并判断是否大于 10
    struct AboveTen;

    #[async_trait]
    impl ConditionHandler for AboveTen {
        async fn is_satisfied(&self, context: &ExecutionContext) -> anyhow::Result<bool> {
            let value = context
                .get("input")
                .and_then(Value::as_f64)
                .ok_or_else(|| anyhow::anyhow!("missing input"))?;
            Ok(value > 10.0)
        }
    }

    #[tokio::test]
    async fn test_composite_condition_is_logical_and() {
        let child = |id: &str, input: &str| {
            Child::new(
                Module::new(id, "test.AboveTen").with_input("input", input),
                Arc::new(AboveTen) as Arc<dyn ConditionHandler>,
            )
        };
        let handler =
            CompositeConditionHandler::new("both", vec![child("a", "${left}"), child("b", "${right}")]);

        let context = |l: i64, r: i64| {
            ExecutionContext::from([("left".to_string(), json!(l)), ("right".to_string(), json!(r))])
        };
        assert!(handler.is_satisfied(&context(11, 12)).await.unwrap());
        assert!(!handler.is_satisfied(&context(11, 2)).await.unwrap());

        let missing = ExecutionContext::from([("left".to_string(), json!(11))]);
        assert!(handler.is_satisfied(&missing).await.is_err());
    }

    /// 注册时直接保存回调，测试中手动触发
    #[derive(Default)]
    struct ManualTrigger {
        callback: Mutex<Option<Arc<dyn TriggerCallback>>>,
    }

    #[async_trait]
    impl TriggerHandler for ManualTrigger {
        async fn register(&self, callback: Arc<dyn TriggerCallback>) -> anyhow::Result<()> {
            *self.callback.lock().await = Some(callback);
            Ok(())
        }
    }

    #[derive(Default)]
    struct Recorder {
        fired: Mutex<Vec<Outputs>>,
    }

    #[async_trait]
    impl TriggerCallback for Recorder {
        async fn triggered(&self, outputs: Outputs) {
            self.fired.lock().await.push(outputs);
        }
    }

    #[tokio::test]
    async fn test_composite_trigger_maps_child_outputs() {
        let first = Arc::new(ManualTrigger::default());
        let second = Arc::new(ManualTrigger::default());
        let handler = CompositeTriggerHandler::new(
            vec![
                Child::new(Module::new("t1", "test.Manual"), first.clone() as Arc<dyn TriggerHandler>),
                Child::new(Module::new("t2", "test.Manual"), second.clone() as Arc<dyn TriggerHandler>),
            ],
            &[Output::new("event", "string").with_reference("t1.event,t2.event")],
        )
        .unwrap();

        let recorder = Arc::new(Recorder::default());
        handler.register(recorder.clone()).await.unwrap();

        let fire = |trigger: &Arc<ManualTrigger>, value: &str| {
            let trigger = trigger.clone();
            let outputs = Outputs::from([("event".to_string(), json!(value))]);
            async move {
                let callback = trigger.callback.lock().await.clone().unwrap();
                callback.triggered(outputs).await;
            }
        };
        fire(&second, "from-t2").await;
        fire(&first, "from-t1").await;

        let fired = recorder.fired.lock().await;
        assert_eq!(fired.len(), 2);
        assert_eq!(fired[0]["event"], json!("from-t2"));
        assert_eq!(fired[1]["event"], json!("from-t1"));
    }
}
