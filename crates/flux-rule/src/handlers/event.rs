use crate::context::Outputs;
use crate::handler::{HandlerContext, ModuleHandler, TriggerCallback, TriggerHandler};
use crate::model::Module;
use anyhow::anyhow;
use async_trait::async_trait;
use flux_core::EventBus;
use serde_json::{json, Value};
use std::sync::Arc;
use tokio::sync::{broadcast, Mutex};
use tokio::task::JoinHandle;
use tracing::{debug, warn};

pub const TYPE_UID: &str = "core.GenericEventTrigger";

/// 事件总线触发器
///
/// 配置：`topic`（支持末尾 `*` 通配），可选 `source`
pub struct EventTriggerHandler {
    module_id: String,
    topic: String,
    source: Option<String>,
    event_bus: Arc<EventBus>,
    listener: Mutex<Option<JoinHandle<()>>>,
}

pub fn create(module: &Module, _rule_uid: &str, context: &HandlerContext) -> anyhow::Result<ModuleHandler> {
    let topic = module
        .config_str("topic")
        .filter(|t| !t.is_empty())
        .ok_or_else(|| anyhow!("Module '{}' is missing the 'topic' configuration", module.id))?;

    Ok(ModuleHandler::trigger(EventTriggerHandler {
        module_id: module.id.clone(),
        topic: topic.to_string(),
        source: module.config_str("source").map(str::to_string),
        event_bus: context.event_bus.clone(),
        listener: Mutex::new(None),
    }))
}

#[async_trait]
impl TriggerHandler for EventTriggerHandler {
    async fn register(&self, callback: Arc<dyn TriggerCallback>) -> anyhow::Result<()> {
        let mut rx = self.event_bus.subscribe();
        let topic = self.topic.clone();
        let source = self.source.clone();
        let module_id = self.module_id.clone();

        let listener = tokio::spawn(async move {
            loop {
                match rx.recv().await {
                    Ok(message) => {
                        if !message.matches_topic(&topic) {
                            continue;
                        }
                        if source.is_some() && message.source != source {
                            continue;
                        }
                        debug!(module_id = %module_id, topic = %message.topic, "Event trigger fired");
                        let outputs = Outputs::from([
                            ("event".to_string(), serde_json::to_value(&message).unwrap_or(Value::Null)),
                            ("topic".to_string(), json!(message.topic)),
                            ("payload".to_string(), message.payload.clone()),
                            ("source".to_string(), json!(message.source)),
                        ]);
                        callback.triggered(outputs).await;
                    }
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        warn!(module_id = %module_id, skipped, "Event trigger lagged behind the bus");
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                }
            }
        });

        if let Some(previous) = self.listener.lock().await.replace(listener) {
            previous.abort();
        }
        debug!(module_id = %self.module_id, topic = %self.topic, "Event trigger registered");
        Ok(())
    }

    async fn dispose(&self) {
        if let Some(listener) = self.listener.lock().await.take() {
            listener.abort();
        }
    }
}
