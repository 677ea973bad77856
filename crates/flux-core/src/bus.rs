use tokio::sync::broadcast;
use flux_types::message::Message;

/// 进程内事件总线
#[derive(Clone)]
pub struct EventBus {
    sender: broadcast::Sender<Message>,
}

impl EventBus {
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self { sender }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<Message> {
        self.sender.subscribe()
    }

    /// 发布通知；没有订阅者不算错误
    pub fn emit(&self, message: Message) {
        if let Err(e) = self.sender.send(message) {
            tracing::trace!(topic = %e.0.topic, "No subscribers for event");
        }
    }

    pub fn receiver_count(&self) -> usize {
        self.sender.receiver_count()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(1024)
    }
}
