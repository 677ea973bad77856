use crate::error::Result;
use crate::timer::Timer;
use chrono::{DateTime, Utc};
use flux_config::SchedulerConfig;
use flux_core::EventBus;
use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::runtime::{Builder, Handle, Runtime};
use tracing::{debug, info};

pub type TaskFuture = Pin<Box<dyn Future<Output = anyhow::Result<()>> + Send>>;

/// 可重复执行的任务体（每次触发生成一个新的 future）
pub type SchedulerTask = Arc<dyn Fn() -> TaskFuture + Send + Sync>;

/// 把异步闭包包装成 [`SchedulerTask`]
pub fn task<F, Fut>(f: F) -> SchedulerTask
where
    F: Fn() -> Fut + Send + Sync + 'static,
    Fut: Future<Output = anyhow::Result<()>> + Send + 'static,
{
    Arc::new(move || -> TaskFuture { Box::pin(f()) })
}

pub(crate) struct SchedulerShared {
    pub(crate) handle: Handle,
    pub(crate) event_bus: Option<Arc<EventBus>>,
    closed: AtomicBool,
}

impl SchedulerShared {
    pub(crate) fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }
}

/// 定时任务调度器
///
/// 由宿主进程显式创建并以引用传递，没有全局实例。
pub struct Scheduler {
    runtime: Option<Runtime>,
    shared: Arc<SchedulerShared>,
}

impl Scheduler {
    /// 创建带专用线程池的调度器
    ///
    /// # 错误
    /// 线程池创建失败时返回 [`crate::SchedulerError::Runtime`]
    pub fn new(config: &SchedulerConfig) -> Result<Self> {
        let runtime = Builder::new_multi_thread()
            .worker_threads(config.worker_threads.max(1))
            .thread_name(config.thread_name.clone())
            .enable_all()
            .build()?;
        let handle = runtime.handle().clone();

        info!(
            worker_threads = config.worker_threads,
            thread_name = %config.thread_name,
            "Scheduler started"
        );

        Ok(Self {
            runtime: Some(runtime),
            shared: Self::shared(handle, None),
        })
    }

    /// 在已有运行时上调度（不拥有线程池）
    pub fn with_handle(handle: Handle) -> Self {
        Self {
            runtime: None,
            shared: Self::shared(handle, None),
        }
    }

    /// 定时器触发后向事件总线发布通知
    pub fn with_event_bus(mut self, event_bus: Arc<EventBus>) -> Self {
        let shared = Self::shared(self.shared.handle.clone(), Some(event_bus));
        Self {
            runtime: self.runtime.take(),
            shared,
        }
    }

    fn shared(handle: Handle, event_bus: Option<Arc<EventBus>>) -> Arc<SchedulerShared> {
        Arc::new(SchedulerShared {
            handle,
            event_bus,
            closed: AtomicBool::new(false),
        })
    }

    /// 在指定时间执行任务
    pub fn schedule(&self, task: SchedulerTask, at: DateTime<Utc>) -> Timer {
        self.schedule_with_identifier(None, task, at)
    }

    /// 带标识的定时器，触发时会发布 `flux/timers/{identifier}/fired`
    pub fn schedule_named(
        &self,
        identifier: impl Into<String>,
        task: SchedulerTask,
        at: DateTime<Utc>,
    ) -> Timer {
        self.schedule_with_identifier(Some(identifier.into()), task, at)
    }

    /// 延迟执行任务
    ///
    /// 超出可表示范围的延迟按最远时间点处理
    pub fn after(&self, task: SchedulerTask, delay: Duration) -> Timer {
        let at = chrono::Duration::from_std(delay)
            .ok()
            .and_then(|delay| Utc::now().checked_add_signed(delay))
            .unwrap_or(DateTime::<Utc>::MAX_UTC);
        self.schedule(task, at)
    }

    fn schedule_with_identifier(
        &self,
        identifier: Option<String>,
        task: SchedulerTask,
        at: DateTime<Utc>,
    ) -> Timer {
        let timer = Timer::new(identifier, task, self.shared.clone());
        if !timer.reschedule(at) {
            debug!("Scheduler is closed, timer created inactive");
            timer.deactivate();
        }
        timer
    }

    pub fn handle(&self) -> &Handle {
        &self.shared.handle
    }

    /// 停止接受新的调度，已挂起的触发在线程池关闭时被丢弃
    pub fn shutdown(&self) {
        if !self.shared.closed.swap(true, Ordering::SeqCst) {
            info!("Scheduler shut down");
        }
    }

    pub fn is_closed(&self) -> bool {
        self.shared.is_closed()
    }
}

impl Drop for Scheduler {
    fn drop(&mut self) {
        self.shared.closed.store(true, Ordering::SeqCst);
        if let Some(runtime) = self.runtime.take() {
            // 可能在异步上下文中被 drop，不能阻塞等待
            runtime.shutdown_background();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    #[test]
    fn test_dedicated_pool_thread_name() {
        let scheduler = Scheduler::new(&SchedulerConfig::default()).unwrap();
        let (tx, rx) = std::sync::mpsc::channel();
        let tx = std::sync::Mutex::new(tx);

        let timer = scheduler.after(
            task(move || {
                let name = std::thread::current().name().map(str::to_string);
                let sent = tx.lock().map(|tx| tx.send(name).is_ok()).unwrap_or(false);
                async move {
                    anyhow::ensure!(sent, "receiver gone");
                    Ok(())
                }
            }),
            Duration::from_millis(10),
        );

        let name = rx.recv_timeout(Duration::from_secs(2)).unwrap();
        assert_eq!(name.as_deref(), Some("flux-scheduler"));
        assert!(timer.execution_time().is_some());
    }

    #[tokio::test]
    async fn test_drop_inside_async_context() {
        let scheduler = Scheduler::new(&SchedulerConfig::default()).unwrap();
        let _timer = scheduler.after(task(|| async { Ok(()) }), Duration::from_secs(60));
        drop(scheduler);
    }

    #[tokio::test]
    async fn test_event_bus_keeps_dedicated_pool() {
        let bus = Arc::new(EventBus::new(16));
        let mut rx = bus.subscribe();
        let scheduler = Scheduler::new(&SchedulerConfig::default())
            .unwrap()
            .with_event_bus(bus.clone());
        assert!(!scheduler.is_closed());

        let _timer = scheduler.schedule_named("porch.light", task(|| async { Ok(()) }), Utc::now());
        let message = tokio::time::timeout(Duration::from_secs(2), rx.recv())
            .await
            .expect("Timeout waiting for timer notification")
            .unwrap();
        assert_eq!(message.topic, flux_core::events::timer_topic("porch.light"));
        assert_eq!(message.payload["success"], true);
    }

    #[tokio::test]
    async fn test_unrepresentable_delay_never_fires_early() {
        let scheduler = Scheduler::with_handle(Handle::current());
        let count = Arc::new(AtomicUsize::new(0));
        let counter = count.clone();

        let timer = scheduler.after(
            task(move || {
                counter.fetch_add(1, Ordering::SeqCst);
                async { Ok(()) }
            }),
            Duration::MAX,
        );
        assert_eq!(timer.execution_time(), Some(DateTime::<Utc>::MAX_UTC));

        tokio::time::sleep(Duration::from_millis(100)).await;
        assert_eq!(count.load(Ordering::SeqCst), 0);
        assert!(timer.is_active());
        assert!(timer.cancel());
    }

    #[tokio::test]
    async fn test_closed_scheduler_refuses_reschedule() {
        let scheduler = Scheduler::with_handle(Handle::current());
        let count = Arc::new(AtomicUsize::new(0));
        let counter = count.clone();
        scheduler.shutdown();
        assert!(scheduler.is_closed());

        let timer = scheduler.after(
            task(move || {
                counter.fetch_add(1, Ordering::SeqCst);
                async { Ok(()) }
            }),
            Duration::from_millis(10),
        );
        assert!(!timer.reschedule(Utc::now()));
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(count.load(Ordering::SeqCst), 0);
    }
}
