use crate::scheduler::{SchedulerShared, SchedulerTask};
use chrono::{DateTime, Utc};
use flux_core::events;
use serde_json::json;
use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard};
use tokio::task::JoinHandle;
use tracing::{debug, error};

#[derive(Debug, Default)]
struct TimerState {
    /// 每次 cancel/reschedule 递增，过期的触发据此放弃执行
    generation: u64,
    pending: bool,
    running: bool,
    cancelled: bool,
    terminated: bool,
    execution_time: Option<DateTime<Utc>>,
    /// 尚未开始执行的触发；开始执行后置空，保证运行中的任务体不会被中止
    pending_handle: Option<JoinHandle<()>>,
}

struct TimerInner {
    identifier: Option<String>,
    task: SchedulerTask,
    shared: Arc<SchedulerShared>,
    state: Mutex<TimerState>,
    /// 同一定时器的任务体串行执行
    run_lock: tokio::sync::Mutex<()>,
}

impl TimerInner {
    fn state(&self) -> MutexGuard<'_, TimerState> {
        // 状态更新都是简单赋值，锁中毒后数据仍然一致
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

/// 定时器句柄
///
/// 绑定一个任务，任意时刻最多一个任务体在执行。
/// `cancel`/`reschedule` 可以在任意线程与正在执行的任务体并发调用。
#[derive(Clone)]
pub struct Timer {
    inner: Arc<TimerInner>,
}

impl Timer {
    pub(crate) fn new(identifier: Option<String>, task: SchedulerTask, shared: Arc<SchedulerShared>) -> Self {
        Self {
            inner: Arc::new(TimerInner {
                identifier,
                task,
                shared,
                state: Mutex::new(TimerState::default()),
                run_lock: tokio::sync::Mutex::new(()),
            }),
        }
    }

    pub(crate) fn deactivate(&self) {
        self.inner.state().cancelled = true;
    }

    pub fn identifier(&self) -> Option<&str> {
        self.inner.identifier.as_deref()
    }

    /// 取消尚未开始的触发
    ///
    /// 返回是否取消成功；任务体已开始执行时无效（它会执行完毕）。
    pub fn cancel(&self) -> bool {
        let mut state = self.inner.state();
        if !state.pending {
            return false;
        }
        if let Some(handle) = state.pending_handle.take() {
            handle.abort();
        }
        state.generation += 1;
        state.pending = false;
        state.cancelled = true;
        state.execution_time = None;
        debug!(timer = ?self.inner.identifier, "Timer cancelled");
        true
    }

    /// 重新调度到新的时间点
    ///
    /// 挂起的触发被取消，正在执行的任务体不受影响；已结束的定时器会重新激活。
    /// 调度器已关闭时返回 false。
    pub fn reschedule(&self, at: DateTime<Utc>) -> bool {
        if self.inner.shared.is_closed() {
            return false;
        }

        let mut state = self.inner.state();
        if let Some(handle) = state.pending_handle.take() {
            handle.abort();
        }
        state.generation += 1;
        state.pending = true;
        state.cancelled = false;
        state.terminated = false;
        state.execution_time = Some(at);

        let generation = state.generation;
        let inner = self.inner.clone();
        state.pending_handle = Some(self.inner.shared.handle.spawn(fire(inner, generation, at)));

        debug!(timer = ?self.inner.identifier, at = %at, "Timer scheduled");
        true
    }

    /// 下一次执行时间；取消后为 None
    pub fn execution_time(&self) -> Option<DateTime<Utc>> {
        self.inner.state().execution_time
    }

    /// 任务结束或被取消之前为 true
    pub fn is_active(&self) -> bool {
        let state = self.inner.state();
        !state.terminated && !state.cancelled
    }

    pub fn is_running(&self) -> bool {
        self.inner.state().running
    }

    pub fn is_cancelled(&self) -> bool {
        self.inner.state().cancelled
    }

    /// 任务体已执行完（成功或失败）且没有挂起的触发
    pub fn has_terminated(&self) -> bool {
        self.inner.state().terminated
    }
}

impl fmt::Debug for Timer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.inner.state();
        f.debug_struct("Timer")
            .field("identifier", &self.inner.identifier)
            .field("execution_time", &state.execution_time)
            .field("pending", &state.pending)
            .field("running", &state.running)
            .field("cancelled", &state.cancelled)
            .field("terminated", &state.terminated)
            .finish()
    }
}

async fn fire(inner: Arc<TimerInner>, generation: u64, at: DateTime<Utc>) {
    let delay = (at - Utc::now()).to_std().unwrap_or_default();
    tokio::time::sleep(delay).await;

    let _run = inner.run_lock.lock().await;
    {
        let mut state = inner.state();
        if state.generation != generation {
            return;
        }
        state.pending = false;
        state.running = true;
        state.pending_handle = None;
    }

    // 任务体单独 spawn，panic 以 JoinError 的形式返回
    let success = match inner.shared.handle.spawn((inner.task)()).await {
        Ok(Ok(())) => {
            debug!(timer = ?inner.identifier, "Timer task completed");
            true
        }
        Ok(Err(e)) => {
            error!(timer = ?inner.identifier, error = %e, "Timer task failed");
            false
        }
        Err(e) => {
            error!(timer = ?inner.identifier, error = %e, "Timer task panicked");
            false
        }
    };

    {
        let mut state = inner.state();
        state.running = false;
        if state.generation == generation {
            state.terminated = true;
        }
    }

    if let (Some(identifier), Some(bus)) = (inner.identifier.as_deref(), inner.shared.event_bus.as_ref()) {
        let payload = json!({
            "identifier": identifier,
            "executionTime": at.to_rfc3339(),
            "success": success,
        });
        bus.emit(events::timer_fired(Some(identifier), payload));
    }
}
