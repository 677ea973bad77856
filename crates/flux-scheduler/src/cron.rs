use crate::error::{Result, SchedulerError};
use chrono::{DateTime, Utc};
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use tokio::sync::Mutex;
use tokio_cron_scheduler::{Job, JobScheduler};
use tracing::{debug, info};
use uuid::Uuid;

pub type CronFuture = Pin<Box<dyn Future<Output = ()> + Send>>;

pub type CronCallback = Arc<dyn Fn(DateTime<Utc>) -> CronFuture + Send + Sync>;

/// 把异步闭包包装成 [`CronCallback`]
pub fn cron_callback<F, Fut>(f: F) -> CronCallback
where
    F: Fn(DateTime<Utc>) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = ()> + Send + 'static,
{
    Arc::new(move |at| -> CronFuture { Box::pin(f(at)) })
}

/// Cron 调度器
///
/// 首次添加任务时才创建并启动内部的 `JobScheduler`。
pub struct CronScheduler {
    scheduler: Mutex<Option<JobScheduler>>,
}

impl Default for CronScheduler {
    fn default() -> Self {
        Self::new()
    }
}

impl CronScheduler {
    pub fn new() -> Self {
        Self {
            scheduler: Mutex::new(None),
        }
    }

    /// 校验 cron 表达式（6 段，秒在最前）
    pub fn validate(expression: &str) -> Result<()> {
        Job::new_async(expression, |_uuid, _lock| Box::pin(async {}))
            .map(|_| ())
            .map_err(|e| SchedulerError::invalid_cron(expression, e))
    }

    /// 注册周期任务，返回任务 ID
    pub async fn add(&self, expression: &str, callback: CronCallback) -> Result<Uuid> {
        let job = Job::new_async(expression, move |_uuid, _lock| {
            let callback = callback.clone();
            Box::pin(async move {
                callback(Utc::now()).await;
            })
        })
        .map_err(|e| SchedulerError::invalid_cron(expression, e))?;

        let mut guard = self.scheduler.lock().await;
        if guard.is_none() {
            let scheduler = JobScheduler::new().await.map_err(SchedulerError::cron)?;
            scheduler.start().await.map_err(SchedulerError::cron)?;
            info!("Cron scheduler started");
            *guard = Some(scheduler);
        }

        let scheduler = guard.as_ref().ok_or(SchedulerError::Closed)?;
        let id = scheduler.add(job).await.map_err(SchedulerError::cron)?;
        debug!(job_id = %id, cron = %expression, "Cron job registered");
        Ok(id)
    }

    pub async fn remove(&self, id: &Uuid) -> Result<()> {
        if let Some(scheduler) = self.scheduler.lock().await.as_ref() {
            scheduler.remove(id).await.map_err(SchedulerError::cron)?;
            debug!(job_id = %id, "Cron job removed");
        }
        Ok(())
    }

    pub async fn shutdown(&self) -> Result<()> {
        if let Some(mut scheduler) = self.scheduler.lock().await.take() {
            scheduler.shutdown().await.map_err(SchedulerError::cron)?;
            info!("Cron scheduler stopped");
        }
        Ok(())
    }
}
