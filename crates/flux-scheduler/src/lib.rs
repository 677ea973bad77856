//! FLUX 自动化调度
//!
//! - [`Scheduler`]：在专用线程池上按时间点执行任务，返回可取消/重新调度的 [`Timer`]
//! - [`CronScheduler`]：基于 cron 表达式的周期任务

pub mod cron;
pub mod error;
pub mod scheduler;
pub mod timer;

pub use cron::{cron_callback, CronCallback, CronScheduler};
pub use error::{Result, SchedulerError};
pub use scheduler::{task, Scheduler, SchedulerTask, TaskFuture};
pub use timer::Timer;
