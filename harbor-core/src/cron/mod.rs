//! 定时任务：任务定义、执行器注册表与系统调度器

mod backup_runner;
mod crontab;
mod manager;
mod models;
mod registry;
mod runner;
mod store;

pub use backup_runner::BackupRunner;
pub use crontab::{
    ScheduleEntry, SchedulerBackend, SystemCrontab, remove_entry, render_line, toggle_entry,
    upsert_entry,
};
pub use manager::CronManager;
pub use models::{CronJob, JobResult, JobStatus, generate_job_id, validate_cron_expression};
pub use registry::JobRegistry;
pub use runner::Runner;
pub use store::JobStore;
