use super::models::{CronJob, JobStatus};
use crate::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};

/// 任务定义的持久化接口
#[async_trait]
pub trait JobStore: Send + Sync {
    /// 新增或覆盖任务定义
    async fn save_job(&self, job: &CronJob) -> Result<()>;

    /// 删除任务，返回任务是否存在
    async fn delete_job(&self, id: &str) -> Result<bool>;

    async fn get_job(&self, id: &str) -> Result<Option<CronJob>>;

    async fn list_jobs(&self) -> Result<Vec<CronJob>>;

    /// 记录最近一次执行的时间与状态
    async fn update_job_status(&self, id: &str, status: JobStatus, run_at: DateTime<Utc>)
    -> Result<()>;
}
