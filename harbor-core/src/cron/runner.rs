use super::models::{CronJob, JobResult};
use crate::Result;
use async_trait::async_trait;

/// 某一任务类型的执行器
#[async_trait]
pub trait Runner: Send + Sync {
    /// 负责的任务类型，例如 `backup`
    fn job_type(&self) -> &str;

    /// 执行一次任务；返回的错误由注册表转换为失败结果
    async fn run(&self, job: &CronJob) -> Result<JobResult>;
}
