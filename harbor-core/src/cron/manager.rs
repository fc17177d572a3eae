use super::crontab::{ScheduleEntry, SchedulerBackend};
use super::models::{CronJob, JobResult, JobStatus, validate_cron_expression};
use super::registry::JobRegistry;
use super::store::JobStore;
use crate::{HarborError, Result};
use chrono::Utc;
use std::sync::Arc;
use tracing::{error, info, instrument, warn};

/// 定时任务管理器：持久化任务定义并与系统调度器保持一致
pub struct CronManager {
    store: Arc<dyn JobStore>,
    scheduler: Arc<dyn SchedulerBackend>,
    registry: JobRegistry,
    /// 调度器触发时执行的命令，任务ID追加在末尾
    command_prefix: String,
}

impl CronManager {
    pub fn new(
        store: Arc<dyn JobStore>,
        scheduler: Arc<dyn SchedulerBackend>,
        registry: JobRegistry,
        command_prefix: impl Into<String>,
    ) -> Self {
        Self {
            store,
            scheduler,
            registry,
            command_prefix: command_prefix.into(),
        }
    }

    pub fn registry(&self) -> &JobRegistry {
        &self.registry
    }

    pub fn job_types(&self) -> Vec<String> {
        self.registry.job_types()
    }

    fn entry_for(&self, job: &CronJob) -> ScheduleEntry {
        ScheduleEntry {
            job_id: job.id.clone(),
            expression: job.cron_expression.clone(),
            command: self.command_prefix.clone(),
            enabled: job.enabled,
        }
    }

    fn check_job_type(&self, job: &CronJob) -> Result<()> {
        if self.registry.get(&job.job_type).is_none() {
            return Err(HarborError::configuration(format!(
                "未知的任务类型: {}",
                job.job_type
            )));
        }
        Ok(())
    }

    /// 安装调度条目并保存任务；保存失败时撤销刚安装的条目
    #[instrument(skip_all, fields(job_id = %job.id))]
    pub async fn add_job(&self, job: &CronJob) -> Result<()> {
        validate_cron_expression(&job.cron_expression)?;
        self.check_job_type(job)?;
        if self.store.get_job(&job.id).await?.is_some() {
            return Err(HarborError::scheduling(format!("任务已存在: {}", job.id)));
        }

        self.scheduler.install(&self.entry_for(job)).await?;
        if let Err(e) = self.store.save_job(job).await {
            error!("保存任务失败，撤销调度条目: {}", e);
            if let Err(undo) = self.scheduler.remove(&job.id).await {
                warn!("撤销调度条目失败: {}", undo);
            }
            return Err(HarborError::scheduling(format!("保存任务 {} 失败: {e}", job.id)));
        }

        info!("已添加任务 {} ({})", job.id, job.cron_expression);
        Ok(())
    }

    /// 更新已存在的任务并同步调度条目
    #[instrument(skip_all, fields(job_id = %job.id))]
    pub async fn update_job(&self, job: &CronJob) -> Result<()> {
        validate_cron_expression(&job.cron_expression)?;
        self.check_job_type(job)?;
        if self.store.get_job(&job.id).await?.is_none() {
            return Err(HarborError::scheduling(format!("任务不存在: {}", job.id)));
        }

        self.scheduler.install(&self.entry_for(job)).await?;
        self.store.save_job(job).await?;
        info!("已更新任务 {}", job.id);
        Ok(())
    }

    /// 删除任务与调度条目，返回任务是否存在
    pub async fn remove_job(&self, id: &str) -> Result<bool> {
        let removed_entry = self.scheduler.remove(id).await?;
        let removed_job = self.store.delete_job(id).await?;
        if removed_job || removed_entry {
            info!("已删除任务 {}", id);
        }
        Ok(removed_job)
    }

    pub async fn enable_job(&self, id: &str) -> Result<CronJob> {
        self.set_enabled(id, true).await
    }

    pub async fn disable_job(&self, id: &str) -> Result<CronJob> {
        self.set_enabled(id, false).await
    }

    async fn set_enabled(&self, id: &str, enabled: bool) -> Result<CronJob> {
        let mut job = self.require_job(id).await?;
        job.enabled = enabled;

        if !self.scheduler.set_enabled(id, enabled).await? {
            warn!("调度器中缺少任务 {} 的条目，重新安装", id);
            self.scheduler.install(&self.entry_for(&job)).await?;
        }
        self.store.save_job(&job).await?;

        info!("任务 {} 已{}", id, if enabled { "启用" } else { "禁用" });
        Ok(job)
    }

    pub async fn get_job(&self, id: &str) -> Result<Option<CronJob>> {
        self.store.get_job(id).await
    }

    async fn require_job(&self, id: &str) -> Result<CronJob> {
        self.store
            .get_job(id)
            .await?
            .ok_or_else(|| HarborError::scheduling(format!("任务不存在: {id}")))
    }

    pub async fn list_jobs(&self) -> Result<Vec<CronJob>> {
        self.store.list_jobs().await
    }

    /// 按任务类型与目标筛选
    pub async fn find_jobs(&self, job_type: &str, target_id: Option<&str>) -> Result<Vec<CronJob>> {
        Ok(self
            .store
            .list_jobs()
            .await?
            .into_iter()
            .filter(|job| job.job_type == job_type)
            .filter(|job| target_id.is_none_or(|t| job.target_id == t))
            .collect())
    }

    /// 记录任务状态，执行时间为当前时间
    pub async fn update_job_status(&self, id: &str, status: JobStatus) -> Result<()> {
        self.store.update_job_status(id, status, Utc::now()).await
    }

    /// 立即执行任务并保存最终状态
    #[instrument(skip(self))]
    pub async fn run_job(&self, id: &str) -> Result<JobResult> {
        let job = self.require_job(id).await?;
        let result = self.registry.execute_job(&job).await;

        let run_at = result.end_time.unwrap_or(result.start_time);
        self.store.update_job_status(id, result.status, run_at).await?;
        Ok(result)
    }
}
