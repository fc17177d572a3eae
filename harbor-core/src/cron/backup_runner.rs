use super::models::{CronJob, JobResult};
use super::runner::Runner;
use super::store::JobStore;
use crate::Result;
use crate::backup::BackupManager;
use crate::constants::backup::DEFAULT_RETENTION_COUNT;
use crate::constants::cron::{BACKUP_JOB_TYPE, params};
use crate::constants::storage::LOCAL_PROVIDER;
use async_trait::async_trait;
use std::sync::Arc;
use tracing::{info, instrument, warn};

/// `backup` 任务：创建备份，执行本地保留策略，可选同步到云端
pub struct BackupRunner {
    manager: Arc<BackupManager>,
    jobs: Arc<dyn JobStore>,
}

impl BackupRunner {
    pub fn new(manager: Arc<BackupManager>, jobs: Arc<dyn JobStore>) -> Self {
        Self { manager, jobs }
    }

    async fn execute(&self, job: &CronJob, result: &mut JobResult) {
        if let Err(e) = self.manager.target(&job.target_id) {
            result.fail(e.to_string());
            return;
        }

        let provider = job.param_str(params::PROVIDER).unwrap_or(LOCAL_PROVIDER);
        result.add_log(format!("开始备份 {}，存储: {}", job.target_id, provider));

        let created = match self.manager.create_backup(&job.target_id, provider).await {
            Ok(created) => created,
            Err(e) => {
                if let Some(step) = e.failed_step() {
                    result.add_detail("failed_step", step.name());
                }
                result.fail(format!("备份失败: {e}"));
                return;
            }
        };
        result.add_log(format!(
            "备份完成: {} ({} 字节)",
            created.set_name, created.total_size
        ));
        result.add_detail("set_name", created.set_name.clone());
        result.add_detail("size_bytes", created.total_size);
        result.add_detail("destination", created.destination.clone());

        let keep = job
            .param_u32(params::RETENTION_COUNT)
            .unwrap_or(DEFAULT_RETENTION_COUNT);
        match self.manager.apply_retention(&job.target_id, keep).await {
            Ok(report) => {
                for (name, size) in &report.removed {
                    result.add_log(format!("保留策略删除 {name} ({size} 字节)"));
                }
                result.add_detail("retention_removed", report.removed.len());
            }
            Err(e) => {
                warn!("执行保留策略失败: {}", e);
                result.add_log(format!("警告: 执行保留策略失败: {e}"));
            }
        }

        if job.param_bool(params::CLOUD_SYNC).unwrap_or(false) {
            self.sync_to_cloud(job, &created.set_name, result).await;
        }

        result.complete();
    }

    async fn sync_to_cloud(&self, job: &CronJob, set_name: &str, result: &mut JobResult) {
        let Some(cloud) = job.param_str(params::CLOUD_PROVIDER) else {
            warn!("任务开启了云同步但未指定云端提供者");
            result.add_log("警告: 未指定云端提供者，跳过云同步");
            return;
        };

        match self.manager.sync_to_remote(&job.target_id, set_name, cloud).await {
            Ok(destination) => {
                result.add_log(format!("已同步到 {destination}"));
                result.add_detail("cloud_destination", destination);
            }
            Err(e) => {
                warn!("云同步失败: {}", e);
                result.add_log(format!("警告: 云同步失败: {e}"));
            }
        }
    }
}

#[async_trait]
impl Runner for BackupRunner {
    fn job_type(&self) -> &str {
        BACKUP_JOB_TYPE
    }

    #[instrument(skip_all, fields(job_id = %job.id, target = %job.target_id))]
    async fn run(&self, job: &CronJob) -> Result<JobResult> {
        let mut result = JobResult::new(&job.id);
        self.execute(job, &mut result).await;

        let run_at = result.end_time.unwrap_or(result.start_time);
        if let Err(e) = self.jobs.update_job_status(&job.id, result.status, run_at).await {
            warn!("保存任务状态失败: {}", e);
        }

        info!(status = %result.status, "备份任务结束");
        Ok(result)
    }
}
