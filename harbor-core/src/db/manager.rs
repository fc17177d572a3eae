use crate::{HarborError, Result};
use std::path::Path;
use tokio::sync::{mpsc, oneshot};

use super::actor::DuckDbActor;
use super::messages::DbMessage;
use super::models::{BackupRecordRow, BackupSettingsRow, CronJobRow};

/// DuckDB数据库管理器
#[derive(Debug, Clone)]
pub struct DuckDbManager {
    sender: mpsc::Sender<DbMessage>,
}

impl DuckDbManager {
    /// 创建新的DuckDB管理器
    pub async fn new<P: AsRef<Path>>(db_path: P) -> Result<Self> {
        let db_path = db_path.as_ref().to_path_buf();

        // 确保数据库文件的父目录存在
        if let Some(parent) = db_path.parent() {
            if !parent.as_os_str().is_empty() {
                tokio::fs::create_dir_all(parent).await?;
            }
        }

        let actor = DuckDbActor::new(db_path)?;
        Self::start(actor).await
    }

    /// 创建内存数据库管理器
    pub async fn new_memory() -> Result<Self> {
        let actor = DuckDbActor::new_memory()?;
        Self::start(actor).await
    }

    async fn start(actor: DuckDbActor) -> Result<Self> {
        let (sender, receiver) = mpsc::channel(100);
        // 等锁和打开文件都是阻塞操作，Actor 运行在独立线程上
        std::thread::Builder::new()
            .name("harbor-duckdb".to_string())
            .spawn(move || actor.run(receiver))?;

        let manager = Self { sender };
        manager
            .request(|respond_to| DbMessage::InitTables { respond_to })
            .await?;

        Ok(manager)
    }

    /// 发送消息并等待 Actor 响应
    async fn request<T>(
        &self,
        build: impl FnOnce(oneshot::Sender<Result<T>>) -> DbMessage,
    ) -> Result<T> {
        let (respond_to, receiver) = oneshot::channel();

        self.sender
            .send(build(respond_to))
            .await
            .map_err(|_| HarborError::custom("数据库Actor已关闭"))?;

        receiver
            .await
            .map_err(|_| HarborError::custom("等待数据库响应失败"))?
    }

    pub async fn save_cron_job(&self, job: CronJobRow) -> Result<()> {
        self.request(|respond_to| DbMessage::SaveCronJob { job, respond_to })
            .await
    }

    pub async fn delete_cron_job(&self, id: &str) -> Result<bool> {
        let id = id.to_string();
        self.request(|respond_to| DbMessage::DeleteCronJob { id, respond_to })
            .await
    }

    pub async fn get_cron_job(&self, id: &str) -> Result<Option<CronJobRow>> {
        let id = id.to_string();
        self.request(|respond_to| DbMessage::GetCronJob { id, respond_to })
            .await
    }

    pub async fn list_cron_jobs(&self) -> Result<Vec<CronJobRow>> {
        self.request(|respond_to| DbMessage::ListCronJobs { respond_to })
            .await
    }

    pub async fn update_cron_job_status(&self, id: &str, status: &str, run_at: &str) -> Result<()> {
        let (id, status, run_at) = (id.to_string(), status.to_string(), run_at.to_string());
        self.request(|respond_to| DbMessage::UpdateCronJobStatus {
            id,
            status,
            run_at,
            respond_to,
        })
        .await
    }

    pub async fn get_backup_record(&self, target_id: &str) -> Result<Option<BackupRecordRow>> {
        let target_id = target_id.to_string();
        self.request(|respond_to| DbMessage::GetBackupRecord {
            target_id,
            respond_to,
        })
        .await
    }

    pub async fn set_backup_record(&self, record: BackupRecordRow) -> Result<()> {
        self.request(|respond_to| DbMessage::SetBackupRecord { record, respond_to })
            .await
    }

    pub async fn clear_backup_record(&self, target_id: &str) -> Result<()> {
        let target_id = target_id.to_string();
        self.request(|respond_to| DbMessage::ClearBackupRecord {
            target_id,
            respond_to,
        })
        .await
    }

    pub async fn get_backup_settings(&self, target_id: &str) -> Result<Option<BackupSettingsRow>> {
        let target_id = target_id.to_string();
        self.request(|respond_to| DbMessage::GetBackupSettings {
            target_id,
            respond_to,
        })
        .await
    }

    pub async fn save_backup_settings(&self, settings: BackupSettingsRow) -> Result<()> {
        self.request(|respond_to| DbMessage::SaveBackupSettings {
            settings,
            respond_to,
        })
        .await
    }
}
