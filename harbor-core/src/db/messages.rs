use crate::Result;
use tokio::sync::oneshot;

use super::models::{BackupRecordRow, BackupSettingsRow, CronJobRow};

/// DuckDB数据库操作消息
#[derive(Debug)]
pub enum DbMessage {
    /// 初始化数据库表
    InitTables {
        respond_to: oneshot::Sender<Result<()>>,
    },

    // ========== 定时任务 ==========
    /// 新增或覆盖任务定义
    SaveCronJob {
        job: CronJobRow,
        respond_to: oneshot::Sender<Result<()>>,
    },
    /// 删除任务，返回是否存在
    DeleteCronJob {
        id: String,
        respond_to: oneshot::Sender<Result<bool>>,
    },
    /// 获取任务
    GetCronJob {
        id: String,
        respond_to: oneshot::Sender<Result<Option<CronJobRow>>>,
    },
    /// 获取全部任务
    ListCronJobs {
        respond_to: oneshot::Sender<Result<Vec<CronJobRow>>>,
    },
    /// 更新任务最近一次执行状态
    UpdateCronJobStatus {
        id: String,
        status: String,
        run_at: String,
        respond_to: oneshot::Sender<Result<()>>,
    },

    // ========== 备份记录 ==========
    GetBackupRecord {
        target_id: String,
        respond_to: oneshot::Sender<Result<Option<BackupRecordRow>>>,
    },
    SetBackupRecord {
        record: BackupRecordRow,
        respond_to: oneshot::Sender<Result<()>>,
    },
    ClearBackupRecord {
        target_id: String,
        respond_to: oneshot::Sender<Result<()>>,
    },

    // ========== 备份设置 ==========
    GetBackupSettings {
        target_id: String,
        respond_to: oneshot::Sender<Result<Option<BackupSettingsRow>>>,
    },
    SaveBackupSettings {
        settings: BackupSettingsRow,
        respond_to: oneshot::Sender<Result<()>>,
    },
}
