//! 表行模型，时间字段以 RFC3339 字符串保存

/// `cron_jobs` 表的一行
#[derive(Debug, Clone, PartialEq)]
pub struct CronJobRow {
    pub id: String,
    pub job_type: String,
    pub cron_expression: String,
    pub target_id: String,
    /// JSON 对象
    pub parameters: String,
    pub enabled: bool,
    pub created_at: String,
    pub last_run: Option<String>,
    pub last_status: Option<String>,
    pub description: Option<String>,
}

/// `backup_records` 表的一行
#[derive(Debug, Clone, PartialEq)]
pub struct BackupRecordRow {
    pub target_id: String,
    pub set_name: String,
    pub archive_path: String,
    pub database_path: Option<String>,
    pub created_at: String,
}

/// `backup_settings` 表的一行
#[derive(Debug, Clone, PartialEq)]
pub struct BackupSettingsRow {
    pub target_id: String,
    /// JSON 序列化的 BackupSchedule
    pub schedule: String,
    /// JSON 序列化的 CloudConfig
    pub cloud: Option<String>,
    pub job_id: Option<String>,
    pub updated_at: String,
}
