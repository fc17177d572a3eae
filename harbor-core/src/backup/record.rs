use crate::constants::backup::DEFAULT_RETENTION_COUNT;
use crate::constants::storage::REMOTE_PROVIDER_PREFIX;
use crate::{HarborError, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// 目标最近一次成功备份的记录
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct BackupRecord {
    pub target_id: String,
    /// 备份集目录名 `backup_<ts>`
    pub set_name: String,
    pub created_at: DateTime<Utc>,
    pub archive_path: PathBuf,
    /// 目标未配置数据库时为空
    pub database_path: Option<PathBuf>,
}

/// 计划类型
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum ScheduleType {
    Daily,
    Weekly,
    Monthly,
}

/// 面向用户的备份计划
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct BackupSchedule {
    pub enabled: bool,
    pub schedule_type: ScheduleType,
    pub hour: u32,
    pub minute: u32,
    #[serde(default)]
    pub day_of_week: Option<u32>,
    #[serde(default)]
    pub day_of_month: Option<u32>,
    /// 0 表示不限制
    pub retention_count: u32,
    #[serde(default)]
    pub cloud_sync: bool,
}

impl Default for BackupSchedule {
    fn default() -> Self {
        Self {
            enabled: false,
            schedule_type: ScheduleType::Daily,
            hour: 2,
            minute: 0,
            day_of_week: None,
            day_of_month: None,
            retention_count: DEFAULT_RETENTION_COUNT,
            cloud_sync: false,
        }
    }
}

impl BackupSchedule {
    pub fn daily(hour: u32, minute: u32) -> Self {
        Self {
            enabled: true,
            hour,
            minute,
            ..Self::default()
        }
    }

    pub fn weekly(hour: u32, minute: u32, day_of_week: u32) -> Self {
        Self {
            enabled: true,
            schedule_type: ScheduleType::Weekly,
            hour,
            minute,
            day_of_week: Some(day_of_week),
            ..Self::default()
        }
    }

    pub fn monthly(hour: u32, minute: u32, day_of_month: u32) -> Self {
        Self {
            enabled: true,
            schedule_type: ScheduleType::Monthly,
            hour,
            minute,
            day_of_month: Some(day_of_month),
            ..Self::default()
        }
    }

    pub fn with_retention(mut self, retention_count: u32) -> Self {
        self.retention_count = retention_count;
        self
    }

    /// 转换为五段式 cron 表达式
    pub fn to_cron_expression(&self) -> Result<String> {
        if self.hour > 23 {
            return Err(HarborError::configuration(format!(
                "小时必须在 0-23 之间: {}",
                self.hour
            )));
        }
        if self.minute > 59 {
            return Err(HarborError::configuration(format!(
                "分钟必须在 0-59 之间: {}",
                self.minute
            )));
        }

        let expr = match self.schedule_type {
            ScheduleType::Daily => format!("{} {} * * *", self.minute, self.hour),
            ScheduleType::Weekly => {
                let dow = self.day_of_week.unwrap_or(0);
                if dow > 6 {
                    return Err(HarborError::configuration(format!(
                        "星期必须在 0-6 之间: {dow}"
                    )));
                }
                format!("{} {} * * {dow}", self.minute, self.hour)
            }
            ScheduleType::Monthly => {
                let dom = self.day_of_month.unwrap_or(1);
                if !(1..=31).contains(&dom) {
                    return Err(HarborError::configuration(format!(
                        "日期必须在 1-31 之间: {dom}"
                    )));
                }
                format!("{} {} {dom} * *", self.minute, self.hour)
            }
        };

        Ok(expr)
    }
}

/// 云同步配置，仅在计划开启 cloud_sync 时使用
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CloudConfig {
    /// 目前只有 "rclone"
    pub provider: String,
    pub remote_name: String,
    /// 远程端备份根路径，留空使用全局配置
    #[serde(default)]
    pub remote_path: String,
    pub enabled: bool,
}

impl CloudConfig {
    pub fn rclone(remote_name: impl Into<String>, remote_path: impl Into<String>) -> Self {
        Self {
            provider: "rclone".to_string(),
            remote_name: remote_name.into(),
            remote_path: remote_path.into(),
            enabled: true,
        }
    }

    /// 对应的存储提供者名称
    pub fn provider_id(&self) -> String {
        format!("{REMOTE_PROVIDER_PREFIX}{}", self.remote_name)
    }
}

/// 目标持久化的计划状态
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct BackupSettings {
    pub target_id: String,
    pub schedule: BackupSchedule,
    pub cloud: Option<CloudConfig>,
    /// 绑定的定时任务
    pub job_id: Option<String>,
}

impl BackupSettings {
    pub fn new(target_id: impl Into<String>) -> Self {
        Self {
            target_id: target_id.into(),
            schedule: BackupSchedule::default(),
            cloud: None,
            job_id: None,
        }
    }
}

/// 备份记录与计划设置的持久化接口
#[async_trait]
pub trait BackupStore: Send + Sync {
    async fn get_record(&self, target_id: &str) -> Result<Option<BackupRecord>>;

    async fn save_record(&self, record: &BackupRecord) -> Result<()>;

    async fn clear_record(&self, target_id: &str) -> Result<()>;

    async fn get_settings(&self, target_id: &str) -> Result<Option<BackupSettings>>;

    async fn save_settings(&self, settings: &BackupSettings) -> Result<()>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cron_expression_derivation() {
        assert_eq!(
            BackupSchedule::weekly(2, 30, 0).to_cron_expression().unwrap(),
            "30 2 * * 0"
        );
        assert_eq!(
            BackupSchedule::daily(0, 0).to_cron_expression().unwrap(),
            "0 0 * * *"
        );
        assert_eq!(
            BackupSchedule::monthly(3, 0, 15).to_cron_expression().unwrap(),
            "0 3 15 * *"
        );
    }

    #[test]
    fn test_cron_expression_defaults() {
        let mut weekly = BackupSchedule::weekly(4, 5, 3);
        weekly.day_of_week = None;
        assert_eq!(weekly.to_cron_expression().unwrap(), "5 4 * * 0");

        let mut monthly = BackupSchedule::monthly(4, 5, 3);
        monthly.day_of_month = None;
        assert_eq!(monthly.to_cron_expression().unwrap(), "5 4 1 * *");
    }

    #[test]
    fn test_cron_expression_out_of_range() {
        let cases = [
            BackupSchedule::daily(24, 0),
            BackupSchedule::daily(1, 60),
            BackupSchedule::weekly(1, 0, 7),
            BackupSchedule::monthly(1, 0, 0),
            BackupSchedule::monthly(1, 0, 32),
        ];
        for schedule in cases {
            assert!(matches!(
                schedule.to_cron_expression(),
                Err(HarborError::Configuration(_))
            ));
        }
    }

    #[test]
    fn test_cloud_provider_id() {
        assert_eq!(CloudConfig::rclone("gdrive", "").provider_id(), "rclone:gdrive");
    }
}
