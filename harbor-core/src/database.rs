use crate::backup::{BackupRecord, BackupSettings, BackupStore};
use crate::cron::{CronJob, JobStatus, JobStore};
use crate::db::{BackupRecordRow, BackupSettingsRow, CronJobRow, DuckDbManager};
use crate::{HarborError, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::path::{Path, PathBuf};

/// 数据库门面 - DuckDB适配器
///
/// 负责领域类型与表行之间的转换，实现 [`BackupStore`] 和 [`JobStore`]。
#[derive(Debug, Clone)]
pub struct Database {
    manager: DuckDbManager,
}

impl Database {
    /// 连接到数据库
    pub async fn connect<P: AsRef<Path>>(db_path: P) -> Result<Self> {
        let manager = DuckDbManager::new(db_path).await?;
        Ok(Database { manager })
    }

    /// 连接到内存数据库（测试用）
    pub async fn connect_memory() -> Result<Self> {
        let manager = DuckDbManager::new_memory().await?;
        Ok(Database { manager })
    }
}

fn parse_time(value: &str) -> Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(value)
        .map(|t| t.with_timezone(&Utc))
        .map_err(|e| HarborError::custom(format!("无法解析时间 {value}: {e}")))
}

fn job_to_row(job: &CronJob) -> Result<CronJobRow> {
    Ok(CronJobRow {
        id: job.id.clone(),
        job_type: job.job_type.clone(),
        cron_expression: job.cron_expression.clone(),
        target_id: job.target_id.clone(),
        parameters: serde_json::to_string(&job.parameters)?,
        enabled: job.enabled,
        created_at: job.created_at.to_rfc3339(),
        last_run: job.last_run.map(|t| t.to_rfc3339()),
        last_status: job.last_status.map(|s| s.as_str().to_string()),
        description: job.description.clone(),
    })
}

fn job_from_row(row: CronJobRow) -> Result<CronJob> {
    Ok(CronJob {
        parameters: serde_json::from_str(&row.parameters)?,
        created_at: parse_time(&row.created_at)?,
        last_run: row.last_run.as_deref().map(parse_time).transpose()?,
        last_status: row
            .last_status
            .as_deref()
            .map(str::parse::<JobStatus>)
            .transpose()?,
        id: row.id,
        job_type: row.job_type,
        cron_expression: row.cron_expression,
        target_id: row.target_id,
        enabled: row.enabled,
        description: row.description,
    })
}

#[async_trait]
impl BackupStore for Database {
    async fn get_record(&self, target_id: &str) -> Result<Option<BackupRecord>> {
        let Some(row) = self.manager.get_backup_record(target_id).await? else {
            return Ok(None);
        };

        Ok(Some(BackupRecord {
            created_at: parse_time(&row.created_at)?,
            target_id: row.target_id,
            set_name: row.set_name,
            archive_path: PathBuf::from(row.archive_path),
            database_path: row.database_path.map(PathBuf::from),
        }))
    }

    async fn save_record(&self, record: &BackupRecord) -> Result<()> {
        self.manager
            .set_backup_record(BackupRecordRow {
                target_id: record.target_id.clone(),
                set_name: record.set_name.clone(),
                archive_path: record.archive_path.to_string_lossy().to_string(),
                database_path: record
                    .database_path
                    .as_ref()
                    .map(|p| p.to_string_lossy().to_string()),
                created_at: record.created_at.to_rfc3339(),
            })
            .await
    }

    async fn clear_record(&self, target_id: &str) -> Result<()> {
        self.manager.clear_backup_record(target_id).await
    }

    async fn get_settings(&self, target_id: &str) -> Result<Option<BackupSettings>> {
        let Some(row) = self.manager.get_backup_settings(target_id).await? else {
            return Ok(None);
        };

        Ok(Some(BackupSettings {
            schedule: serde_json::from_str(&row.schedule)?,
            cloud: row
                .cloud
                .as_deref()
                .map(serde_json::from_str)
                .transpose()?,
            target_id: row.target_id,
            job_id: row.job_id,
        }))
    }

    async fn save_settings(&self, settings: &BackupSettings) -> Result<()> {
        self.manager
            .save_backup_settings(BackupSettingsRow {
                target_id: settings.target_id.clone(),
                schedule: serde_json::to_string(&settings.schedule)?,
                cloud: settings
                    .cloud
                    .as_ref()
                    .map(serde_json::to_string)
                    .transpose()?,
                job_id: settings.job_id.clone(),
                updated_at: Utc::now().to_rfc3339(),
            })
            .await
    }
}

#[async_trait]
impl JobStore for Database {
    async fn save_job(&self, job: &CronJob) -> Result<()> {
        self.manager.save_cron_job(job_to_row(job)?).await
    }

    async fn delete_job(&self, id: &str) -> Result<bool> {
        self.manager.delete_cron_job(id).await
    }

    async fn get_job(&self, id: &str) -> Result<Option<CronJob>> {
        self.manager
            .get_cron_job(id)
            .await?
            .map(job_from_row)
            .transpose()
    }

    async fn list_jobs(&self) -> Result<Vec<CronJob>> {
        self.manager
            .list_cron_jobs()
            .await?
            .into_iter()
            .map(job_from_row)
            .collect()
    }

    async fn update_job_status(
        &self,
        id: &str,
        status: JobStatus,
        run_at: DateTime<Utc>,
    ) -> Result<()> {
        self.manager
            .update_cron_job_status(id, status.as_str(), &run_at.to_rfc3339())
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backup::{BackupSchedule, CloudConfig};
    use tempfile::tempdir;

    /// 子进程测试通过该变量得知要连接的数据库文件
    const CHILD_DB_ENV: &str = "HARBOR_TEST_CHILD_DB";

    #[tokio::test]
    async fn test_job_round_trip_keeps_parameters() {
        let db = Database::connect_memory().await.unwrap();
        let job = CronJob::new("backup", "30 2 * * 0", "example.com")
            .with_parameter("provider", "local")
            .with_parameter("retention_count", 3)
            .with_description("每周备份");

        db.save_job(&job).await.unwrap();
        let loaded = db.get_job(&job.id).await.unwrap().unwrap();
        assert_eq!(loaded.parameters, job.parameters);
        assert_eq!(loaded.created_at, job.created_at);
        assert_eq!(loaded.description.as_deref(), Some("每周备份"));

        let now = Utc::now();
        db.update_job_status(&job.id, JobStatus::Success, now)
            .await
            .unwrap();
        let loaded = db.get_job(&job.id).await.unwrap().unwrap();
        assert_eq!(loaded.last_status, Some(JobStatus::Success));
        assert_eq!(loaded.last_run, Some(now));
    }

    #[tokio::test]
    async fn test_settings_round_trip() {
        let db = Database::connect_memory().await.unwrap();
        assert!(db.get_settings("example.com").await.unwrap().is_none());

        let mut settings = BackupSettings::new("example.com");
        settings.schedule = BackupSchedule::weekly(2, 30, 0).with_retention(5);
        settings.cloud = Some(CloudConfig::rclone("gdrive", "site-backups"));
        settings.job_id = Some("job_12345678".to_string());
        db.save_settings(&settings).await.unwrap();

        assert_eq!(db.get_settings("example.com").await.unwrap(), Some(settings));
    }

    #[tokio::test]
    async fn test_record_round_trip() {
        let db = Database::connect_memory().await.unwrap();
        let record = BackupRecord {
            target_id: "example.com".to_string(),
            set_name: "backup_20250101_020000".to_string(),
            created_at: Utc::now(),
            archive_path: PathBuf::from("/b/example.com/backup_20250101_020000/wordpress.tar.gz"),
            database_path: Some(PathBuf::from(
                "/b/example.com/backup_20250101_020000/db_example.com_20250101_020000.sql",
            )),
        };

        db.save_record(&record).await.unwrap();
        assert_eq!(db.get_record("example.com").await.unwrap(), Some(record));

        db.clear_record("example.com").await.unwrap();
        assert!(db.get_record("example.com").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_two_connections_share_file_concurrently() {
        let tmp = tempdir().unwrap();
        let path = tmp.path().join("data").join("harbor.db");

        let first = Database::connect(&path).await.unwrap();
        let second = Database::connect(&path).await.unwrap();

        let a = CronJob::new("backup", "0 2 * * *", "a.com");
        let b = CronJob::new("backup", "0 3 * * *", "b.com");
        let (ra, rb) = tokio::join!(first.save_job(&a), second.save_job(&b));
        ra.unwrap();
        rb.unwrap();

        let (ra, rb) = tokio::join!(
            first.update_job_status(&a.id, JobStatus::Success, Utc::now()),
            second.update_job_status(&b.id, JobStatus::Failure, Utc::now()),
        );
        ra.unwrap();
        rb.unwrap();

        for db in [&first, &second] {
            let jobs = db.list_jobs().await.unwrap();
            assert_eq!(jobs.len(), 2);
        }
        let loaded = first.get_job(&b.id).await.unwrap().unwrap();
        assert_eq!(loaded.last_status, Some(JobStatus::Failure));
    }

    /// 由 test_separate_process_writes_while_connected 在子进程中运行
    #[tokio::test]
    #[ignore]
    async fn child_process_writes_job() {
        let Ok(path) = std::env::var(CHILD_DB_ENV) else {
            return;
        };

        let db = Database::connect(&path).await.unwrap();
        let job = CronJob::new("backup", "0 4 * * *", "child.com");
        db.save_job(&job).await.unwrap();
        db.update_job_status(&job.id, JobStatus::Success, Utc::now())
            .await
            .unwrap();
        db.save_record(&BackupRecord {
            target_id: "child.com".to_string(),
            set_name: "backup_20250101_040000".to_string(),
            created_at: Utc::now(),
            archive_path: PathBuf::from("/b/child.com/backup_20250101_040000/wordpress.tar.gz"),
            database_path: None,
        })
        .await
        .unwrap();
    }

    #[tokio::test]
    async fn test_separate_process_writes_while_connected() {
        let tmp = tempdir().unwrap();
        let path = tmp.path().join("data").join("harbor.db");

        // 父进程的连接在整个过程中保持存活
        let db = Database::connect(&path).await.unwrap();
        let parent_job = CronJob::new("backup", "0 2 * * *", "parent.com");
        db.save_job(&parent_job).await.unwrap();

        let output = std::process::Command::new(std::env::current_exe().unwrap())
            .args([
                "--exact",
                "database::tests::child_process_writes_job",
                "--ignored",
                "--test-threads=1",
            ])
            .env(CHILD_DB_ENV, &path)
            .output()
            .unwrap();
        assert!(
            output.status.success(),
            "子进程失败: {}{}",
            String::from_utf8_lossy(&output.stdout),
            String::from_utf8_lossy(&output.stderr)
        );
        assert!(String::from_utf8_lossy(&output.stdout).contains("1 passed"));

        let jobs = db.list_jobs().await.unwrap();
        let targets: Vec<&str> = jobs.iter().map(|j| j.target_id.as_str()).collect();
        assert!(targets.contains(&"parent.com"));
        assert!(targets.contains(&"child.com"));

        let child = jobs.iter().find(|j| j.target_id == "child.com").unwrap();
        assert_eq!(child.last_status, Some(JobStatus::Success));
        assert!(db.get_record("child.com").await.unwrap().is_some());

        db.update_job_status(&parent_job.id, JobStatus::Success, Utc::now())
            .await
            .unwrap();
    }
}
