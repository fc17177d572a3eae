use crate::Result;
use crate::constants::database::LOCK_TIMEOUT_SECS;
use duckdb::{Connection, Row, params};
use std::path::PathBuf;
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::{debug, info};

use super::lock::DbFileLock;
use super::messages::DbMessage;
use super::models::{BackupRecordRow, BackupSettingsRow, CronJobRow};

const CRON_JOB_COLUMNS: &str = "id, job_type, cron_expression, target_id, parameters, enabled, \
     created_at, last_run, last_status, description";

/// 连接来源
enum Backend {
    /// 文件数据库：每条消息在进程锁内短暂打开连接，处理完即关闭
    File { path: PathBuf, lock_path: PathBuf },
    /// 内存数据库：连接常驻，关闭即丢失数据
    Memory(Connection),
}

/// DuckDB Actor - 确保单线程访问DuckDB
///
/// 文件数据库不长期持有连接，多个 harbor 进程（例如同时触发的定时任务）
/// 可以轮流访问同一个数据库文件。
pub struct DuckDbActor {
    backend: Backend,
}

impl DuckDbActor {
    /// 创建新的DuckDB Actor
    pub fn new(db_path: PathBuf) -> Result<Self> {
        let lock_path = DbFileLock::path_for(&db_path);
        Ok(Self {
            backend: Backend::File {
                path: db_path,
                lock_path,
            },
        })
    }

    /// 创建内存DuckDB Actor
    pub fn new_memory() -> Result<Self> {
        let connection = Connection::open_in_memory()?;
        Ok(Self {
            backend: Backend::Memory(connection),
        })
    }

    /// 运行Actor消息循环，在专用线程上阻塞执行
    pub fn run(self, mut receiver: mpsc::Receiver<DbMessage>) {
        debug!("DuckDB Actor 已启动");

        while let Some(message) = receiver.blocking_recv() {
            self.handle_message(message);
        }

        debug!("DuckDB Actor 已关闭");
    }

    /// 在可用连接上执行一次操作
    fn with_connection<T>(&self, op: impl FnOnce(&Connection) -> Result<T>) -> Result<T> {
        match &self.backend {
            Backend::Memory(connection) => op(connection),
            Backend::File { path, lock_path } => {
                let lock =
                    DbFileLock::acquire(lock_path, Duration::from_secs(LOCK_TIMEOUT_SECS))?;
                let connection = Connection::open(path)?;
                let result = op(&connection);
                // 连接关闭后才释放进程锁
                drop(connection);
                drop(lock);
                result
            }
        }
    }

    /// 处理数据库消息
    fn handle_message(&self, message: DbMessage) {
        match message {
            DbMessage::InitTables { respond_to } => {
                let _ = respond_to.send(self.with_connection(init_tables));
            }
            DbMessage::SaveCronJob { job, respond_to } => {
                let _ = respond_to.send(self.with_connection(|c| save_cron_job(c, &job)));
            }
            DbMessage::DeleteCronJob { id, respond_to } => {
                let _ = respond_to.send(self.with_connection(|c| delete_cron_job(c, &id)));
            }
            DbMessage::GetCronJob { id, respond_to } => {
                let _ = respond_to.send(self.with_connection(|c| get_cron_job(c, &id)));
            }
            DbMessage::ListCronJobs { respond_to } => {
                let _ = respond_to.send(self.with_connection(list_cron_jobs));
            }
            DbMessage::UpdateCronJobStatus {
                id,
                status,
                run_at,
                respond_to,
            } => {
                let result =
                    self.with_connection(|c| update_cron_job_status(c, &id, &status, &run_at));
                let _ = respond_to.send(result);
            }
            DbMessage::GetBackupRecord {
                target_id,
                respond_to,
            } => {
                let _ = respond_to.send(self.with_connection(|c| get_backup_record(c, &target_id)));
            }
            DbMessage::SetBackupRecord { record, respond_to } => {
                let _ = respond_to.send(self.with_connection(|c| set_backup_record(c, &record)));
            }
            DbMessage::ClearBackupRecord {
                target_id,
                respond_to,
            } => {
                let result = self.with_connection(|c| clear_backup_record(c, &target_id));
                let _ = respond_to.send(result);
            }
            DbMessage::GetBackupSettings {
                target_id,
                respond_to,
            } => {
                let result = self.with_connection(|c| get_backup_settings(c, &target_id));
                let _ = respond_to.send(result);
            }
            DbMessage::SaveBackupSettings {
                settings,
                respond_to,
            } => {
                let result = self.with_connection(|c| save_backup_settings(c, &settings));
                let _ = respond_to.send(result);
            }
        }
    }
}

/// 初始化数据库表
fn init_tables(conn: &Connection) -> Result<()> {
    debug!("正在初始化DuckDB表...");

    let sql_content = include_str!("../../migrations/init_duckdb.sql");

    // 按分号分割SQL语句并执行
    for statement in sql_content.split(';') {
        let trimmed = statement.trim();
        if !trimmed.is_empty() {
            conn.execute(trimmed, [])?;
        }
    }

    info!("DuckDB表初始化完成");
    Ok(())
}

fn cron_job_from_row(row: &Row<'_>) -> duckdb::Result<CronJobRow> {
    Ok(CronJobRow {
        id: row.get(0)?,
        job_type: row.get(1)?,
        cron_expression: row.get(2)?,
        target_id: row.get(3)?,
        parameters: row.get(4)?,
        enabled: row.get(5)?,
        created_at: row.get(6)?,
        last_run: row.get(7)?,
        last_status: row.get(8)?,
        description: row.get(9)?,
    })
}

/// 新增或覆盖任务定义
fn save_cron_job(conn: &Connection, job: &CronJobRow) -> Result<()> {
    conn.execute(
        &format!(
            "INSERT OR REPLACE INTO cron_jobs ({CRON_JOB_COLUMNS}) \
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)"
        ),
        params![
            job.id,
            job.job_type,
            job.cron_expression,
            job.target_id,
            job.parameters,
            job.enabled,
            job.created_at,
            job.last_run,
            job.last_status,
            job.description,
        ],
    )?;
    Ok(())
}

/// 删除任务
fn delete_cron_job(conn: &Connection, id: &str) -> Result<bool> {
    let affected = conn.execute("DELETE FROM cron_jobs WHERE id = ?", params![id])?;
    Ok(affected > 0)
}

/// 获取任务
fn get_cron_job(conn: &Connection, id: &str) -> Result<Option<CronJobRow>> {
    let mut stmt = conn.prepare(&format!("SELECT {CRON_JOB_COLUMNS} FROM cron_jobs WHERE id = ?"))?;
    let mut rows = stmt.query(params![id])?;

    if let Some(row) = rows.next()? {
        Ok(Some(cron_job_from_row(row)?))
    } else {
        Ok(None)
    }
}

/// 获取全部任务，按创建时间排序
fn list_cron_jobs(conn: &Connection) -> Result<Vec<CronJobRow>> {
    let mut stmt = conn.prepare(&format!(
        "SELECT {CRON_JOB_COLUMNS} FROM cron_jobs ORDER BY created_at, id"
    ))?;

    let job_iter = stmt.query_map([], cron_job_from_row)?;

    let mut jobs = Vec::new();
    for job in job_iter {
        jobs.push(job?);
    }

    Ok(jobs)
}

/// 更新任务状态
fn update_cron_job_status(conn: &Connection, id: &str, status: &str, run_at: &str) -> Result<()> {
    conn.execute(
        "UPDATE cron_jobs SET last_status = ?, last_run = ? WHERE id = ?",
        params![status, run_at, id],
    )?;
    Ok(())
}

/// 获取目标的备份记录
fn get_backup_record(conn: &Connection, target_id: &str) -> Result<Option<BackupRecordRow>> {
    let mut stmt = conn.prepare(
        "SELECT target_id, set_name, archive_path, database_path, created_at \
         FROM backup_records WHERE target_id = ?",
    )?;
    let mut rows = stmt.query(params![target_id])?;

    if let Some(row) = rows.next()? {
        Ok(Some(BackupRecordRow {
            target_id: row.get(0)?,
            set_name: row.get(1)?,
            archive_path: row.get(2)?,
            database_path: row.get(3)?,
            created_at: row.get(4)?,
        }))
    } else {
        Ok(None)
    }
}

/// 覆盖目标的备份记录
fn set_backup_record(conn: &Connection, record: &BackupRecordRow) -> Result<()> {
    conn.execute(
        "INSERT OR REPLACE INTO backup_records \
         (target_id, set_name, archive_path, database_path, created_at) \
         VALUES (?, ?, ?, ?, ?)",
        params![
            record.target_id,
            record.set_name,
            record.archive_path,
            record.database_path,
            record.created_at,
        ],
    )?;
    Ok(())
}

/// 清除目标的备份记录
fn clear_backup_record(conn: &Connection, target_id: &str) -> Result<()> {
    conn.execute("DELETE FROM backup_records WHERE target_id = ?", params![target_id])?;
    Ok(())
}

/// 获取目标的备份设置
fn get_backup_settings(conn: &Connection, target_id: &str) -> Result<Option<BackupSettingsRow>> {
    let mut stmt = conn.prepare(
        "SELECT target_id, schedule, cloud, job_id, updated_at \
         FROM backup_settings WHERE target_id = ?",
    )?;
    let mut rows = stmt.query(params![target_id])?;

    if let Some(row) = rows.next()? {
        Ok(Some(BackupSettingsRow {
            target_id: row.get(0)?,
            schedule: row.get(1)?,
            cloud: row.get(2)?,
            job_id: row.get(3)?,
            updated_at: row.get(4)?,
        }))
    } else {
        Ok(None)
    }
}

/// 保存目标的备份设置
fn save_backup_settings(conn: &Connection, settings: &BackupSettingsRow) -> Result<()> {
    conn.execute(
        "INSERT OR REPLACE INTO backup_settings \
         (target_id, schedule, cloud, job_id, updated_at) VALUES (?, ?, ?, ?, ?)",
        params![
            settings.target_id,
            settings.schedule,
            settings.cloud,
            settings.job_id,
            settings.updated_at,
        ],
    )?;
    Ok(())
}
