use super::DatabaseEngine;
use crate::target::{TargetConfig, TargetDatabase};
use crate::{HarborError, Result};
use async_trait::async_trait;
use std::path::Path;
use std::process::Stdio;
use tokio::process::Command;
use tracing::{debug, info};

const PASSWORD_ENV: &str = "MYSQL_PWD";

/// 在目标数据库容器内执行 mysqldump / mysql 的数据库引擎
///
/// 密码通过 `MYSQL_PWD` 环境变量传递，不出现在命令行参数中。
#[derive(Debug, Clone, Default)]
pub struct MysqlEngine;

impl MysqlEngine {
    pub fn new() -> Self {
        Self
    }

    fn database_of(target: &TargetConfig) -> Result<&TargetDatabase> {
        let db = target.database.as_ref().ok_or_else(|| {
            HarborError::configuration(format!("目标 {} 未配置数据库", target.id))
        })?;
        if db.name.is_empty() || db.name.contains('`') {
            return Err(HarborError::configuration(format!(
                "非法的数据库名: {}",
                db.name
            )));
        }
        Ok(db)
    }

    /// 构造 `docker exec` 命令，`interactive` 为真时保持标准输入
    fn exec_command(db: &TargetDatabase, interactive: bool) -> Command {
        let mut cmd = Command::new("docker");
        cmd.arg("exec");
        if interactive {
            cmd.arg("-i");
        }
        if let Some(password) = &db.password {
            cmd.env(PASSWORD_ENV, password).args(["-e", PASSWORD_ENV]);
        }
        cmd.arg(&db.container);
        cmd
    }
}

#[async_trait]
impl DatabaseEngine for MysqlEngine {
    async fn dump(&self, target: &TargetConfig, dest: &Path) -> Result<()> {
        let db = Self::database_of(target)?;
        info!("正在导出数据库 {} (容器: {})", db.name, db.container);

        let file = std::fs::File::create(dest)?;
        let output = Self::exec_command(db, false)
            .args([
                "mysqldump",
                "-u",
                db.user.as_str(),
                "--single-transaction",
                "--routines",
                "--triggers",
                db.name.as_str(),
            ])
            .stdout(Stdio::from(file))
            .stderr(Stdio::piped())
            .output()
            .await?;

        if !output.status.success() {
            let _ = tokio::fs::remove_file(dest).await;
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(HarborError::database_operation(format!(
                "mysqldump 退出码 {:?}: {}",
                output.status.code(),
                stderr.trim()
            )));
        }

        debug!("数据库已导出到 {}", dest.display());
        Ok(())
    }

    async fn import(&self, target: &TargetConfig, sql_file: &Path, reset: bool) -> Result<()> {
        let db = Self::database_of(target)?;

        if reset {
            info!("正在重建数据库 {}", db.name);
            let statement = format!(
                "DROP DATABASE IF EXISTS `{0}`; CREATE DATABASE `{0}`;",
                db.name
            );
            let output = Self::exec_command(db, false)
                .args(["mysql", "-u", db.user.as_str(), "-e", statement.as_str()])
                .stdout(Stdio::piped())
                .stderr(Stdio::piped())
                .output()
                .await?;
            if !output.status.success() {
                let stderr = String::from_utf8_lossy(&output.stderr);
                return Err(HarborError::database_operation(format!(
                    "重建数据库失败: {}",
                    stderr.trim()
                )));
            }
        }

        info!("正在导入 {} 到数据库 {}", sql_file.display(), db.name);
        let file = std::fs::File::open(sql_file)?;
        let output = Self::exec_command(db, true)
            .args(["mysql", "-u", db.user.as_str(), db.name.as_str()])
            .stdin(Stdio::from(file))
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .output()
            .await?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(HarborError::database_operation(format!(
                "导入数据库失败: {}",
                stderr.trim()
            )));
        }

        Ok(())
    }
}
