use anyhow::Context;
use harbor_core::{
    backup::{BackupManager, BackupManagerOptions},
    config::{AppConfig, RcloneConfig},
    constants::logging,
    cron::{BackupRunner, CronManager, JobRegistry, SystemCrontab},
    database::Database,
    runtime::{DockerRuntime, MysqlEngine},
    storage::{ProviderRegistry, RcloneCli, SyncTool},
};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::cli::Commands;
use crate::commands;

/// 应用上下文：所有管理器在这里显式构建并注入
pub struct CliApp {
    pub config: AppConfig,
    pub config_path: PathBuf,
    pub database: Database,
    pub backup_manager: Arc<BackupManager>,
    pub cron_manager: CronManager,
}

fn build_rclone(config: &RcloneConfig) -> RcloneCli {
    match &config.container {
        Some(container) => {
            let mount = config
                .host_mount
                .as_ref()
                .zip(config.container_mount.as_ref())
                .map(|(host, inner)| (PathBuf::from(host), inner.clone()));
            RcloneCli::in_container(&config.binary, container, mount)
        }
        None => RcloneCli::host(&config.binary),
    }
}

/// 系统调度器触发时执行的命令
fn runner_command(config: &AppConfig, config_path: &Path) -> String {
    if let Some(command) = &config.cron.runner_command {
        return command.clone();
    }

    let exe = std::env::current_exe()
        .map(|p| p.to_string_lossy().to_string())
        .unwrap_or_else(|_| "harbor".to_string());
    let config_path = config_path
        .canonicalize()
        .unwrap_or_else(|_| config_path.to_path_buf());
    let log_file = config
        .get_database_path()
        .parent()
        .map(|dir| dir.join(logging::CRON_LOG_FILE_NAME))
        .and_then(|p| std::path::absolute(p).ok())
        .unwrap_or_else(|| PathBuf::from(logging::CRON_LOG_FILE_NAME));

    format!(
        "{}={} {} -c {} cron run-job",
        logging::LOG_FILE_ENV,
        shell_quote(&log_file.to_string_lossy()),
        shell_quote(&exe),
        shell_quote(&config_path.to_string_lossy())
    )
}

/// 用单引号包裹参数，内部的单引号写作 `'\''`
fn shell_quote(value: &str) -> String {
    format!("'{}'", value.replace('\'', r"'\''"))
}

impl CliApp {
    /// 加载配置并构建全部管理器
    pub async fn new(config_path: &Path) -> harbor_core::Result<Self> {
        let config = AppConfig::find_and_load_config(Some(config_path))?;
        config.ensure_storage_dirs()?;

        let database = Database::connect(config.get_database_path()).await?;
        let catalog = Arc::new(config.catalog()?);

        let mut providers = ProviderRegistry::new();
        if config.rclone.enabled {
            let tool: Arc<dyn SyncTool> = Arc::new(build_rclone(&config.rclone));
            providers.set_sync_tool(tool, config.rclone.remote_base_path.clone());
            match providers.discover_remotes(&config.rclone.remotes).await {
                Ok(count) => debug!("已注册 {} 个 rclone 远程", count),
                Err(e) => warn!("获取 rclone 远程失败，仅使用本地存储: {}", e),
            }
        }

        let backup_manager = Arc::new(BackupManager::new(
            catalog,
            providers,
            Arc::new(MysqlEngine::new()),
            Arc::new(DockerRuntime::new()),
            Arc::new(database.clone()),
            BackupManagerOptions {
                storage_dir: config.get_backup_dir(),
                temp_dir: config.get_temp_dir(),
                compression_level: config.storage.compression_level,
            },
        ));

        let registry = JobRegistry::new(vec![Arc::new(BackupRunner::new(
            backup_manager.clone(),
            Arc::new(database.clone()),
        ))]);
        let scheduler = SystemCrontab::new(
            config.cron.comment_marker.clone(),
            config.cron.crontab_user.clone(),
        );
        let cron_manager = CronManager::new(
            Arc::new(database.clone()),
            Arc::new(scheduler),
            registry,
            runner_command(&config, config_path),
        );

        Ok(Self {
            config,
            config_path: config_path.to_path_buf(),
            database,
            backup_manager,
            cron_manager,
        })
    }

    /// 运行应用命令
    pub async fn run_command(&self, command: Commands) -> anyhow::Result<()> {
        match command {
            Commands::Init { .. } => unreachable!(), // 已经在 main.rs 中处理
            Commands::Backup(cmd) => commands::run_backup_command(self, cmd)
                .await
                .context("备份命令执行失败"),
            Commands::Cron(cmd) => commands::run_cron_command(self, cmd)
                .await
                .context("定时任务命令执行失败"),
            Commands::Providers => {
                info!("📦 可用的存储提供者:");
                for identity in self.backup_manager.providers().identities() {
                    info!("   - {}", identity);
                }
                Ok(())
            }
            Commands::Targets => {
                let targets = self.backup_manager.targets();
                if targets.is_empty() {
                    info!("尚未配置任何目标，请在 {} 中添加 [[targets]]", self.config_path.display());
                }
                for target in targets {
                    info!(
                        "🌐 {} 文件: {} 数据库: {}",
                        target.id,
                        target.files_dir.display(),
                        target
                            .database
                            .as_ref()
                            .map(|db| format!("{}@{}", db.name, db.container))
                            .unwrap_or_else(|| "无".to_string())
                    );
                }
                Ok(())
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_shell_quote() {
        assert_eq!(shell_quote("/opt/my harbor/harbor"), "'/opt/my harbor/harbor'");
        assert_eq!(shell_quote("it's"), r"'it'\''s'");
    }

    #[test]
    fn test_scheduled_run_uses_same_storage_as_cli() {
        let tmp = tempdir().unwrap();
        let config_dir = tmp.path().join("my harbor");
        std::fs::create_dir_all(&config_dir).unwrap();
        let config_path = config_dir.join("harbor.toml");
        AppConfig::default().save_to_file(&config_path).unwrap();

        let config = AppConfig::load_from_file(&config_path).unwrap();
        config.ensure_storage_dirs().unwrap();
        assert!(config.get_database_path().is_absolute());
        assert!(config.get_database_path().starts_with(&config_dir));
        assert!(config.get_backup_dir().starts_with(&config_dir));

        let command = runner_command(&config, &config_path);
        let canonical = config_path.canonicalize().unwrap();
        let log_file = config_dir.join("data").join(logging::CRON_LOG_FILE_NAME);
        assert!(command.starts_with(&format!(
            "{}={} ",
            logging::LOG_FILE_ENV,
            shell_quote(&log_file.to_string_lossy())
        )));
        assert!(command.ends_with(&format!(
            " -c {} cron run-job",
            shell_quote(&canonical.to_string_lossy())
        )));

        // 定时任务用命令里的绝对配置路径加载，得到同一个数据库与备份目录
        let scheduled = AppConfig::load_from_file(&canonical).unwrap();
        let same = |a: PathBuf, b: PathBuf| {
            assert_eq!(a.canonicalize().unwrap(), b.canonicalize().unwrap());
        };
        same(
            scheduled.get_database_path().parent().unwrap().to_path_buf(),
            config.get_database_path().parent().unwrap().to_path_buf(),
        );
        same(scheduled.get_backup_dir(), config.get_backup_dir());
    }
}
