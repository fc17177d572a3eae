use harbor_core::{config::AppConfig, database::Database, error::Result};
use std::path::Path;
use tracing::{info, warn};

/// 首次使用时创建配置文件、目录与数据库
pub async fn run_init(config_path: &Path, force: bool) -> Result<()> {
    info!("⚓ Harbor 初始化");
    info!("======================");

    if config_path.exists() && !force {
        warn!("⚠️  配置文件已存在: {}", config_path.display());
        info!("如果您要重新初始化，请使用 --force 参数");
        info!("示例: harbor init --force");
        return Ok(());
    }

    info!("📋 步骤 1: 创建配置文件和目录结构");
    AppConfig::default().save_to_file(config_path)?;
    info!("   ✅ 创建配置文件: {}", config_path.display());

    // 重新加载，让相对路径落在配置文件所在目录下
    let config = AppConfig::load_from_file(config_path)?;

    config.ensure_storage_dirs()?;
    info!("   ✅ 创建目录结构:");
    info!("      - {} (备份存储目录)", config.storage.backup_dir);
    info!("      - {} (临时目录)", config.storage.temp_dir);

    info!("📋 步骤 2: 初始化数据库");
    let db_path = config.get_database_path();
    Database::connect(&db_path).await?;
    info!("   ✅ 创建DuckDB数据库: {}", db_path.display());

    info!("🎉 初始化完成！");
    info!("💡 下一步:");
    info!("   1. 在 {} 中添加 [[targets]] 目标配置", config_path.display());
    info!("   2. 运行 'harbor targets' 检查目标");
    info!("   3. 运行 'harbor backup create <目标ID>' 创建第一个备份");
    info!("   4. 运行 'harbor backup schedule <目标ID>' 设置定时备份");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[tokio::test]
    async fn test_init_keeps_existing_config_without_force() {
        let tmp = tempdir().unwrap();
        let path = tmp.path().join("harbor.toml");
        std::fs::write(&path, "# custom").unwrap();

        run_init(&path, false).await.unwrap();
        assert_eq!(std::fs::read_to_string(&path).unwrap(), "# custom");
    }

    #[tokio::test]
    async fn test_init_creates_storage_next_to_config() {
        let tmp = tempdir().unwrap();
        let path = tmp.path().join("harbor.toml");

        run_init(&path, false).await.unwrap();
        assert!(path.exists());
        assert!(tmp.path().join("backups").is_dir());
        assert!(tmp.path().join("data").join("harbor.db").exists());
    }
}
