/// 备份相关常量
pub mod backup {
    use std::path::{Path, PathBuf};

    /// 备份目录名
    pub const BACKUP_DIR_NAME: &str = "backups";

    /// 备份集目录前缀
    pub const BACKUP_PREFIX: &str = "backup_";

    /// 备份集目录的时间戳格式（本地时间）
    pub const TIMESTAMP_FORMAT: &str = "%Y%m%d_%H%M%S";

    /// 未提交的暂存目录标记文件
    pub const STAGING_MARKER: &str = ".incomplete";

    /// 目标级互斥锁文件
    pub const LOCK_FILE_NAME: &str = ".backup.lock";

    /// 数据库导出文件扩展名
    pub const SQL_EXTENSION: &str = ".sql";

    /// 文件树归档扩展名
    pub const ARCHIVE_EXTENSIONS: [&str; 2] = [".tar.gz", ".tgz"];

    /// 归档根目录名无法推断时使用的名字
    pub const DEFAULT_ARCHIVE_ROOT: &str = "files";

    /// 默认保留的备份数量
    pub const DEFAULT_RETENTION_COUNT: u32 = 3;

    /// 默认 gzip 压缩级别 (0-9)
    pub const DEFAULT_COMPRESSION_LEVEL: u32 = 6;

    /// 同一秒内重复创建备份时允许的最大后缀序号
    pub const MAX_NAME_ATTEMPTS: u32 = 100;

    /// 获取默认备份存储目录
    pub fn get_default_storage_dir() -> PathBuf {
        Path::new(".").join(BACKUP_DIR_NAME)
    }

    /// 获取默认临时目录（恢复时下载备份文件用）
    pub fn get_default_temp_dir() -> PathBuf {
        Path::new(".").join(BACKUP_DIR_NAME).join(".temp")
    }
}

/// 存储提供者相关常量
pub mod storage {
    /// 本地存储提供者名称
    pub const LOCAL_PROVIDER: &str = "local";

    /// 远程存储提供者名称前缀
    pub const REMOTE_PROVIDER_PREFIX: &str = "rclone:";

    /// 远程端备份根路径
    pub const DEFAULT_REMOTE_BASE_PATH: &str = "backups";
}

/// Rclone 相关常量
pub mod rclone {
    /// 默认 rclone 可执行文件
    pub const DEFAULT_BINARY: &str = "rclone";

    /// rclone 报告目录不存在时的输出片段
    pub const DIRECTORY_NOT_FOUND: &str = "directory not found";

    /// rclone 报告目录已存在时的输出片段
    pub const ALREADY_EXISTS: &str = "already exists";
}

/// Cron任务相关常量
pub mod cron {
    /// 默认自动备份cron表达式（每天凌晨2点）
    pub const DEFAULT_BACKUP_CRON: &str = "0 2 * * *";

    /// Cron表达式字段数量
    pub const CRON_FIELDS_COUNT: usize = 5;

    /// crontab 条目注释标记
    pub const DEFAULT_COMMENT_MARKER: &str = "harbor";

    /// 任务ID前缀
    pub const JOB_ID_PREFIX: &str = "job_";

    /// 备份任务类型
    pub const BACKUP_JOB_TYPE: &str = "backup";

    /// 任务日志时间格式
    pub const LOG_TIME_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

    /// 任务参数键
    pub mod params {
        pub const PROVIDER: &str = "provider";
        pub const RETENTION_COUNT: &str = "retention_count";
        pub const CLOUD_SYNC: &str = "cloud_sync";
        pub const CLOUD_PROVIDER: &str = "cloud_provider";
    }
}

/// 应用配置相关常量
pub mod config {
    use std::path::{Path, PathBuf};

    /// 数据目录名
    pub const DATA_DIR_NAME: &str = "data";

    /// 配置文件名
    pub const CONFIG_FILE_NAME: &str = "harbor.toml";

    /// 查找配置文件时的候选文件名（按优先级）
    pub const CONFIG_FILE_CANDIDATES: [&str; 3] = ["harbor.toml", "config.toml", ".harbor.toml"];

    /// 数据库文件名
    pub const DATABASE_FILE_NAME: &str = "harbor.db";

    /// 获取数据库文件路径
    pub fn get_database_path() -> PathBuf {
        Path::new(".").join(DATA_DIR_NAME).join(DATABASE_FILE_NAME)
    }
}

/// 数据库访问相关常量
pub mod database {
    /// 数据库文件旁的进程锁后缀，如 `harbor.db.lock`
    pub const LOCK_FILE_SUFFIX: &str = ".lock";

    /// 等待其他进程释放数据库的最长时间（秒）
    pub const LOCK_TIMEOUT_SECS: u64 = 60;

    /// 重试间隔的初始值与上限（毫秒）
    pub const LOCK_RETRY_INITIAL_MS: u64 = 20;
    pub const LOCK_RETRY_MAX_MS: u64 = 1000;
}

/// 日志相关常量
pub mod logging {
    /// 默认日志级别
    pub const DEFAULT_LOG_LEVEL: &str = "info";

    /// 设置后日志写入该文件而非终端
    pub const LOG_FILE_ENV: &str = "HARBOR_LOG_FILE";

    /// 定时任务日志文件名，位于数据库所在目录
    pub const CRON_LOG_FILE_NAME: &str = "harbor-cron.log";
}
