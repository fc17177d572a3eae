use clap::{Args, Parser, Subcommand, ValueEnum};
use std::path::PathBuf;

/// 计划频率
#[derive(ValueEnum, Clone, Copy, Debug, PartialEq, Eq)]
pub enum Frequency {
    Daily,
    Weekly,
    Monthly,
}

/// 备份计划参数
#[derive(Args, Debug, Clone)]
pub struct ScheduleArgs {
    /// 执行频率
    #[arg(long, value_enum, default_value = "daily")]
    pub frequency: Frequency,
    /// 小时 (0-23)
    #[arg(long, default_value_t = 2)]
    pub hour: u32,
    /// 分钟 (0-59)
    #[arg(long, default_value_t = 0)]
    pub minute: u32,
    /// 星期几 (0-6，0 为周日)，仅 weekly
    #[arg(long)]
    pub day_of_week: Option<u32>,
    /// 每月第几天 (1-31)，仅 monthly
    #[arg(long)]
    pub day_of_month: Option<u32>,
    /// 保留的备份数量，0 表示不限制
    #[arg(long, default_value_t = 3)]
    pub retention: u32,
    /// 备份完成后同步到云端
    #[arg(long)]
    pub cloud_sync: bool,
    /// 云同步使用的 rclone 远程名
    #[arg(long)]
    pub cloud_remote: Option<String>,
    /// 云端备份根路径，留空使用全局配置
    #[arg(long)]
    pub cloud_path: Option<String>,
    /// 保存计划但不启用
    #[arg(long)]
    pub disabled: bool,
}

/// 备份相关命令
#[derive(Subcommand, Debug)]
pub enum BackupCommand {
    /// 立即创建备份
    Create {
        /// 目标ID
        target: String,
        /// 存储提供者，例如 local 或 rclone:gdrive
        #[arg(long, default_value = "local")]
        provider: String,
    },
    /// 列出备份
    List {
        /// 只列出该目标的备份
        target: Option<String>,
        /// 只列出该提供者的备份
        #[arg(long)]
        provider: Option<String>,
    },
    /// 恢复备份集中的一个文件，例如 backup_20250101_020000/wordpress.tar.gz
    Restore {
        target: String,
        artifact: String,
        #[arg(long, default_value = "local")]
        provider: String,
    },
    /// 恢复整个备份集（先数据库后文件）
    RestoreSet {
        target: String,
        set: String,
        #[arg(long, default_value = "local")]
        provider: String,
    },
    /// 删除备份集或其中一个文件
    Delete {
        target: String,
        artifact: String,
        #[arg(long, default_value = "local")]
        provider: String,
    },
    /// 按保留数量清理本地备份
    Prune {
        target: String,
        /// 保留的备份数量，0 表示不限制
        #[arg(long, default_value_t = 3)]
        keep: u32,
    },
    /// 把本地备份集同步到远程
    Sync {
        target: String,
        set: String,
        /// 远程提供者，例如 rclone:gdrive
        #[arg(long)]
        provider: String,
    },
    /// 设置定时备份
    Schedule {
        target: String,
        #[command(flatten)]
        schedule: ScheduleArgs,
        /// 定时备份使用的存储提供者
        #[arg(long, default_value = "local")]
        provider: String,
    },
    /// 删除定时备份
    Unschedule { target: String },
    /// 显示目标的备份状态
    Status { target: String },
}

/// 定时任务相关命令
#[derive(Subcommand, Debug)]
pub enum CronCommand {
    /// 列出全部任务
    List,
    /// 显示任务详情
    Show { job_id: String },
    /// 启用任务
    Enable { job_id: String },
    /// 禁用任务
    Disable { job_id: String },
    /// 删除任务
    Remove { job_id: String },
    /// 立即执行任务并显示日志
    Run { job_id: String },
    /// 由系统调度器调用：执行任务并以退出码报告结果
    RunJob { job_id: String },
    /// 列出已注册的任务类型
    Types,
}

/// Harbor - 站点备份与定时任务工具
#[derive(Parser)]
#[command(name = "harbor")]
#[command(about = "站点备份、恢复与定时任务管理工具")]
#[command(version)]
pub struct Cli {
    /// 配置文件路径
    #[arg(short, long, default_value = "harbor.toml")]
    pub config: PathBuf,

    /// 详细输出
    #[arg(short, long)]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// 首次使用时初始化，创建配置文件、目录与数据库
    Init {
        /// 如果配置文件已存在，强制覆盖
        #[arg(long)]
        force: bool,
    },
    /// 备份管理
    #[command(subcommand)]
    Backup(BackupCommand),
    /// 定时任务管理
    #[command(subcommand)]
    Cron(CronCommand),
    /// 列出可用的存储提供者
    Providers,
    /// 列出配置的目标
    Targets,
}
