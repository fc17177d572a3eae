// 私有模块声明
mod app;
mod cli;
mod commands;
mod init;
mod utils;

// 通过 pub use 精确控制对外暴露的接口
pub use app::CliApp;
pub use cli::{BackupCommand, Cli, Commands, CronCommand, Frequency, ScheduleArgs};
pub use commands::build_schedule;
pub use init::run_init;
pub use utils::{format_size, setup_logging};
