// DuckDB数据库模块
//
// DuckDB 连接只在一个 Actor 线程中使用，调用方通过消息通道
// 获得异步、类型安全的接口。文件数据库的每次操作都在跨进程锁内
// 打开短期连接，多个 harbor 进程可以共用同一个数据库文件。
//
// 主要组件：
// - DuckDbManager: 供 Database 门面使用的异步接口
// - DuckDbActor: 内部Actor，处理实际的数据库操作
// - DbFileLock: 数据库文件旁的进程锁，带退避重试
// - 行模型和消息定义

mod actor;
mod lock;
mod manager;
mod messages;
mod models;

pub use manager::DuckDbManager;
pub use models::{BackupRecordRow, BackupSettingsRow, CronJobRow};
