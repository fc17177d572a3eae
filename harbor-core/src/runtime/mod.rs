//! 目标运行时与数据库引擎
//!
//! 备份流水线与恢复流程只依赖这里的两个能力接口，
//! 具体实现通过 docker CLI 操作目标的容器。

mod docker;
mod mysql;

pub use docker::DockerRuntime;
pub(crate) use docker::run_docker_command;
pub use mysql::MysqlEngine;

use crate::Result;
use crate::target::TargetConfig;
use async_trait::async_trait;
use std::path::Path;
use std::process::Output;

/// 目标运行时控制
#[async_trait]
pub trait TargetRuntime: Send + Sync {
    /// 重启目标的全部服务
    async fn restart(&self, target: &TargetConfig) -> Result<()>;

    /// 在容器中执行命令
    async fn exec(&self, container: &str, args: &[&str], user: Option<&str>) -> Result<Output>;
}

/// 数据库导出与导入
#[async_trait]
pub trait DatabaseEngine: Send + Sync {
    /// 把目标数据库导出为 SQL 文件
    async fn dump(&self, target: &TargetConfig, dest: &Path) -> Result<()>;

    /// 从 SQL 文件导入；`reset` 为真时先删除并重建数据库
    async fn import(&self, target: &TargetConfig, sql_file: &Path, reset: bool) -> Result<()>;
}
