use super::TargetRuntime;
use crate::target::TargetConfig;
use crate::{HarborError, Result};
use async_trait::async_trait;
use std::path::Path;
use std::process::{Output, Stdio};
use tokio::process::Command;
use tracing::{debug, info, warn};

/// 基于 docker CLI 的目标运行时
#[derive(Debug, Clone, Default)]
pub struct DockerRuntime;

impl DockerRuntime {
    pub fn new() -> Self {
        Self
    }

    /// 检查 Docker 状态
    pub async fn check_docker_status(&self) -> Result<()> {
        if which::which("docker").is_err() {
            return Err(HarborError::docker("Docker 未安装或不在 PATH 中"));
        }

        let output = run_docker_command(&["info"]).await?;
        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(HarborError::docker(format!("Docker 服务未运行: {stderr}")));
        }

        Ok(())
    }

    /// 执行 compose 命令，优先使用 `docker compose`，失败时回退到 `docker-compose`
    async fn run_compose_command(&self, compose_file: &Path, args: &[&str]) -> Result<Output> {
        let compose_path = compose_file.to_string_lossy().to_string();

        let mut cmd_args = vec!["compose", "-f", compose_path.as_str()];
        cmd_args.extend(args);
        if let Ok(output) = run_docker_command(&cmd_args).await {
            if output.status.success() {
                return Ok(output);
            }
            debug!(
                "docker compose 执行失败，尝试 docker-compose: {}",
                String::from_utf8_lossy(&output.stderr)
            );
        }

        let mut standalone_args = vec!["-f", compose_path.as_str()];
        standalone_args.extend(args);
        let output = Command::new("docker-compose")
            .args(&standalone_args)
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .output()
            .await?;

        Ok(output)
    }
}

#[async_trait]
impl TargetRuntime for DockerRuntime {
    async fn restart(&self, target: &TargetConfig) -> Result<()> {
        let Some(compose_file) = &target.compose_file else {
            warn!("目标 {} 未配置 compose 文件，跳过重启", target.id);
            return Ok(());
        };

        if !compose_file.exists() {
            return Err(HarborError::docker(format!(
                "Docker Compose 文件不存在: {}",
                compose_file.display()
            )));
        }

        info!("正在重启目标 {} 的服务...", target.id);
        let output = self.run_compose_command(compose_file, &["restart"]).await?;
        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(HarborError::docker(format!("重启服务失败: {stderr}")));
        }

        info!("目标 {} 已重启", target.id);
        Ok(())
    }

    async fn exec(&self, container: &str, args: &[&str], user: Option<&str>) -> Result<Output> {
        let mut cmd_args = vec!["exec"];
        if let Some(user) = user {
            cmd_args.push("-u");
            cmd_args.push(user);
        }
        cmd_args.push(container);
        cmd_args.extend(args);

        run_docker_command(&cmd_args).await
    }
}

/// 执行 docker 命令
pub(crate) async fn run_docker_command(args: &[&str]) -> Result<Output> {
    let output = Command::new("docker")
        .args(args)
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .output()
        .await?;

    Ok(output)
}
