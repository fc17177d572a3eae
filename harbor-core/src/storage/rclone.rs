use crate::runtime::run_docker_command;
use crate::{HarborError, Result};
use async_trait::async_trait;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use tokio::process::Command;
use tracing::{debug, info};

/// 外部命令的执行结果
#[derive(Debug, Clone, Default)]
pub struct CommandOutcome {
    pub success: bool,
    pub stdout: String,
    pub stderr: String,
}

impl CommandOutcome {
    /// 合并后的输出，用于错误信息与文本匹配
    pub fn message(&self) -> String {
        let stderr = self.stderr.trim();
        if stderr.is_empty() {
            self.stdout.trim().to_string()
        } else {
            stderr.to_string()
        }
    }
}

/// 远程同步工具
#[async_trait]
pub trait SyncTool: Send + Sync {
    /// 确认工具可用，必要时启动其容器
    async fn ensure_ready(&self) -> Result<()>;

    /// 执行一条工具命令；命令本身失败由 `CommandOutcome::success` 表示
    async fn execute(&self, args: &[String]) -> Result<CommandOutcome>;

    /// 把主机路径转换为工具可见的路径
    fn tool_path(&self, host_path: &Path) -> Result<String>;
}

/// rclone 命令行，可直接在主机上运行，也可以通过 `docker exec` 在容器中运行
#[derive(Debug, Clone)]
pub struct RcloneCli {
    binary: String,
    container: Option<String>,
    /// 主机路径前缀 -> 容器内路径前缀
    mount: Option<(PathBuf, String)>,
}

impl RcloneCli {
    pub fn host(binary: impl Into<String>) -> Self {
        Self {
            binary: binary.into(),
            container: None,
            mount: None,
        }
    }

    pub fn in_container(
        binary: impl Into<String>,
        container: impl Into<String>,
        mount: Option<(PathBuf, String)>,
    ) -> Self {
        Self {
            binary: binary.into(),
            container: Some(container.into()),
            mount,
        }
    }

    async fn container_running(container: &str) -> Result<bool> {
        let output = run_docker_command(&["inspect", "-f", "{{.State.Running}}", container]).await?;
        Ok(output.status.success() && String::from_utf8_lossy(&output.stdout).trim() == "true")
    }
}

#[async_trait]
impl SyncTool for RcloneCli {
    async fn ensure_ready(&self) -> Result<()> {
        let Some(container) = &self.container else {
            if which::which(&self.binary).is_err() {
                return Err(HarborError::transfer(format!(
                    "rclone 未安装或不在 PATH 中: {}",
                    self.binary
                )));
            }
            return Ok(());
        };

        if Self::container_running(container).await? {
            return Ok(());
        }

        info!("rclone 容器 {} 未运行，正在启动...", container);
        let output = run_docker_command(&["start", container]).await?;
        if !output.status.success() {
            return Err(HarborError::transfer(format!(
                "无法启动 rclone 容器 {container}: {}",
                String::from_utf8_lossy(&output.stderr).trim()
            )));
        }
        Ok(())
    }

    async fn execute(&self, args: &[String]) -> Result<CommandOutcome> {
        debug!("rclone {}", args.join(" "));

        let mut cmd = match &self.container {
            Some(container) => {
                let mut cmd = Command::new("docker");
                cmd.args(["exec", container.as_str(), self.binary.as_str()]);
                cmd
            }
            None => Command::new(&self.binary),
        };

        let output = cmd
            .args(args)
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .output()
            .await?;

        Ok(CommandOutcome {
            success: output.status.success(),
            stdout: String::from_utf8_lossy(&output.stdout).to_string(),
            stderr: String::from_utf8_lossy(&output.stderr).to_string(),
        })
    }

    fn tool_path(&self, host_path: &Path) -> Result<String> {
        match (&self.container, &self.mount) {
            (Some(_), Some((host_prefix, container_prefix))) => {
                let relative = host_path.strip_prefix(host_prefix).map_err(|_| {
                    HarborError::configuration(format!(
                        "路径 {} 不在 rclone 容器挂载目录 {} 下",
                        host_path.display(),
                        host_prefix.display()
                    ))
                })?;
                let mapped = Path::new(container_prefix).join(relative);
                Ok(mapped.to_string_lossy().to_string())
            }
            _ => Ok(host_path.to_string_lossy().to_string()),
        }
    }
}

/// 通过 `listremotes` 获取已配置的远程名
pub async fn list_remotes(tool: &dyn SyncTool) -> Result<Vec<String>> {
    tool.ensure_ready().await?;
    let outcome = tool.execute(&["listremotes".to_string()]).await?;
    if !outcome.success {
        return Err(HarborError::transfer(format!(
            "获取远程列表失败: {}",
            outcome.message()
        )));
    }
    Ok(parse_remote_names(&outcome.stdout))
}

/// 解析 `listremotes` 输出，每行一个 `name:`
pub fn parse_remote_names(output: &str) -> Vec<String> {
    output
        .lines()
        .map(str::trim)
        .map(|line| line.strip_suffix(':').unwrap_or(line))
        .filter(|name| !name.is_empty())
        .map(str::to_string)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_remote_names() {
        assert_eq!(
            parse_remote_names("gdrive:\ns3-backup:\n\n"),
            vec!["gdrive".to_string(), "s3-backup".to_string()]
        );
        assert!(parse_remote_names("").is_empty());
    }

    #[test]
    fn test_tool_path_mapping() {
        let cli = RcloneCli::in_container(
            "rclone",
            "rclone",
            Some((PathBuf::from("/srv/backups"), "/data".to_string())),
        );
        assert_eq!(
            cli.tool_path(Path::new("/srv/backups/a.com/backup_1")).unwrap(),
            "/data/a.com/backup_1"
        );
        assert!(cli.tool_path(Path::new("/tmp/x")).is_err());

        let host = RcloneCli::host("rclone");
        assert_eq!(host.tool_path(Path::new("/tmp/x")).unwrap(), "/tmp/x");
    }

    #[test]
    fn test_outcome_message_prefers_stderr() {
        let outcome = CommandOutcome {
            success: false,
            stdout: "out".to_string(),
            stderr: " err \n".to_string(),
        };
        assert_eq!(outcome.message(), "err");
    }
}
