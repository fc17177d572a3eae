//! 系统 crontab 调度后端
//!
//! 每个任务占一行，行尾带有 `# <marker>_<job_id>` 注释用于识别，
//! 禁用的任务整行以 `# ` 注释掉。不带标记的行原样保留。

use super::models::validate_cron_expression;
use crate::{HarborError, Result};
use async_trait::async_trait;
use std::process::Stdio;
use tokio::io::AsyncWriteExt;
use tokio::process::Command;
use tracing::{debug, info};

/// 一条调度条目
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScheduleEntry {
    pub job_id: String,
    pub expression: String,
    /// 触发时执行的命令，任务ID追加在末尾
    pub command: String,
    pub enabled: bool,
}

/// 操作系统定时调度器
#[async_trait]
pub trait SchedulerBackend: Send + Sync {
    /// 安装或替换任务的条目
    async fn install(&self, entry: &ScheduleEntry) -> Result<()>;

    /// 移除任务的条目，返回条目是否存在
    async fn remove(&self, job_id: &str) -> Result<bool>;

    /// 启用或禁用条目，返回条目是否存在
    async fn set_enabled(&self, job_id: &str, enabled: bool) -> Result<bool>;
}

/// 通过 `crontab -l` / `crontab -` 读写当前用户（或指定用户）的 crontab
#[derive(Debug, Clone)]
pub struct SystemCrontab {
    marker: String,
    user: Option<String>,
}

impl SystemCrontab {
    pub fn new(marker: impl Into<String>, user: Option<String>) -> Self {
        Self {
            marker: marker.into(),
            user,
        }
    }

    fn command(&self) -> Command {
        let mut cmd = Command::new("crontab");
        if let Some(user) = &self.user {
            cmd.args(["-u", user.as_str()]);
        }
        cmd
    }

    async fn read(&self) -> Result<String> {
        let output = self
            .command()
            .arg("-l")
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .output()
            .await
            .map_err(|e| HarborError::scheduling(format!("无法执行 crontab: {e}")))?;

        if output.status.success() {
            return Ok(String::from_utf8_lossy(&output.stdout).to_string());
        }

        let stderr = String::from_utf8_lossy(&output.stderr);
        if stderr.contains("no crontab for") {
            debug!("当前用户没有 crontab，视为空");
            return Ok(String::new());
        }
        Err(HarborError::scheduling(format!(
            "读取 crontab 失败: {}",
            stderr.trim()
        )))
    }

    async fn write(&self, content: &str) -> Result<()> {
        let mut child = self
            .command()
            .arg("-")
            .stdin(Stdio::piped())
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|e| HarborError::scheduling(format!("无法执行 crontab: {e}")))?;

        if let Some(mut stdin) = child.stdin.take() {
            stdin.write_all(content.as_bytes()).await?;
            stdin.shutdown().await?;
        }

        let output = child.wait_with_output().await?;
        if !output.status.success() {
            return Err(HarborError::scheduling(format!(
                "写入 crontab 失败: {}",
                String::from_utf8_lossy(&output.stderr).trim()
            )));
        }
        Ok(())
    }
}

#[async_trait]
impl SchedulerBackend for SystemCrontab {
    async fn install(&self, entry: &ScheduleEntry) -> Result<()> {
        let current = self.read().await?;
        let updated = upsert_entry(&current, entry, &self.marker)?;
        self.write(&updated).await?;
        info!("已安装 crontab 条目: {}", entry.job_id);
        Ok(())
    }

    async fn remove(&self, job_id: &str) -> Result<bool> {
        let current = self.read().await?;
        let (updated, found) = remove_entry(&current, job_id, &self.marker);
        if found {
            self.write(&updated).await?;
            info!("已移除 crontab 条目: {}", job_id);
        }
        Ok(found)
    }

    async fn set_enabled(&self, job_id: &str, enabled: bool) -> Result<bool> {
        let current = self.read().await?;
        let (updated, found) = toggle_entry(&current, job_id, &self.marker, enabled);
        if found {
            self.write(&updated).await?;
        }
        Ok(found)
    }
}

fn tag(marker: &str, job_id: &str) -> String {
    format!("# {marker}_{job_id}")
}

fn is_entry_for(line: &str, marker: &str, job_id: &str) -> bool {
    line.trim_end().ends_with(&tag(marker, job_id))
}

/// 渲染条目对应的一行
pub fn render_line(entry: &ScheduleEntry, marker: &str) -> Result<String> {
    validate_cron_expression(&entry.expression)?;
    if entry.command.contains('\n')
        || entry.job_id.contains(|c: char| c.is_whitespace() || c == '%')
    {
        return Err(HarborError::scheduling(format!(
            "任务 {} 的命令或ID包含非法字符",
            entry.job_id
        )));
    }

    let prefix = if entry.enabled { "" } else { "# " };
    Ok(format!(
        "{prefix}{} {} {} {}",
        entry.expression.split_whitespace().collect::<Vec<_>>().join(" "),
        // cron 把命令中未转义的 % 当作换行
        entry.command.trim().replace('%', "\\%"),
        entry.job_id,
        tag(marker, &entry.job_id)
    ))
}

fn join_lines(lines: Vec<String>) -> String {
    if lines.is_empty() {
        return String::new();
    }
    let mut content = lines.join("\n");
    content.push('\n');
    content
}

/// 替换或追加条目，其余行保持不变
pub fn upsert_entry(content: &str, entry: &ScheduleEntry, marker: &str) -> Result<String> {
    let line = render_line(entry, marker)?;
    let mut replaced = false;
    let mut lines = Vec::new();

    for existing in content.lines() {
        if is_entry_for(existing, marker, &entry.job_id) {
            if !replaced {
                lines.push(line.clone());
                replaced = true;
            }
        } else {
            lines.push(existing.to_string());
        }
    }
    if !replaced {
        lines.push(line);
    }

    Ok(join_lines(lines))
}

/// 删除条目，返回新内容与条目是否存在
pub fn remove_entry(content: &str, job_id: &str, marker: &str) -> (String, bool) {
    let mut found = false;
    let lines = content
        .lines()
        .filter(|line| {
            let hit = is_entry_for(line, marker, job_id);
            found |= hit;
            !hit
        })
        .map(str::to_string)
        .collect();
    (join_lines(lines), found)
}

/// 注释或取消注释条目
pub fn toggle_entry(content: &str, job_id: &str, marker: &str, enabled: bool) -> (String, bool) {
    let mut found = false;
    let lines = content
        .lines()
        .map(|line| {
            if !is_entry_for(line, marker, job_id) {
                return line.to_string();
            }
            found = true;
            let body = line.trim_start().trim_start_matches('#').trim_start();
            if enabled {
                body.to_string()
            } else {
                format!("# {body}")
            }
        })
        .collect();
    (join_lines(lines), found)
}

#[cfg(test)]
mod tests {
    use super::*;

    const FOREIGN: &str = "MAILTO=root\n15 4 * * * /usr/bin/certbot renew\n";

    fn entry(job_id: &str, enabled: bool) -> ScheduleEntry {
        ScheduleEntry {
            job_id: job_id.to_string(),
            expression: "30 2 * * 0".to_string(),
            command: "/usr/local/bin/harbor cron run-job".to_string(),
            enabled,
        }
    }

    #[test]
    fn test_render_line() {
        assert_eq!(
            render_line(&entry("job_1", true), "harbor").unwrap(),
            "30 2 * * 0 /usr/local/bin/harbor cron run-job job_1 # harbor_job_1"
        );
        assert!(render_line(&entry("job_1", false), "harbor")
            .unwrap()
            .starts_with("# 30 2"));

        let mut bad = entry("job_1", true);
        bad.job_id = "job%1".to_string();
        assert!(matches!(
            render_line(&bad, "harbor"),
            Err(HarborError::Scheduling(_))
        ));

        let mut bad = entry("job_1", true);
        bad.expression = "* * *".to_string();
        assert!(matches!(
            render_line(&bad, "harbor"),
            Err(HarborError::Scheduling(_))
        ));
    }

    #[test]
    fn test_render_line_escapes_percent_and_keeps_quotes() {
        let mut quoted = entry("job_1", true);
        quoted.command =
            "HARBOR_LOG_FILE='/srv/my data/harbor-cron.log' '/opt/harbor 2/harbor' -c '/srv/my data/100%.toml' cron run-job"
                .to_string();

        let line = render_line(&quoted, "harbor").unwrap();
        assert_eq!(
            line,
            "30 2 * * 0 HARBOR_LOG_FILE='/srv/my data/harbor-cron.log' '/opt/harbor 2/harbor' \
             -c '/srv/my data/100\\%.toml' cron run-job job_1 # harbor_job_1"
        );
        assert!(!line.replace("\\%", "").contains('%'));
    }

    #[test]
    fn test_upsert_keeps_foreign_lines() {
        let added = upsert_entry(FOREIGN, &entry("job_1", true), "harbor").unwrap();
        assert!(added.starts_with(FOREIGN));
        assert_eq!(added.lines().count(), 3);

        let mut changed = entry("job_1", true);
        changed.expression = "0 3 * * *".to_string();
        let replaced = upsert_entry(&added, &changed, "harbor").unwrap();
        assert_eq!(replaced.lines().count(), 3);
        assert!(replaced.contains("0 3 * * * /usr/local/bin/harbor"));
        assert!(!replaced.contains("30 2 * * 0"));
    }

    #[test]
    fn test_remove_and_toggle() {
        let content = upsert_entry(FOREIGN, &entry("job_1", true), "harbor").unwrap();
        let content = upsert_entry(&content, &entry("job_2", true), "harbor").unwrap();

        let (disabled, found) = toggle_entry(&content, "job_1", "harbor", false);
        assert!(found);
        assert!(disabled.contains("# 30 2 * * 0 /usr/local/bin/harbor cron run-job job_1"));
        assert!(disabled.contains("\n30 2 * * 0 /usr/local/bin/harbor cron run-job job_2"));

        let (enabled, _) = toggle_entry(&disabled, "job_1", "harbor", true);
        assert_eq!(enabled, content);

        let (removed, found) = remove_entry(&content, "job_1", "harbor");
        assert!(found);
        assert!(!removed.contains("job_1"));
        assert!(removed.starts_with(FOREIGN));

        let (_, missing) = remove_entry(FOREIGN, "job_1", "harbor");
        assert!(!missing);
    }
}
