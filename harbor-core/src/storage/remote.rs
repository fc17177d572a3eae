use super::{ArtifactFile, ArtifactMetadata, ArtifactRef, StorageProvider, SyncTool, is_set_name, sort_newest_first, split_local_artifact};
use crate::constants::rclone::{ALREADY_EXISTS, DIRECTORY_NOT_FOUND};
use crate::constants::storage::REMOTE_PROVIDER_PREFIX;
use crate::target::validate_target_id;
use crate::{HarborError, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Deserialize;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, info, warn};

/// 通过 rclone 访问的远程存储：`<remote>:<base>/<target>/backup_<ts>/`
#[derive(Clone)]
pub struct RemoteStorage {
    identity: String,
    remote_name: String,
    base_path: String,
    tool: Arc<dyn SyncTool>,
}

/// `rclone lsjson` 输出的一项
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct LsJsonEntry {
    pub path: String,
    pub name: String,
    #[serde(default)]
    pub size: i64,
    pub mod_time: DateTime<Utc>,
    #[serde(default)]
    pub is_dir: bool,
}

impl RemoteStorage {
    pub fn new(remote_name: &str, base_path: &str, tool: Arc<dyn SyncTool>) -> Self {
        Self {
            identity: format!("{REMOTE_PROVIDER_PREFIX}{remote_name}"),
            remote_name: remote_name.to_string(),
            base_path: base_path.trim_matches('/').to_string(),
            tool,
        }
    }

    /// 远程端的相对路径，各段以 `/` 连接
    fn remote_path(&self, parts: &[&str]) -> String {
        std::iter::once(self.base_path.as_str())
            .chain(parts.iter().copied())
            .filter(|p| !p.is_empty())
            .collect::<Vec<_>>()
            .join("/")
    }

    fn remote_spec(&self, path: &str) -> String {
        format!("{}:{}", self.remote_name, path)
    }

    async fn run(&self, args: Vec<String>, action: &str) -> Result<()> {
        let outcome = self.tool.execute(&args).await?;
        if !outcome.success {
            return Err(HarborError::transfer(format!(
                "{action}失败: {}",
                outcome.message()
            )));
        }
        Ok(())
    }

    /// 逐级创建远程目录，rclone mkdir 不支持一次创建多级
    async fn ensure_remote_dirs(&self, relative: &str) -> Result<()> {
        let mut current = String::new();
        for component in relative.split('/').filter(|c| !c.is_empty()) {
            if !current.is_empty() {
                current.push('/');
            }
            current.push_str(component);

            let outcome = self
                .tool
                .execute(&["mkdir".to_string(), self.remote_spec(&current)])
                .await?;
            if !outcome.success && !outcome.message().to_lowercase().contains(ALREADY_EXISTS) {
                warn!("无法创建远程目录 '{}': {}", current, outcome.message());
            }
        }
        Ok(())
    }
}

/// 把 lsjson 输出按备份集聚合
///
/// `target_id` 为空时条目路径形如 `<target>/<set>/<file>`，否则为 `<set>/<file>`。
/// 不符合布局的条目被忽略。
pub fn group_entries(
    entries: &[LsJsonEntry],
    target_id: Option<&str>,
    provider: &str,
    listing_root: &str,
) -> Vec<ArtifactMetadata> {
    let mut sets: BTreeMap<(String, String), ArtifactMetadata> = BTreeMap::new();

    for entry in entries.iter().filter(|e| !e.is_dir) {
        let parts: Vec<&str> = entry.path.split('/').collect();
        let (target, set, file) = match (target_id, parts.as_slice()) {
            (Some(target), [set, file]) => (target, *set, *file),
            (None, [target, set, file]) => (*target, *set, *file),
            _ => continue,
        };
        if !is_set_name(set) {
            continue;
        }

        let key = (target.to_string(), set.to_string());
        let meta = sets.entry(key).or_insert_with(|| {
            let path = match target_id {
                Some(_) => format!("{listing_root}/{set}"),
                None => format!("{listing_root}/{target}/{set}"),
            };
            ArtifactMetadata {
                name: set.to_string(),
                target_id: target.to_string(),
                size_bytes: 0,
                modified_time: entry.mod_time,
                path,
                provider: provider.to_string(),
                files: Vec::new(),
            }
        });
        let size_bytes = u64::try_from(entry.size).unwrap_or(0);
        meta.size_bytes += size_bytes;
        meta.modified_time = meta.modified_time.max(entry.mod_time);
        meta.files.push(ArtifactFile {
            name: file.to_string(),
            size_bytes,
        });
    }

    let mut artifacts: Vec<ArtifactMetadata> = sets
        .into_values()
        .map(|mut meta| {
            meta.files.sort_by(|a, b| a.name.cmp(&b.name));
            meta
        })
        .collect();
    sort_newest_first(&mut artifacts);
    artifacts
}

#[async_trait]
impl StorageProvider for RemoteStorage {
    fn identity(&self) -> &str {
        &self.identity
    }

    async fn store(&self, target_id: &str, local_artifact: &Path) -> Result<String> {
        validate_target_id(target_id)?;
        self.tool.ensure_ready().await?;
        let (set, file) = split_local_artifact(local_artifact)?;

        let set_dir = self.remote_path(&[target_id, set.as_str()]);
        self.ensure_remote_dirs(&set_dir).await?;

        let source = self.tool.tool_path(local_artifact)?;
        let (verb, destination) = match &file {
            Some(file) => ("copyto", self.remote_spec(&format!("{set_dir}/{file}"))),
            None => ("copy", self.remote_spec(&set_dir)),
        };

        info!("上传 {} -> {}", local_artifact.display(), destination);
        self.run(
            vec![verb.to_string(), source, destination.clone()],
            "上传备份",
        )
        .await?;

        Ok(destination)
    }

    async fn retrieve(
        &self,
        target_id: &str,
        artifact_name: &str,
        dest_dir: &Path,
    ) -> Result<PathBuf> {
        validate_target_id(target_id)?;
        let artifact = ArtifactRef::parse(artifact_name)?;
        self.tool.ensure_ready().await?;

        tokio::fs::create_dir_all(dest_dir).await?;
        let local_name = artifact.file.as_deref().unwrap_or(&artifact.set);
        let local_path = dest_dir.join(local_name);

        let relative = artifact.relative_path();
        let source = self.remote_spec(&self.remote_path(&[target_id, relative.as_str()]));
        let verb = if artifact.file.is_some() { "copyto" } else { "copy" };

        info!("下载 {} -> {}", source, local_path.display());
        self.run(
            vec![
                verb.to_string(),
                source,
                self.tool.tool_path(&local_path)?,
            ],
            "下载备份",
        )
        .await?;

        Ok(local_path)
    }

    async fn list(&self, target_id: Option<&str>) -> Result<Vec<ArtifactMetadata>> {
        if let Some(id) = target_id {
            validate_target_id(id)?;
        }
        self.tool.ensure_ready().await?;

        let root = match target_id {
            Some(target) => self.remote_path(&[target]),
            None => self.remote_path(&[]),
        };
        let outcome = self
            .tool
            .execute(&[
                "lsjson".to_string(),
                "--recursive".to_string(),
                self.remote_spec(&root),
            ])
            .await?;

        if !outcome.success {
            if outcome.message().to_lowercase().contains(DIRECTORY_NOT_FOUND) {
                debug!("远程目录不存在，视为空: {}", self.remote_spec(&root));
                return Ok(Vec::new());
            }
            return Err(HarborError::transfer(format!(
                "列出远程备份失败: {}",
                outcome.message()
            )));
        }

        let entries: Vec<LsJsonEntry> = serde_json::from_str(outcome.stdout.trim())?;
        Ok(group_entries(
            &entries,
            target_id,
            &self.identity,
            &self.remote_spec(&root),
        ))
    }

    async fn delete(&self, target_id: &str, artifact_name: &str) -> Result<()> {
        validate_target_id(target_id)?;
        let artifact = ArtifactRef::parse(artifact_name)?;
        self.tool.ensure_ready().await?;

        let relative = artifact.relative_path();
        let path = self.remote_spec(&self.remote_path(&[target_id, relative.as_str()]));
        if artifact.file.is_some() {
            self.run(vec!["deletefile".to_string(), path.clone()], "删除远程文件")
                .await?;
        } else {
            self.run(vec!["delete".to_string(), path.clone()], "删除远程备份")
                .await?;
            let outcome = self
                .tool
                .execute(&["rmdir".to_string(), path.clone()])
                .await?;
            if !outcome.success {
                warn!("删除远程目录 {} 失败: {}", path, outcome.message());
            }
        }

        info!("已删除远程备份: {}", path);
        Ok(())
    }
}
