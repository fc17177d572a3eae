//! 存储提供者
//!
//! 备份集 `backup_<ts>` 是存储的基本单位，提供者之间的差异只体现在
//! 备份集存放的位置：本地目录或 rclone 远程。

mod local;
mod rclone;
mod remote;

pub use local::LocalStorage;
pub use rclone::{CommandOutcome, RcloneCli, SyncTool, list_remotes};
pub use remote::{LsJsonEntry, RemoteStorage, group_entries};

use crate::constants::backup::BACKUP_PREFIX;
use crate::constants::storage::{LOCAL_PROVIDER, REMOTE_PROVIDER_PREFIX};
use crate::{HarborError, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Component, Path, PathBuf};
use std::sync::Arc;
use tracing::{info, warn};

/// 一个备份集的元数据
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ArtifactMetadata {
    /// 备份集名 `backup_<ts>`
    pub name: String,
    pub target_id: String,
    pub size_bytes: u64,
    pub modified_time: DateTime<Utc>,
    /// 本地路径或 `remote:path`
    pub path: String,
    pub provider: String,
    /// 备份集内的文件，按名称排序
    pub files: Vec<ArtifactFile>,
}

/// 备份集内的一个文件
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ArtifactFile {
    pub name: String,
    pub size_bytes: u64,
}

impl ArtifactMetadata {
    pub fn file_names(&self) -> Vec<&str> {
        self.files.iter().map(|f| f.name.as_str()).collect()
    }

    pub fn file(&self, name: &str) -> Option<&ArtifactFile> {
        self.files.iter().find(|f| f.name == name)
    }
}

/// 存储提供者接口
#[async_trait]
pub trait StorageProvider: Send + Sync {
    /// 提供者名称，例如 `local` 或 `rclone:gdrive`
    fn identity(&self) -> &str;

    /// 保存本地备份集（或其中一个文件），返回目标位置
    async fn store(&self, target_id: &str, local_artifact: &Path) -> Result<String>;

    /// 把备份集或其中一个文件取回到本地目录 `dest_dir`，返回本地路径
    async fn retrieve(&self, target_id: &str, artifact_name: &str, dest_dir: &Path)
    -> Result<PathBuf>;

    /// 列出备份集，按时间从新到旧
    async fn list(&self, target_id: Option<&str>) -> Result<Vec<ArtifactMetadata>>;

    /// 删除备份集或其中一个文件
    async fn delete(&self, target_id: &str, artifact_name: &str) -> Result<()>;
}

/// 解析后的备份名：备份集，或备份集内的一个文件
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArtifactRef {
    pub set: String,
    pub file: Option<String>,
}

impl ArtifactRef {
    pub fn parse(artifact_name: &str) -> Result<Self> {
        let path = Path::new(artifact_name);
        if artifact_name.is_empty() || path.is_absolute() {
            return Err(HarborError::configuration(format!(
                "非法的备份名: {artifact_name}"
            )));
        }

        let mut parts = Vec::new();
        for component in path.components() {
            match component {
                Component::Normal(part) => parts.push(part.to_string_lossy().to_string()),
                _ => {
                    return Err(HarborError::configuration(format!(
                        "备份名不能包含 `..` 或根路径: {artifact_name}"
                    )));
                }
            }
        }

        let (set, file) = match parts.as_slice() {
            [set] => (set.clone(), None),
            [set, file] => (set.clone(), Some(file.clone())),
            _ => {
                return Err(HarborError::configuration(format!(
                    "备份名必须是 <备份集> 或 <备份集>/<文件>: {artifact_name}"
                )));
            }
        };

        if !is_set_name(&set) {
            return Err(HarborError::configuration(format!(
                "不是备份集名: {set}"
            )));
        }

        Ok(Self { set, file })
    }

    /// 相对于目标备份目录的路径
    pub fn relative_path(&self) -> String {
        match &self.file {
            Some(file) => format!("{}/{}", self.set, file),
            None => self.set.clone(),
        }
    }
}

/// 是否为备份集目录名
pub fn is_set_name(name: &str) -> bool {
    name.len() > BACKUP_PREFIX.len() && name.starts_with(BACKUP_PREFIX)
}

/// 按修改时间从新到旧排序，时间相同时按名称倒序
pub fn sort_newest_first(artifacts: &mut [ArtifactMetadata]) {
    artifacts.sort_by(|a, b| {
        b.modified_time
            .cmp(&a.modified_time)
            .then_with(|| b.name.cmp(&a.name))
    });
}

/// 合并多个提供者的列表
pub fn merge_listings(listings: Vec<Vec<ArtifactMetadata>>) -> Vec<ArtifactMetadata> {
    let mut merged: Vec<ArtifactMetadata> = listings.into_iter().flatten().collect();
    sort_newest_first(&mut merged);
    merged
}

/// 把本地路径拆为 (备份集名, 文件名)
pub(crate) fn split_local_artifact(path: &Path) -> Result<(String, Option<String>)> {
    let name = path
        .file_name()
        .map(|n| n.to_string_lossy().to_string())
        .ok_or_else(|| HarborError::storage(format!("无效的备份路径: {}", path.display())))?;

    if path.is_dir() {
        if !is_set_name(&name) {
            return Err(HarborError::configuration(format!(
                "不是备份集目录: {}",
                path.display()
            )));
        }
        return Ok((name, None));
    }

    if !path.is_file() {
        return Err(HarborError::storage(format!(
            "备份不存在: {}",
            path.display()
        )));
    }

    let set = path
        .parent()
        .and_then(Path::file_name)
        .map(|n| n.to_string_lossy().to_string())
        .filter(|n| is_set_name(n))
        .ok_or_else(|| {
            HarborError::configuration(format!(
                "备份文件不在备份集目录中: {}",
                path.display()
            ))
        })?;

    Ok((set, Some(name)))
}

/// 按名称索引的存储提供者集合
#[derive(Clone, Default)]
pub struct ProviderRegistry {
    providers: BTreeMap<String, Arc<dyn StorageProvider>>,
    sync_tool: Option<Arc<dyn SyncTool>>,
    remote_base_path: String,
}

impl ProviderRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, provider: Arc<dyn StorageProvider>) {
        info!("注册存储提供者: {}", provider.identity());
        self.providers
            .insert(provider.identity().to_string(), provider);
    }

    /// 设置远程提供者使用的同步工具
    pub fn set_sync_tool(&mut self, tool: Arc<dyn SyncTool>, remote_base_path: impl Into<String>) {
        self.sync_tool = Some(tool);
        self.remote_base_path = remote_base_path.into();
    }

    /// 注册远程提供者：使用配置的列表，列表为空时通过 `listremotes` 发现
    pub async fn discover_remotes(&mut self, configured: &[String]) -> Result<usize> {
        let Some(tool) = self.sync_tool.clone() else {
            return Ok(0);
        };

        let remotes = if configured.is_empty() {
            list_remotes(tool.as_ref()).await?
        } else {
            configured.to_vec()
        };

        for remote in &remotes {
            let provider = RemoteStorage::new(remote, &self.remote_base_path, tool.clone());
            self.register(Arc::new(provider));
        }

        Ok(remotes.len())
    }

    /// 获取提供者，未知名称为配置错误
    pub fn get(&self, identity: &str) -> Result<Arc<dyn StorageProvider>> {
        self.providers.get(identity).cloned().ok_or_else(|| {
            HarborError::configuration(format!(
                "未知的存储提供者: {identity}，可用: {}",
                self.identities().join(", ")
            ))
        })
    }

    /// 构造使用指定远程根路径的远程提供者
    pub fn remote_with_base(&self, identity: &str, base_path: &str) -> Result<Arc<dyn StorageProvider>> {
        let remote = identity
            .strip_prefix(REMOTE_PROVIDER_PREFIX)
            .filter(|r| !r.is_empty())
            .ok_or_else(|| {
                HarborError::configuration(format!("不是远程存储提供者: {identity}"))
            })?;
        let tool = self.sync_tool.clone().ok_or_else(|| {
            HarborError::configuration("未启用 rclone，无法使用远程存储")
        })?;

        Ok(Arc::new(RemoteStorage::new(remote, base_path, tool)))
    }

    pub fn identities(&self) -> Vec<String> {
        self.providers.keys().cloned().collect()
    }

    pub fn all(&self) -> Vec<Arc<dyn StorageProvider>> {
        self.providers.values().cloned().collect()
    }

    pub fn local(&self) -> Result<Arc<dyn StorageProvider>> {
        self.get(LOCAL_PROVIDER)
    }

    /// 列出所有提供者的备份，失败的提供者记录警告后跳过
    pub async fn list_all(&self, target_id: Option<&str>) -> Vec<ArtifactMetadata> {
        let mut listings = Vec::new();
        for provider in self.providers.values() {
            match provider.list(target_id).await {
                Ok(list) => listings.push(list),
                Err(e) => warn!("列出 {} 的备份失败，已跳过: {}", provider.identity(), e),
            }
        }
        merge_listings(listings)
    }
}
