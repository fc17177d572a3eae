use crate::{HarborError, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

/// 被管理的目标（站点）配置
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TargetConfig {
    /// 目标唯一标识，例如域名
    pub id: String,
    /// 需要归档的文件树根目录
    pub files_dir: PathBuf,
    /// 目标的 docker-compose 文件，用于恢复后重启
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub compose_file: Option<PathBuf>,
    /// Web 容器名，恢复文件后在其中修正属主
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub web_container: Option<String>,
    /// 恢复后设置的文件属主，例如 "www-data:www-data"
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub file_owner: Option<String>,
    /// 文件树在 Web 容器内的路径，默认与主机路径相同
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub container_files_dir: Option<String>,
    /// 数据库配置，未配置时备份只包含文件归档
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub database: Option<TargetDatabase>,
}

/// 目标数据库配置
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TargetDatabase {
    /// 数据库所在容器
    pub container: String,
    /// 数据库名
    pub name: String,
    #[serde(default = "default_db_user")]
    pub user: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub password: Option<String>,
}

fn default_db_user() -> String {
    "root".to_string()
}

impl TargetConfig {
    /// 归档内根目录名，取文件树目录名
    pub fn archive_root_name(&self) -> String {
        self.files_dir
            .file_name()
            .map(|name| name.to_string_lossy().to_string())
            .filter(|name| !name.is_empty())
            .unwrap_or_else(|| crate::constants::backup::DEFAULT_ARCHIVE_ROOT.to_string())
    }

    pub fn files_dir(&self) -> &Path {
        &self.files_dir
    }

    /// Web 容器内看到的文件树路径
    pub fn container_files_dir(&self) -> String {
        self.container_files_dir
            .clone()
            .unwrap_or_else(|| self.files_dir.to_string_lossy().to_string())
    }
}

/// 校验目标ID：它会被用作目录名和远程路径的一部分
pub fn validate_target_id(id: &str) -> Result<()> {
    if id.trim().is_empty() {
        return Err(HarborError::configuration("目标ID不能为空"));
    }
    if id == "." || id == ".." || id.contains('/') || id.contains('\\') || id.contains(':') {
        return Err(HarborError::configuration(format!(
            "目标ID包含非法字符: {id}"
        )));
    }
    Ok(())
}

/// 目标元数据来源
pub trait TargetCatalog: Send + Sync {
    fn get_target(&self, id: &str) -> Option<TargetConfig>;

    fn list_targets(&self) -> Vec<TargetConfig>;
}

/// 基于配置文件 `[[targets]]` 的静态目录
#[derive(Debug, Clone, Default)]
pub struct StaticCatalog {
    targets: BTreeMap<String, TargetConfig>,
}

impl StaticCatalog {
    pub fn new(targets: Vec<TargetConfig>) -> Result<Self> {
        let mut map = BTreeMap::new();
        for target in targets {
            validate_target_id(&target.id)?;
            if map.contains_key(&target.id) {
                return Err(HarborError::configuration(format!(
                    "重复的目标ID: {}",
                    target.id
                )));
            }
            map.insert(target.id.clone(), target);
        }
        Ok(Self { targets: map })
    }
}

impl TargetCatalog for StaticCatalog {
    fn get_target(&self, id: &str) -> Option<TargetConfig> {
        self.targets.get(id).cloned()
    }

    fn list_targets(&self) -> Vec<TargetConfig> {
        self.targets.values().cloned().collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn target(id: &str) -> TargetConfig {
        TargetConfig {
            id: id.to_string(),
            files_dir: PathBuf::from(format!("/srv/{id}/wordpress")),
            compose_file: None,
            web_container: None,
            file_owner: None,
            container_files_dir: None,
            database: None,
        }
    }

    #[test]
    fn test_validate_target_id() {
        assert!(validate_target_id("example.com").is_ok());
        assert!(validate_target_id("").is_err());
        assert!(validate_target_id("..").is_err());
        assert!(validate_target_id("a/b").is_err());
        assert!(validate_target_id("rclone:x").is_err());
    }

    #[test]
    fn test_catalog_rejects_duplicates() {
        let result = StaticCatalog::new(vec![target("a.com"), target("a.com")]);
        assert!(matches!(result, Err(HarborError::Configuration(_))));
    }

    #[test]
    fn test_archive_root_name() {
        assert_eq!(target("a.com").archive_root_name(), "wordpress");

        let mut bare = target("b.com");
        bare.files_dir = PathBuf::from("/");
        assert_eq!(bare.archive_root_name(), "files");
    }
}
