use crate::constants::backup::{ARCHIVE_EXTENSIONS, SQL_EXTENSION};
use crate::runtime::{DatabaseEngine, TargetRuntime};
use crate::target::TargetConfig;
use crate::{HarborError, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

/// 按文件名后缀划分的备份类型
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ArtifactKind {
    Database,
    Archive,
    Unknown,
}

impl ArtifactKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ArtifactKind::Database => "database",
            ArtifactKind::Archive => "archive",
            ArtifactKind::Unknown => "unknown",
        }
    }
}

/// 根据文件名判断备份类型
pub fn classify(name: &str) -> ArtifactKind {
    let lower = name.to_lowercase();
    if lower.ends_with(SQL_EXTENSION) {
        ArtifactKind::Database
    } else if ARCHIVE_EXTENSIONS.iter().any(|ext| lower.ends_with(ext)) {
        ArtifactKind::Archive
    } else {
        ArtifactKind::Unknown
    }
}

/// 离开作用域时删除的临时目录
#[derive(Debug)]
pub(crate) struct TempArea {
    path: PathBuf,
}

impl TempArea {
    pub(crate) fn create(parent: &Path, prefix: &str) -> Result<Self> {
        let id = uuid::Uuid::new_v4().simple().to_string();
        let path = parent.join(format!("{prefix}{}", &id[..8]));
        fs::create_dir_all(&path).map_err(|e| {
            HarborError::storage(format!("无法创建临时目录 {}: {e}", path.display()))
        })?;
        Ok(Self { path })
    }

    pub(crate) fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for TempArea {
    fn drop(&mut self) {
        if !self.path.exists() {
            return;
        }
        match fs::remove_dir_all(&self.path) {
            Ok(()) => debug!("已清理临时目录: {}", self.path.display()),
            Err(e) => warn!("清理临时目录 {} 失败: {}", self.path.display(), e),
        }
    }
}

/// 删除并重建数据库后导入 SQL 文件
pub(crate) async fn restore_database(
    engine: &dyn DatabaseEngine,
    target: &TargetConfig,
    sql_file: &Path,
) -> Result<()> {
    if target.database.is_none() {
        return Err(HarborError::configuration(format!(
            "目标 {} 未配置数据库，无法恢复 {}",
            target.id,
            sql_file.display()
        )));
    }

    info!("正在恢复数据库: {}", sql_file.display());
    engine.import(target, sql_file, true).await?;
    info!("数据库恢复完成");
    Ok(())
}

/// 解压归档并原子地替换在线文件树，随后修正文件属主
pub(crate) async fn restore_archive(
    runtime: &dyn TargetRuntime,
    target: &TargetConfig,
    archive: &Path,
) -> Result<()> {
    let live_dir = target.files_dir().to_path_buf();
    let parent = live_dir
        .parent()
        .filter(|p| !p.as_os_str().is_empty())
        .ok_or_else(|| {
            HarborError::configuration(format!("文件目录没有上级目录: {}", live_dir.display()))
        })?
        .to_path_buf();
    fs::create_dir_all(&parent)?;

    // 与在线目录位于同一文件系统，保证 rename 原子
    let staging = TempArea::create(&parent, ".harbor_restore_")?;
    info!("正在解压 {} -> {}", archive.display(), staging.path().display());

    let (archive_path, extract_to) = (archive.to_path_buf(), staging.path().to_path_buf());
    tokio::task::spawn_blocking(move || extract_archive(&archive_path, &extract_to)).await??;

    let extracted = locate_root(staging.path(), &target.archive_root_name())?;
    swap_directories(&live_dir, &extracted, staging.path())?;
    info!("文件树已替换: {}", live_dir.display());

    fix_ownership(runtime, target).await;
    Ok(())
}

fn extract_archive(archive: &Path, dest: &Path) -> Result<()> {
    use flate2::read::GzDecoder;

    let file = fs::File::open(archive)
        .map_err(|e| HarborError::archive(format!("无法打开归档 {}: {e}", archive.display())))?;
    let mut tar = tar::Archive::new(GzDecoder::new(file));
    tar.set_preserve_permissions(true);
    tar.unpack(dest)
        .map_err(|e| HarborError::archive(format!("解压归档失败 {}: {e}", archive.display())))?;
    Ok(())
}

/// 找到解压结果中的文件树根目录
fn locate_root(extracted: &Path, root_name: &str) -> Result<PathBuf> {
    let named = extracted.join(root_name);
    if named.is_dir() {
        return Ok(named);
    }

    let dirs: Vec<PathBuf> = fs::read_dir(extracted)?
        .filter_map(|entry| entry.ok())
        .map(|entry| entry.path())
        .filter(|path| path.is_dir())
        .collect();

    match dirs.as_slice() {
        [only] => Ok(only.clone()),
        _ => Err(HarborError::archive(format!(
            "归档中没有唯一的根目录（期望 {root_name}）"
        ))),
    }
}

/// live -> old，new -> live；第二步失败时把 old 移回
fn swap_directories(live: &Path, new: &Path, scratch: &Path) -> Result<()> {
    let old = scratch.join(".previous");
    let had_live = live.exists();

    if had_live {
        fs::rename(live, &old).map_err(|e| {
            HarborError::storage(format!("无法移走当前文件目录 {}: {e}", live.display()))
        })?;
    }

    if let Err(e) = fs::rename(new, live) {
        if had_live {
            if let Err(back) = fs::rename(&old, live) {
                warn!("还原原文件目录失败 {}: {}", live.display(), back);
            }
        }
        return Err(HarborError::storage(format!(
            "无法替换文件目录 {}: {e}",
            live.display()
        )));
    }

    Ok(())
}

/// 在 Web 容器内修正文件属主，失败只记录警告
async fn fix_ownership(runtime: &dyn TargetRuntime, target: &TargetConfig) {
    let (Some(container), Some(owner)) = (&target.web_container, &target.file_owner) else {
        debug!("未配置 Web 容器或文件属主，跳过属主修正");
        return;
    };

    let dir = target.container_files_dir();
    match runtime
        .exec(container, &["chown", "-R", owner.as_str(), dir.as_str()], None)
        .await
    {
        Ok(output) if output.status.success() => info!("已设置文件属主为 {}", owner),
        Ok(output) => warn!(
            "设置文件属主失败: {}",
            String::from_utf8_lossy(&output.stderr).trim()
        ),
        Err(e) => warn!("设置文件属主失败: {}", e),
    }
}
