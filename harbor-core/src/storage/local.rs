use super::{ArtifactFile, ArtifactMetadata, ArtifactRef, StorageProvider, is_set_name, sort_newest_first, split_local_artifact};
use crate::constants::backup::STAGING_MARKER;
use crate::constants::storage::LOCAL_PROVIDER;
use crate::target::validate_target_id;
use crate::{HarborError, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::SystemTime;
use tracing::{debug, info};
use walkdir::WalkDir;

/// 本地磁盘存储：`<root>/<target>/backup_<ts>/`
#[derive(Debug, Clone)]
pub struct LocalStorage {
    root: PathBuf,
}

impl LocalStorage {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// 目标的备份目录，目标ID不能逃出存储根目录
    pub fn target_dir(&self, target_id: &str) -> Result<PathBuf> {
        validate_target_id(target_id)?;
        Ok(self.root.join(target_id))
    }

    fn resolve(&self, target_id: &str, artifact_name: &str) -> Result<PathBuf> {
        let artifact = ArtifactRef::parse(artifact_name)?;
        Ok(self.target_dir(target_id)?.join(artifact.relative_path()))
    }
}

/// 递归复制目录或文件
fn copy_tree(src: &Path, dest: &Path) -> Result<()> {
    if src.is_file() {
        if let Some(parent) = dest.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::copy(src, dest)?;
        return Ok(());
    }

    for entry in WalkDir::new(src) {
        let entry = entry?;
        let relative = entry.path().strip_prefix(src)?;
        let target = dest.join(relative);
        if entry.file_type().is_dir() {
            fs::create_dir_all(&target)?;
        } else {
            fs::copy(entry.path(), &target)?;
        }
    }
    Ok(())
}

fn same_location(a: &Path, b: &Path) -> bool {
    match (a.canonicalize(), b.canonicalize()) {
        (Ok(a), Ok(b)) => a == b,
        _ => a == b,
    }
}

/// 读取一个目标目录下所有已提交的备份集
fn scan_target(target_dir: &Path, target_id: &str) -> Result<Vec<ArtifactMetadata>> {
    let mut artifacts = Vec::new();
    if !target_dir.is_dir() {
        return Ok(artifacts);
    }

    for entry in fs::read_dir(target_dir)? {
        let entry = entry?;
        let name = entry.file_name().to_string_lossy().to_string();
        let path = entry.path();
        if !entry.file_type()?.is_dir() || !is_set_name(&name) {
            continue;
        }
        // 未提交的暂存目录不属于可用备份
        if path.join(STAGING_MARKER).exists() {
            continue;
        }

        let mut size_bytes = 0;
        let mut newest: Option<SystemTime> = None;
        let mut files = Vec::new();
        for file in fs::read_dir(&path)? {
            let file = file?;
            let file_name = file.file_name().to_string_lossy().to_string();
            let metadata = file.metadata()?;
            if !metadata.is_file() || file_name.starts_with('.') {
                continue;
            }
            size_bytes += metadata.len();
            let modified = metadata.modified()?;
            newest = Some(newest.map_or(modified, |n| n.max(modified)));
            files.push(ArtifactFile {
                name: file_name,
                size_bytes: metadata.len(),
            });
        }
        files.sort_by(|a, b| a.name.cmp(&b.name));

        let modified = match newest {
            Some(time) => time,
            None => entry.metadata()?.modified()?,
        };

        artifacts.push(ArtifactMetadata {
            name,
            target_id: target_id.to_string(),
            size_bytes,
            modified_time: DateTime::<Utc>::from(modified),
            path: path.to_string_lossy().to_string(),
            provider: LOCAL_PROVIDER.to_string(),
            files,
        });
    }

    Ok(artifacts)
}

#[async_trait]
impl StorageProvider for LocalStorage {
    fn identity(&self) -> &str {
        LOCAL_PROVIDER
    }

    async fn store(&self, target_id: &str, local_artifact: &Path) -> Result<String> {
        let (set, file) = split_local_artifact(local_artifact)?;
        let mut dest = self.target_dir(target_id)?.join(&set);
        if let Some(file) = &file {
            dest = dest.join(file);
        }

        if same_location(local_artifact, &dest) {
            debug!("备份已位于本地存储中: {}", dest.display());
            return Ok(dest.to_string_lossy().to_string());
        }
        if dest.exists() {
            return Err(HarborError::storage(format!(
                "本地存储中已存在同名备份: {}",
                dest.display()
            )));
        }

        info!("复制备份到本地存储: {}", dest.display());
        let (src, target) = (local_artifact.to_path_buf(), dest.clone());
        tokio::task::spawn_blocking(move || copy_tree(&src, &target)).await??;

        Ok(dest.to_string_lossy().to_string())
    }

    async fn retrieve(
        &self,
        target_id: &str,
        artifact_name: &str,
        dest_dir: &Path,
    ) -> Result<PathBuf> {
        let source = self.resolve(target_id, artifact_name)?;
        if !source.exists() {
            return Err(HarborError::storage(format!(
                "备份不存在: {}",
                source.display()
            )));
        }

        let file_name = source
            .file_name()
            .ok_or_else(|| HarborError::storage(format!("无效的备份路径: {}", source.display())))?;
        let dest = dest_dir.join(file_name);

        let (src, target) = (source.clone(), dest.clone());
        tokio::task::spawn_blocking(move || copy_tree(&src, &target)).await??;

        debug!("已取回 {} -> {}", source.display(), dest.display());
        Ok(dest)
    }

    async fn list(&self, target_id: Option<&str>) -> Result<Vec<ArtifactMetadata>> {
        if let Some(id) = target_id {
            validate_target_id(id)?;
        }
        let root = self.root.clone();
        let target_id = target_id.map(str::to_string);

        tokio::task::spawn_blocking(move || -> Result<Vec<ArtifactMetadata>> {
            let targets = match target_id {
                Some(id) => vec![id],
                None => {
                    let mut ids = Vec::new();
                    if root.is_dir() {
                        for entry in fs::read_dir(&root)? {
                            let entry = entry?;
                            let name = entry.file_name().to_string_lossy().to_string();
                            if entry.file_type()?.is_dir() && !name.starts_with('.') {
                                ids.push(name);
                            }
                        }
                    }
                    ids
                }
            };

            let mut artifacts = Vec::new();
            for id in targets {
                artifacts.extend(scan_target(&root.join(&id), &id)?);
            }
            sort_newest_first(&mut artifacts);
            Ok(artifacts)
        })
        .await?
    }

    async fn delete(&self, target_id: &str, artifact_name: &str) -> Result<()> {
        let path = self.resolve(target_id, artifact_name)?;
        if !path.exists() {
            return Err(HarborError::storage(format!(
                "备份不存在: {}",
                path.display()
            )));
        }

        if path.is_dir() {
            tokio::fs::remove_dir_all(&path).await?;
        } else {
            tokio::fs::remove_file(&path).await?;
        }

        info!("已删除本地备份: {}", path.display());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn make_set(root: &Path, target: &str, set: &str, files: &[(&str, &str)]) -> PathBuf {
        let dir = root.join(target).join(set);
        fs::create_dir_all(&dir).unwrap();
        for (name, content) in files {
            fs::write(dir.join(name), content).unwrap();
        }
        dir
    }

    #[tokio::test]
    async fn test_list_groups_files_and_skips_staging() {
        let tmp = tempdir().unwrap();
        let storage = LocalStorage::new(tmp.path());

        make_set(
            tmp.path(),
            "a.com",
            "backup_20250101_000000",
            &[("db_a.com_20250101_000000.sql", "sql"), ("wordpress.tar.gz", "tgz!")],
        );
        let staging = make_set(tmp.path(), "a.com", "backup_20250102_000000", &[]);
        fs::write(staging.join(STAGING_MARKER), "").unwrap();
        fs::write(tmp.path().join("a.com").join(".backup.lock"), "").unwrap();

        let list = storage.list(Some("a.com")).await.unwrap();
        assert_eq!(list.len(), 1);
        assert_eq!(list[0].name, "backup_20250101_000000");
        assert_eq!(list[0].size_bytes, 7);
        assert_eq!(
            list[0].file_names(),
            vec!["db_a.com_20250101_000000.sql", "wordpress.tar.gz"]
        );
        assert_eq!(list[0].file("wordpress.tar.gz").unwrap().size_bytes, 4);
        assert_eq!(list[0].provider, "local");
    }

    #[tokio::test]
    async fn test_list_all_targets() {
        let tmp = tempdir().unwrap();
        let storage = LocalStorage::new(tmp.path());
        make_set(tmp.path(), "a.com", "backup_20250101_000000", &[("x.sql", "1")]);
        make_set(tmp.path(), "b.com", "backup_20250101_000000", &[("x.sql", "1")]);

        let list = storage.list(None).await.unwrap();
        let mut targets: Vec<&str> = list.iter().map(|m| m.target_id.as_str()).collect();
        targets.sort();
        assert_eq!(targets, vec!["a.com", "b.com"]);

        assert!(LocalStorage::new(tmp.path().join("missing")).list(None).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_store_in_place_is_noop_and_external_copy() {
        let tmp = tempdir().unwrap();
        let storage = LocalStorage::new(tmp.path().join("store"));
        let in_place = make_set(
            &tmp.path().join("store"),
            "a.com",
            "backup_20250101_000000",
            &[("x.sql", "1")],
        );
        let dest = storage.store("a.com", &in_place).await.unwrap();
        assert!(Path::new(&dest).join("x.sql").exists());

        let external = make_set(
            &tmp.path().join("elsewhere"),
            "a.com",
            "backup_20250202_000000",
            &[("y.sql", "2")],
        );
        let dest = storage.store("a.com", &external).await.unwrap();
        assert_eq!(
            PathBuf::from(dest),
            tmp.path().join("store/a.com/backup_20250202_000000")
        );
        assert!(tmp.path().join("store/a.com/backup_20250202_000000/y.sql").exists());
    }

    #[tokio::test]
    async fn test_target_id_cannot_escape_root() {
        let tmp = tempdir().unwrap();
        let storage = LocalStorage::new(tmp.path().join("store"));
        make_set(tmp.path(), "store", "backup_20250101_000000", &[("x.sql", "1")]);

        assert!(matches!(
            storage.list(Some("..")).await,
            Err(HarborError::Configuration(_))
        ));
        assert!(matches!(
            storage.delete("..", "backup_20250101_000000").await,
            Err(HarborError::Configuration(_))
        ));
        assert!(tmp.path().join("store/backup_20250101_000000").exists());
    }

    #[tokio::test]
    async fn test_retrieve_and_delete() {
        let tmp = tempdir().unwrap();
        let storage = LocalStorage::new(tmp.path().join("store"));
        make_set(
            &tmp.path().join("store"),
            "a.com",
            "backup_20250101_000000",
            &[("x.sql", "1"), ("site.tar.gz", "2")],
        );

        let out = tmp.path().join("out");
        let file = storage
            .retrieve("a.com", "backup_20250101_000000/x.sql", &out)
            .await
            .unwrap();
        assert_eq!(file, out.join("x.sql"));
        assert_eq!(fs::read_to_string(&file).unwrap(), "1");

        storage
            .delete("a.com", "backup_20250101_000000/x.sql")
            .await
            .unwrap();
        let list = storage.list(Some("a.com")).await.unwrap();
        assert_eq!(list[0].file_names(), vec!["site.tar.gz"]);

        storage.delete("a.com", "backup_20250101_000000").await.unwrap();
        assert!(storage.list(Some("a.com")).await.unwrap().is_empty());

        let missing = storage.delete("a.com", "backup_20250101_000000").await;
        assert!(matches!(missing, Err(HarborError::Storage(_))));
        let escape = storage.delete("a.com", "../b.com").await;
        assert!(matches!(escape, Err(HarborError::Configuration(_))));
    }
}
