use crate::constants::backup::LOCK_FILE_NAME;
use crate::{HarborError, Result};
use fs2::FileExt;
use std::fs::{self, File, OpenOptions};
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

/// 目标级互斥锁，持有期间同一目标的其他备份立即失败
#[derive(Debug)]
pub struct TargetLock {
    file: File,
    path: PathBuf,
}

impl TargetLock {
    /// 在目标备份目录下获取 `.backup.lock`
    pub fn acquire(target_dir: &Path) -> Result<Self> {
        fs::create_dir_all(target_dir)?;
        let path = target_dir.join(LOCK_FILE_NAME);
        let file = OpenOptions::new()
            .create(true)
            .truncate(false)
            .write(true)
            .open(&path)?;

        file.try_lock_exclusive().map_err(|e| {
            HarborError::storage(format!(
                "目标正在备份中，无法获取锁 {}: {e}",
                path.display()
            ))
        })?;

        debug!("已获取备份锁: {}", path.display());
        Ok(Self { file, path })
    }
}

impl Drop for TargetLock {
    fn drop(&mut self) {
        if let Err(e) = FileExt::unlock(&self.file) {
            warn!("释放备份锁失败 {}: {}", self.path.display(), e);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_lock_is_exclusive_until_dropped() {
        let tmp = tempdir().unwrap();
        let target_dir = tmp.path().join("a.com");

        let lock = TargetLock::acquire(&target_dir).unwrap();
        assert!(matches!(
            TargetLock::acquire(&target_dir),
            Err(HarborError::Storage(_))
        ));

        drop(lock);
        assert!(TargetLock::acquire(&target_dir).is_ok());
    }
}
