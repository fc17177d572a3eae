use crate::constants::database::{LOCK_FILE_SUFFIX, LOCK_RETRY_INITIAL_MS, LOCK_RETRY_MAX_MS};
use crate::{HarborError, Result};
use fs2::FileExt;
use std::fs::{File, OpenOptions};
use std::path::{Path, PathBuf};
use std::thread;
use std::time::{Duration, Instant};
use tracing::{debug, warn};

/// 数据库文件的跨进程互斥锁
///
/// DuckDB 同一时刻只允许一个进程以读写方式打开文件，
/// 每次操作前先持有该锁再打开连接，被占用时按退避间隔重试。
#[derive(Debug)]
pub struct DbFileLock {
    file: File,
    path: PathBuf,
}

impl DbFileLock {
    /// 数据库文件对应的锁文件路径
    pub fn path_for(db_path: &Path) -> PathBuf {
        let mut name = db_path.as_os_str().to_os_string();
        name.push(LOCK_FILE_SUFFIX);
        PathBuf::from(name)
    }

    /// 获取锁，超过 `timeout` 仍未获得则返回错误
    pub fn acquire(path: &Path, timeout: Duration) -> Result<Self> {
        let file = OpenOptions::new()
            .create(true)
            .truncate(false)
            .write(true)
            .open(path)?;

        let deadline = Instant::now() + timeout;
        let mut delay = Duration::from_millis(LOCK_RETRY_INITIAL_MS);
        let max_delay = Duration::from_millis(LOCK_RETRY_MAX_MS);

        loop {
            match file.try_lock_exclusive() {
                Ok(()) => break,
                Err(e) => {
                    let now = Instant::now();
                    if now >= deadline {
                        return Err(HarborError::storage(format!(
                            "等待数据库锁超时 {}: {e}",
                            path.display()
                        )));
                    }
                    debug!("数据库被其他进程占用，{}ms 后重试", delay.as_millis());
                    thread::sleep(delay.min(deadline - now));
                    delay = (delay * 2).min(max_delay);
                }
            }
        }

        Ok(Self {
            file,
            path: path.to_path_buf(),
        })
    }
}

impl Drop for DbFileLock {
    fn drop(&mut self) {
        if let Err(e) = FileExt::unlock(&self.file) {
            warn!("释放数据库锁失败 {}: {}", self.path.display(), e);
        }
    }
}
