use super::lock::TargetLock;
use super::record::{BackupRecord, BackupStore};
use crate::constants::backup::{
    BACKUP_PREFIX, MAX_NAME_ATTEMPTS, SQL_EXTENSION, STAGING_MARKER, TIMESTAMP_FORMAT,
};
use crate::runtime::DatabaseEngine;
use crate::storage::is_set_name;
use crate::target::TargetConfig;
use crate::{HarborError, Result};
use chrono::{DateTime, Local, Utc};
use std::fmt;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, error, info, instrument, warn};
use walkdir::WalkDir;

/// 备份流水线步骤，按声明顺序执行
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PipelineStep {
    CreateStaging,
    ExportDatabase,
    ArchiveFiles,
    Commit,
    Finalize,
}

/// 步骤失败时的处理方式
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailurePolicy {
    /// 回滚并终止
    Abort,
    /// 记录警告后继续
    WarnAndContinue,
}

impl PipelineStep {
    pub const ALL: [PipelineStep; 5] = [
        PipelineStep::CreateStaging,
        PipelineStep::ExportDatabase,
        PipelineStep::ArchiveFiles,
        PipelineStep::Commit,
        PipelineStep::Finalize,
    ];

    pub fn policy(&self) -> FailurePolicy {
        match self {
            PipelineStep::Finalize => FailurePolicy::WarnAndContinue,
            _ => FailurePolicy::Abort,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            PipelineStep::CreateStaging => "create_staging",
            PipelineStep::ExportDatabase => "export_database",
            PipelineStep::ArchiveFiles => "archive_files",
            PipelineStep::Commit => "commit",
            PipelineStep::Finalize => "finalize",
        }
    }
}

impl fmt::Display for PipelineStep {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// 一次流水线运行的状态，贯穿所有步骤并供回滚使用
#[derive(Debug, Clone)]
pub struct BackupContext {
    pub target: TargetConfig,
    /// 本地时间 `YYYYMMDD_HHMMSS`
    pub timestamp: String,
    pub started_at: DateTime<Utc>,
    pub staging_dir: Option<PathBuf>,
    pub database_file: Option<PathBuf>,
    pub archive_file: Option<PathBuf>,
    pub record: Option<BackupRecord>,
    pub committed: bool,
    pub total_size: u64,
}

impl BackupContext {
    pub fn new(target: TargetConfig) -> Self {
        Self {
            target,
            timestamp: Local::now().format(TIMESTAMP_FORMAT).to_string(),
            started_at: Utc::now(),
            staging_dir: None,
            database_file: None,
            archive_file: None,
            record: None,
            committed: false,
            total_size: 0,
        }
    }

    fn staging_dir(&self) -> Result<&Path> {
        self.staging_dir
            .as_deref()
            .ok_or_else(|| HarborError::custom("暂存目录尚未创建"))
    }

    pub fn set_name(&self) -> Option<String> {
        self.staging_dir
            .as_ref()
            .and_then(|d| d.file_name())
            .map(|n| n.to_string_lossy().to_string())
    }
}

/// 流水线产出
#[derive(Debug, Clone)]
pub struct BackupOutcome {
    pub set_name: String,
    pub backup_dir: PathBuf,
    pub record: BackupRecord,
    pub total_size: u64,
}

/// 备份流水线：暂存 -> 导出数据库 -> 归档文件 -> 提交 -> 收尾
pub struct BackupPipeline {
    storage_root: PathBuf,
    engine: Arc<dyn DatabaseEngine>,
    store: Arc<dyn BackupStore>,
    compression_level: u32,
}

impl BackupPipeline {
    pub fn new(
        storage_root: impl Into<PathBuf>,
        engine: Arc<dyn DatabaseEngine>,
        store: Arc<dyn BackupStore>,
        compression_level: u32,
    ) -> Self {
        Self {
            storage_root: storage_root.into(),
            engine,
            store,
            compression_level,
        }
    }

    pub fn storage_root(&self) -> &Path {
        &self.storage_root
    }

    /// 运行流水线，提交前的任何失败都会删除暂存目录并保持备份记录不变
    #[instrument(skip_all, fields(target = %target.id))]
    pub async fn run(&self, target: &TargetConfig) -> Result<BackupOutcome> {
        let target_dir = self.storage_root.join(&target.id);
        let _lock = TargetLock::acquire(&target_dir)?;
        sweep_abandoned(&target_dir).await;

        let mut ctx = BackupContext::new(target.clone());
        info!("开始备份目标 {}", target.id);

        for step in PipelineStep::ALL {
            debug!("执行步骤 {}", step);
            let Err(e) = self.execute_step(step, &mut ctx).await else {
                continue;
            };

            match step.policy() {
                FailurePolicy::WarnAndContinue => {
                    warn!("步骤 {} 失败，继续执行: {}", step, e);
                }
                FailurePolicy::Abort => {
                    error!("步骤 {} 失败: {}", step, e);
                    if !ctx.committed {
                        rollback(&ctx).await;
                    }
                    return Err(HarborError::Pipeline {
                        step,
                        source: Box::new(e),
                    });
                }
            }
        }

        let backup_dir = ctx.staging_dir.clone();
        match (backup_dir, ctx.set_name(), ctx.record) {
            (Some(backup_dir), Some(set_name), Some(record)) => Ok(BackupOutcome {
                set_name,
                backup_dir,
                record,
                total_size: ctx.total_size,
            }),
            _ => Err(HarborError::custom("流水线结束但未产生备份")),
        }
    }

    async fn execute_step(&self, step: PipelineStep, ctx: &mut BackupContext) -> Result<()> {
        match step {
            PipelineStep::CreateStaging => self.create_staging(ctx).await,
            PipelineStep::ExportDatabase => self.export_database(ctx).await,
            PipelineStep::ArchiveFiles => self.archive_files(ctx).await,
            PipelineStep::Commit => self.commit(ctx).await,
            PipelineStep::Finalize => finalize(ctx).await,
        }
    }

    /// 创建唯一命名的暂存目录并放置未完成标记
    async fn create_staging(&self, ctx: &mut BackupContext) -> Result<()> {
        let target_dir = self.storage_root.join(&ctx.target.id);
        let base = format!("{BACKUP_PREFIX}{}", ctx.timestamp);

        for attempt in 0..MAX_NAME_ATTEMPTS {
            let name = if attempt == 0 {
                base.clone()
            } else {
                format!("{base}_{attempt}")
            };
            let dir = target_dir.join(&name);

            match tokio::fs::create_dir(&dir).await {
                Ok(()) => {
                    // 先登记目录，标记写入失败时也能回滚
                    ctx.staging_dir = Some(dir.clone());
                    tokio::fs::write(dir.join(STAGING_MARKER), ctx.started_at.to_rfc3339())
                        .await
                        .map_err(|e| {
                            HarborError::storage(format!("无法写入暂存标记 {}: {e}", dir.display()))
                        })?;
                    debug!("暂存目录: {}", dir.display());
                    return Ok(());
                }
                Err(e) if e.kind() == ErrorKind::AlreadyExists => continue,
                Err(e) => {
                    return Err(HarborError::storage(format!(
                        "无法创建暂存目录 {}: {e}",
                        dir.display()
                    )));
                }
            }
        }

        Err(HarborError::storage(format!(
            "同一时刻的备份过多，无法为 {base} 分配目录名"
        )))
    }

    async fn export_database(&self, ctx: &mut BackupContext) -> Result<()> {
        if ctx.target.database.is_none() {
            info!("目标 {} 未配置数据库，跳过导出", ctx.target.id);
            return Ok(());
        }

        let file = ctx.staging_dir()?.join(format!(
            "db_{}_{}{SQL_EXTENSION}",
            ctx.target.id, ctx.timestamp
        ));
        self.engine.dump(&ctx.target, &file).await?;
        ctx.database_file = Some(file);
        Ok(())
    }

    async fn archive_files(&self, ctx: &mut BackupContext) -> Result<()> {
        let source_dir = ctx.target.files_dir().to_path_buf();
        if !source_dir.is_dir() {
            return Err(HarborError::archive(format!(
                "文件目录不存在: {}",
                source_dir.display()
            )));
        }

        let root_name = ctx.target.archive_root_name();
        let archive_path = ctx.staging_dir()?.join(format!("{root_name}.tar.gz"));
        info!(
            "正在归档 {} -> {}",
            source_dir.display(),
            archive_path.display()
        );

        let output = archive_path.clone();
        let level = self.compression_level;
        tokio::task::spawn_blocking(move || create_archive(&source_dir, &output, &root_name, level))
            .await??;

        ctx.archive_file = Some(archive_path);
        Ok(())
    }

    /// 移除未完成标记并写入新的备份记录
    async fn commit(&self, ctx: &mut BackupContext) -> Result<()> {
        let staging = ctx.staging_dir()?.to_path_buf();
        let archive_path = ctx
            .archive_file
            .clone()
            .ok_or_else(|| HarborError::archive("没有可提交的归档文件"))?;
        let set_name = ctx
            .set_name()
            .ok_or_else(|| HarborError::custom("无法确定备份集名"))?;

        tokio::fs::remove_file(staging.join(STAGING_MARKER))
            .await
            .map_err(|e| HarborError::storage(format!("无法移除暂存标记: {e}")))?;

        let record = BackupRecord {
            target_id: ctx.target.id.clone(),
            set_name,
            created_at: ctx.started_at,
            archive_path,
            database_path: ctx.database_file.clone(),
        };
        self.store.save_record(&record).await?;

        ctx.record = Some(record);
        ctx.committed = true;
        Ok(())
    }
}

/// 打包文件树，归档内条目以 `root_name` 为根
fn create_archive(source_dir: &Path, output: &Path, root_name: &str, level: u32) -> Result<()> {
    use flate2::Compression;
    use flate2::write::GzEncoder;
    use std::fs::File;
    use tar::Builder;

    let file = File::create(output)
        .map_err(|e| HarborError::archive(format!("无法创建归档文件: {e}")))?;
    let encoder = GzEncoder::new(file, Compression::new(level));
    let mut archive = Builder::new(encoder);

    for entry in WalkDir::new(source_dir) {
        let entry = entry.map_err(|e| HarborError::archive(format!("遍历目录失败: {e}")))?;
        let path = entry.path();
        let relative_path = path
            .strip_prefix(source_dir)
            .map_err(|e| HarborError::archive(format!("计算相对路径失败: {e}")))?;

        // tar 内部统一使用 `/` 分隔
        let archive_path = if relative_path.as_os_str().is_empty() {
            root_name.to_string()
        } else {
            format!(
                "{root_name}/{}",
                relative_path.to_string_lossy().replace('\\', "/")
            )
        };

        if entry.file_type().is_dir() {
            archive
                .append_dir(&archive_path, path)
                .map_err(|e| HarborError::archive(format!("添加目录到归档失败: {e}")))?;
        } else if entry.file_type().is_file() {
            archive
                .append_path_with_name(path, &archive_path)
                .map_err(|e| HarborError::archive(format!("添加文件到归档失败: {e}")))?;
        }
    }

    let encoder = archive
        .into_inner()
        .map_err(|e| HarborError::archive(format!("完成归档失败: {e}")))?;
    encoder
        .finish()
        .map_err(|e| HarborError::archive(format!("完成压缩失败: {e}")))?;

    Ok(())
}

/// 汇总备份大小
async fn finalize(ctx: &mut BackupContext) -> Result<()> {
    let mut total = 0;
    for file in ctx.database_file.iter().chain(ctx.archive_file.iter()) {
        let size = tokio::fs::metadata(file).await?.len();
        info!("  {} ({} 字节)", file.display(), size);
        total += size;
    }
    ctx.total_size = total;

    info!(
        "目标 {} 备份完成: {}，共 {} 字节",
        ctx.target.id,
        ctx.set_name().unwrap_or_default(),
        total
    );
    Ok(())
}

/// 删除暂存目录，备份记录不受影响
async fn rollback(ctx: &BackupContext) {
    let Some(dir) = &ctx.staging_dir else {
        return;
    };

    warn!("回滚：删除暂存目录 {}", dir.display());
    if let Err(e) = tokio::fs::remove_dir_all(dir).await {
        error!("回滚时删除暂存目录失败 {}: {}", dir.display(), e);
    }
}

/// 清理被中断的运行遗留的暂存目录
async fn sweep_abandoned(target_dir: &Path) {
    let Ok(mut entries) = tokio::fs::read_dir(target_dir).await else {
        return;
    };

    while let Ok(Some(entry)) = entries.next_entry().await {
        let name = entry.file_name().to_string_lossy().to_string();
        let path = entry.path();
        if !is_set_name(&name) || !path.join(STAGING_MARKER).exists() {
            continue;
        }

        warn!("清理未完成的备份目录: {}", path.display());
        if let Err(e) = tokio::fs::remove_dir_all(&path).await {
            warn!("清理 {} 失败: {}", path.display(), e);
        }
    }
}
