use super::pipeline::BackupPipeline;
use super::record::{BackupRecord, BackupSchedule, BackupSettings, BackupStore, CloudConfig};
use super::restore::{self, ArtifactKind, TempArea, classify};
use super::retention::{RetentionPolicy, RetentionReport};
use crate::constants::backup::DEFAULT_COMPRESSION_LEVEL;
use crate::constants::cron::{BACKUP_JOB_TYPE, params};
use crate::constants::storage::LOCAL_PROVIDER;
use crate::cron::{CronJob, CronManager};
use crate::runtime::{DatabaseEngine, TargetRuntime};
use crate::storage::{
    ArtifactMetadata, ArtifactRef, LocalStorage, ProviderRegistry, StorageProvider,
};
use crate::target::{TargetCatalog, TargetConfig, validate_target_id};
use crate::{HarborError, Result};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{info, instrument, warn};

/// 备份管理器的目录与压缩选项
#[derive(Debug, Clone)]
pub struct BackupManagerOptions {
    pub storage_dir: PathBuf,
    pub temp_dir: PathBuf,
    pub compression_level: u32,
}

impl BackupManagerOptions {
    pub fn new(storage_dir: impl Into<PathBuf>, temp_dir: impl Into<PathBuf>) -> Self {
        Self {
            storage_dir: storage_dir.into(),
            temp_dir: temp_dir.into(),
            compression_level: DEFAULT_COMPRESSION_LEVEL,
        }
    }
}

/// 一次备份的结果
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreatedBackup {
    pub target_id: String,
    pub set_name: String,
    pub backup_dir: PathBuf,
    pub record: BackupRecord,
    pub total_size: u64,
    pub provider: String,
    /// 提供者返回的存放位置
    pub destination: String,
}

/// 已恢复的一个文件
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RestoredArtifact {
    pub name: String,
    pub kind: ArtifactKind,
    pub size_bytes: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RestoreReport {
    pub target_id: String,
    pub provider: String,
    pub restored: Vec<RestoredArtifact>,
    /// 目标是否已重启
    pub restarted: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeletionReport {
    pub target_id: String,
    pub artifact_name: String,
    pub provider: String,
    pub size_bytes: u64,
}

/// 备份门面：组合流水线、存储提供者与保留策略
pub struct BackupManager {
    catalog: Arc<dyn TargetCatalog>,
    providers: ProviderRegistry,
    pipeline: BackupPipeline,
    engine: Arc<dyn DatabaseEngine>,
    runtime: Arc<dyn TargetRuntime>,
    store: Arc<dyn BackupStore>,
    temp_dir: PathBuf,
}

impl BackupManager {
    /// 创建管理器，本地存储提供者由管理器自行注册
    pub fn new(
        catalog: Arc<dyn TargetCatalog>,
        mut providers: ProviderRegistry,
        engine: Arc<dyn DatabaseEngine>,
        runtime: Arc<dyn TargetRuntime>,
        store: Arc<dyn BackupStore>,
        options: BackupManagerOptions,
    ) -> Self {
        providers.register(Arc::new(LocalStorage::new(&options.storage_dir)));
        let pipeline = BackupPipeline::new(
            &options.storage_dir,
            engine.clone(),
            store.clone(),
            options.compression_level,
        );

        Self {
            catalog,
            providers,
            pipeline,
            engine,
            runtime,
            store,
            temp_dir: options.temp_dir,
        }
    }

    pub fn providers(&self) -> &ProviderRegistry {
        &self.providers
    }

    pub fn storage_dir(&self) -> &Path {
        self.pipeline.storage_root()
    }

    /// 获取目标配置，不存在时为配置错误
    pub fn target(&self, target_id: &str) -> Result<TargetConfig> {
        self.catalog
            .get_target(target_id)
            .ok_or_else(|| HarborError::configuration(format!("未找到目标: {target_id}")))
    }

    pub fn targets(&self) -> Vec<TargetConfig> {
        self.catalog.list_targets()
    }

    /// 运行备份流水线并把备份集交给指定提供者
    #[instrument(skip(self))]
    pub async fn create_backup(&self, target_id: &str, provider_id: &str) -> Result<CreatedBackup> {
        let provider = self.providers.get(provider_id)?;
        let target = self.target(target_id)?;

        let outcome = self.pipeline.run(&target).await?;
        let destination = provider.store(&target.id, &outcome.backup_dir).await?;
        info!("备份 {} 已保存到 {}", outcome.set_name, destination);

        Ok(CreatedBackup {
            target_id: target.id,
            set_name: outcome.set_name,
            backup_dir: outcome.backup_dir,
            record: outcome.record,
            total_size: outcome.total_size,
            provider: provider.identity().to_string(),
            destination,
        })
    }

    /// 恢复备份集中的单个文件，随后重启目标
    #[instrument(skip(self))]
    pub async fn restore_backup(
        &self,
        target_id: &str,
        artifact_name: &str,
        provider_id: &str,
    ) -> Result<RestoreReport> {
        let provider = self.providers.get(provider_id)?;
        let target = self.target(target_id)?;

        let artifact = ArtifactRef::parse(artifact_name)?;
        let Some(file) = artifact.file.as_deref() else {
            return Err(HarborError::configuration(format!(
                "{artifact_name} 是备份集，请指定其中的文件或恢复整个备份集"
            )));
        };
        let kind = classify(file);
        if kind == ArtifactKind::Unknown {
            return Err(HarborError::configuration(format!(
                "无法识别的备份文件类型: {file}"
            )));
        }

        let temp = TempArea::create(&self.temp_dir, "restore_")?;
        let local = provider.retrieve(&target.id, artifact_name, temp.path()).await?;
        let size_bytes = tokio::fs::metadata(&local).await?.len();

        self.restore_file(&target, kind, &local).await?;
        let restarted = self.restart_target(&target).await;

        Ok(RestoreReport {
            target_id: target.id,
            provider: provider.identity().to_string(),
            restored: vec![RestoredArtifact {
                name: file.to_string(),
                kind,
                size_bytes,
            }],
            restarted,
        })
    }

    /// 依次恢复备份集中的数据库与文件归档，最后重启一次
    #[instrument(skip(self))]
    pub async fn restore_backup_set(
        &self,
        target_id: &str,
        set_name: &str,
        provider_id: &str,
    ) -> Result<RestoreReport> {
        let provider = self.providers.get(provider_id)?;
        let target = self.target(target_id)?;
        let artifact = ArtifactRef::parse(set_name)?;
        if artifact.file.is_some() {
            return Err(HarborError::configuration(format!("不是备份集名: {set_name}")));
        }

        let temp = TempArea::create(&self.temp_dir, "restore_")?;
        let local_set = provider.retrieve(&target.id, set_name, temp.path()).await?;

        let mut files = Vec::new();
        for entry in std::fs::read_dir(&local_set)? {
            let entry = entry?;
            let name = entry.file_name().to_string_lossy().to_string();
            match classify(&name) {
                ArtifactKind::Unknown => warn!("跳过无法识别的文件: {}", name),
                kind => files.push((kind, name, entry.path(), entry.metadata()?.len())),
            }
        }
        if files.is_empty() {
            return Err(HarborError::storage(format!(
                "备份集 {set_name} 中没有可恢复的文件"
            )));
        }
        // 数据库在前
        files.sort_by_key(|(kind, name, _, _)| (*kind != ArtifactKind::Database, name.clone()));

        let mut restored = Vec::new();
        for (kind, name, path, size_bytes) in files {
            if kind == ArtifactKind::Database && target.database.is_none() {
                warn!("目标未配置数据库，跳过 {}", name);
                continue;
            }
            self.restore_file(&target, kind, &path).await?;
            restored.push(RestoredArtifact {
                name,
                kind,
                size_bytes,
            });
        }
        let restarted = self.restart_target(&target).await;

        Ok(RestoreReport {
            target_id: target.id,
            provider: provider.identity().to_string(),
            restored,
            restarted,
        })
    }

    async fn restore_file(&self, target: &TargetConfig, kind: ArtifactKind, path: &Path) -> Result<()> {
        match kind {
            ArtifactKind::Database => {
                restore::restore_database(self.engine.as_ref(), target, path).await
            }
            ArtifactKind::Archive => {
                restore::restore_archive(self.runtime.as_ref(), target, path).await
            }
            ArtifactKind::Unknown => Err(HarborError::configuration(format!(
                "无法识别的备份文件类型: {}",
                path.display()
            ))),
        }
    }

    async fn restart_target(&self, target: &TargetConfig) -> bool {
        match self.runtime.restart(target).await {
            Ok(()) => true,
            Err(e) => {
                warn!("恢复完成但重启目标 {} 失败: {}", target.id, e);
                false
            }
        }
    }

    /// 列出备份，未指定提供者时合并所有提供者
    pub async fn list_backups(
        &self,
        target_id: Option<&str>,
        provider_id: Option<&str>,
    ) -> Result<Vec<ArtifactMetadata>> {
        if let Some(id) = target_id {
            validate_target_id(id)?;
        }
        match provider_id {
            Some(id) => self.providers.get(id)?.list(target_id).await,
            None => Ok(self.providers.list_all(target_id).await),
        }
    }

    /// 删除备份集或其中一个文件
    #[instrument(skip(self))]
    pub async fn delete_backup(
        &self,
        target_id: &str,
        artifact_name: &str,
        provider_id: &str,
    ) -> Result<DeletionReport> {
        validate_target_id(target_id)?;
        let provider = self.providers.get(provider_id)?;
        let artifact = ArtifactRef::parse(artifact_name)?;

        let listing = provider.list(Some(target_id)).await?;
        let set = listing
            .iter()
            .find(|meta| meta.name == artifact.set)
            .ok_or_else(|| HarborError::storage(format!("备份不存在: {artifact_name}")))?;
        let size_bytes = match &artifact.file {
            Some(file) => set
                .file(file)
                .map(|f| f.size_bytes)
                .ok_or_else(|| HarborError::storage(format!("备份不存在: {artifact_name}")))?,
            None => set.size_bytes,
        };

        provider.delete(target_id, artifact_name).await?;
        if provider.identity() == LOCAL_PROVIDER {
            self.repoint_record(target_id).await?;
        }

        info!("已删除 {} ({} 字节)", artifact_name, size_bytes);
        Ok(DeletionReport {
            target_id: target_id.to_string(),
            artifact_name: artifact_name.to_string(),
            provider: provider.identity().to_string(),
            size_bytes,
        })
    }

    /// 在本地存储上执行保留策略
    #[instrument(skip(self))]
    pub async fn apply_retention(&self, target_id: &str, keep: u32) -> Result<RetentionReport> {
        validate_target_id(target_id)?;
        let local = self.providers.local()?;
        let listing = local.list(Some(target_id)).await?;
        let expired = RetentionPolicy::new(keep).select_expired(&listing);

        let mut report = RetentionReport {
            target_id: target_id.to_string(),
            keep,
            kept: listing.len() - expired.len(),
            removed: Vec::new(),
        };

        for set in expired {
            match local.delete(target_id, &set.name).await {
                Ok(()) => {
                    info!("保留策略删除 {} ({} 字节)", set.name, set.size_bytes);
                    report.removed.push((set.name, set.size_bytes));
                }
                Err(e) => {
                    warn!("保留策略删除 {} 失败: {}", set.name, e);
                    report.kept += 1;
                }
            }
        }

        if !report.removed.is_empty() {
            self.repoint_record(target_id).await?;
        }
        Ok(report)
    }

    /// 备份记录指向的文件被删除后，改为指向最新的完整备份集或清空
    async fn repoint_record(&self, target_id: &str) -> Result<()> {
        let Some(record) = self.store.get_record(target_id).await? else {
            return Ok(());
        };
        let intact = record.archive_path.exists()
            && record.database_path.as_ref().is_none_or(|p| p.exists());
        if intact {
            return Ok(());
        }

        let listing = self.providers.local()?.list(Some(target_id)).await?;
        let replacement = listing.iter().find_map(|set| {
            let archive = set
                .files
                .iter()
                .find(|f| classify(&f.name) == ArtifactKind::Archive)?;
            let database = set
                .files
                .iter()
                .find(|f| classify(&f.name) == ArtifactKind::Database);
            let dir = PathBuf::from(&set.path);
            Some(BackupRecord {
                target_id: target_id.to_string(),
                set_name: set.name.clone(),
                created_at: set.modified_time,
                archive_path: dir.join(&archive.name),
                database_path: database.map(|f| dir.join(&f.name)),
            })
        });

        match replacement {
            Some(record) => {
                info!("备份记录改为指向 {}", record.set_name);
                self.store.save_record(&record).await
            }
            None => {
                info!("目标 {} 已没有完整的本地备份，清空备份记录", target_id);
                self.store.clear_record(target_id).await
            }
        }
    }

    /// 把计划转换为定时任务，每个目标最多一个备份任务
    #[instrument(skip(self, cron, schedule))]
    pub async fn schedule_backup(
        &self,
        cron: &CronManager,
        target_id: &str,
        schedule: BackupSchedule,
        provider_id: &str,
    ) -> Result<Option<CronJob>> {
        self.target(target_id)?;
        self.providers.get(provider_id)?;
        let expression = schedule.to_cron_expression()?;

        let mut settings = self.backup_settings(target_id).await?;
        let cloud_provider = if schedule.cloud_sync {
            let cloud = settings
                .cloud
                .as_ref()
                .filter(|c| c.enabled)
                .ok_or_else(|| {
                    HarborError::configuration(format!("目标 {target_id} 未配置云同步"))
                })?;
            Some(cloud.provider_id())
        } else {
            None
        };

        let mut existing = cron.find_jobs(BACKUP_JOB_TYPE, Some(target_id)).await?;
        if let Some(bound) = &settings.job_id {
            existing.sort_by_key(|job| job.id != *bound);
        }
        let mut existing = existing.into_iter();
        let current = existing.next();
        for surplus in existing {
            warn!("删除多余的备份任务: {}", surplus.id);
            cron.remove_job(&surplus.id).await?;
        }

        let mut parameters: BTreeMap<String, Value> = BTreeMap::new();
        parameters.insert(params::PROVIDER.to_string(), provider_id.into());
        parameters.insert(
            params::RETENTION_COUNT.to_string(),
            schedule.retention_count.into(),
        );
        parameters.insert(params::CLOUD_SYNC.to_string(), schedule.cloud_sync.into());
        if let Some(cloud_provider) = cloud_provider {
            parameters.insert(params::CLOUD_PROVIDER.to_string(), cloud_provider.into());
        }

        let job = match current {
            Some(mut job) => {
                job.cron_expression = expression;
                job.enabled = schedule.enabled;
                job.parameters = parameters;
                cron.update_job(&job).await?;
                info!("已更新备份任务 {}: {}", job.id, job.cron_expression);
                Some(job)
            }
            None if schedule.enabled => {
                let mut job = CronJob::new(BACKUP_JOB_TYPE, expression, target_id)
                    .with_description(format!("{target_id} 自动备份"));
                job.parameters = parameters;
                cron.add_job(&job).await?;
                info!("已创建备份任务 {}: {}", job.id, job.cron_expression);
                Some(job)
            }
            None => None,
        };

        settings.schedule = schedule;
        settings.job_id = job.as_ref().map(|j| j.id.clone());
        self.store.save_settings(&settings).await?;
        Ok(job)
    }

    /// 删除目标的全部备份任务，返回删除数量
    pub async fn unschedule_backup(&self, cron: &CronManager, target_id: &str) -> Result<usize> {
        let jobs = cron.find_jobs(BACKUP_JOB_TYPE, Some(target_id)).await?;
        for job in &jobs {
            cron.remove_job(&job.id).await?;
        }

        let mut settings = self.backup_settings(target_id).await?;
        settings.schedule.enabled = false;
        settings.job_id = None;
        self.store.save_settings(&settings).await?;

        info!("已删除目标 {} 的 {} 个备份任务", target_id, jobs.len());
        Ok(jobs.len())
    }

    /// 设置或清除云同步配置
    pub async fn set_cloud_config(&self, target_id: &str, cloud: Option<CloudConfig>) -> Result<()> {
        self.target(target_id)?;
        if let Some(cloud) = &cloud {
            if cloud.provider != "rclone" {
                return Err(HarborError::configuration(format!(
                    "不支持的云同步方式: {}",
                    cloud.provider
                )));
            }
            if cloud.remote_name.trim().is_empty() {
                return Err(HarborError::configuration("远程名不能为空"));
            }
            self.providers.get(&cloud.provider_id())?;
        }

        let mut settings = self.backup_settings(target_id).await?;
        settings.cloud = cloud;
        self.store.save_settings(&settings).await
    }

    /// 目标的计划设置，未保存过时返回默认值
    pub async fn backup_settings(&self, target_id: &str) -> Result<BackupSettings> {
        Ok(self
            .store
            .get_settings(target_id)
            .await?
            .unwrap_or_else(|| BackupSettings::new(target_id)))
    }

    pub async fn last_backup(&self, target_id: &str) -> Result<Option<BackupRecord>> {
        self.store.get_record(target_id).await
    }

    /// 把本地备份集上传到远程提供者
    #[instrument(skip(self))]
    pub async fn sync_to_remote(
        &self,
        target_id: &str,
        set_name: &str,
        provider_id: &str,
    ) -> Result<String> {
        validate_target_id(target_id)?;
        if provider_id == LOCAL_PROVIDER {
            return Err(HarborError::configuration("云同步需要远程存储提供者"));
        }
        let artifact = ArtifactRef::parse(set_name)?;
        if artifact.file.is_some() {
            return Err(HarborError::configuration(format!("不是备份集名: {set_name}")));
        }

        let settings = self.backup_settings(target_id).await?;
        let remote_path = settings
            .cloud
            .filter(|c| c.provider_id() == provider_id && !c.remote_path.trim().is_empty())
            .map(|c| c.remote_path);
        let provider: Arc<dyn StorageProvider> = match remote_path {
            Some(base) => self.providers.remote_with_base(provider_id, &base)?,
            None => self.providers.get(provider_id)?,
        };

        let set_dir = self.storage_dir().join(target_id).join(&artifact.set);
        if !set_dir.is_dir() {
            return Err(HarborError::storage(format!(
                "本地备份集不存在: {}",
                set_dir.display()
            )));
        }

        let destination = provider.store(target_id, &set_dir).await?;
        info!("已同步 {} 到 {}", set_name, destination);
        Ok(destination)
    }
}
