use crate::app::CliApp;
use crate::cli::{BackupCommand, Frequency, ScheduleArgs};
use crate::utils::format_size;
use harbor_core::{
    Result,
    backup::{BackupSchedule, CloudConfig, RestoreReport},
    constants::cron::DEFAULT_BACKUP_CRON,
};
use tracing::{info, instrument, warn};

/// 运行备份相关命令
pub async fn run_backup_command(app: &CliApp, cmd: BackupCommand) -> Result<()> {
    match cmd {
        BackupCommand::Create { target, provider } => run_create(app, &target, &provider).await,
        BackupCommand::List { target, provider } => {
            run_list(app, target.as_deref(), provider.as_deref()).await
        }
        BackupCommand::Restore {
            target,
            artifact,
            provider,
        } => {
            info!("♻️  恢复 {} 的备份 {}", target, artifact);
            let report = app
                .backup_manager
                .restore_backup(&target, &artifact, &provider)
                .await?;
            show_restore_report(&report);
            Ok(())
        }
        BackupCommand::RestoreSet {
            target,
            set,
            provider,
        } => {
            info!("♻️  恢复 {} 的备份集 {}", target, set);
            let report = app
                .backup_manager
                .restore_backup_set(&target, &set, &provider)
                .await?;
            show_restore_report(&report);
            Ok(())
        }
        BackupCommand::Delete {
            target,
            artifact,
            provider,
        } => {
            let report = app
                .backup_manager
                .delete_backup(&target, &artifact, &provider)
                .await?;
            info!(
                "🗑️  已删除 {} ({}, {})",
                report.artifact_name,
                report.provider,
                format_size(report.size_bytes)
            );
            Ok(())
        }
        BackupCommand::Prune { target, keep } => {
            let report = app.backup_manager.apply_retention(&target, keep).await?;
            for (name, size) in &report.removed {
                info!("🗑️  {} ({})", name, format_size(*size));
            }
            info!(
                "✅ 清理完成: 保留 {} 个，删除 {} 个，释放 {}",
                report.kept,
                report.removed.len(),
                format_size(report.freed_bytes())
            );
            Ok(())
        }
        BackupCommand::Sync {
            target,
            set,
            provider,
        } => {
            let destination = app
                .backup_manager
                .sync_to_remote(&target, &set, &provider)
                .await?;
            info!("☁️  已同步到 {}", destination);
            Ok(())
        }
        BackupCommand::Schedule {
            target,
            schedule,
            provider,
        } => run_schedule(app, &target, schedule, &provider).await,
        BackupCommand::Unschedule { target } => {
            let removed = app
                .backup_manager
                .unschedule_backup(&app.cron_manager, &target)
                .await?;
            info!("✅ 已删除 {} 个定时备份任务", removed);
            Ok(())
        }
        BackupCommand::Status { target } => show_status(app, &target).await,
    }
}

#[instrument(skip(app))]
async fn run_create(app: &CliApp, target: &str, provider: &str) -> Result<()> {
    info!("💾 创建备份: {}", target);
    let created = app.backup_manager.create_backup(target, provider).await?;

    info!("✅ 备份完成: {}", created.set_name);
    info!("   📁 本地目录: {}", created.backup_dir.display());
    info!("   📦 存放位置: {} ({})", created.destination, created.provider);
    info!("   📏 大小: {}", format_size(created.total_size));
    Ok(())
}

async fn run_list(app: &CliApp, target: Option<&str>, provider: Option<&str>) -> Result<()> {
    let backups = app.backup_manager.list_backups(target, provider).await?;
    if backups.is_empty() {
        info!("📋 暂无备份");
        return Ok(());
    }

    info!("📋 备份列表 (共 {} 个):", backups.len());
    for backup in &backups {
        info!(
            "   {} [{}] {} {} {}",
            backup.name,
            backup.provider,
            backup.target_id,
            backup
                .modified_time
                .with_timezone(&chrono::Local)
                .format("%Y-%m-%d %H:%M:%S"),
            format_size(backup.size_bytes)
        );
        for file in &backup.files {
            info!("      - {} ({})", file.name, format_size(file.size_bytes));
        }
    }
    Ok(())
}

/// 把命令行参数转换为备份计划
pub fn build_schedule(args: &ScheduleArgs) -> BackupSchedule {
    let schedule = match args.frequency {
        Frequency::Daily => BackupSchedule::daily(args.hour, args.minute),
        Frequency::Weekly => {
            BackupSchedule::weekly(args.hour, args.minute, args.day_of_week.unwrap_or(0))
        }
        Frequency::Monthly => {
            BackupSchedule::monthly(args.hour, args.minute, args.day_of_month.unwrap_or(1))
        }
    };

    BackupSchedule {
        enabled: !args.disabled,
        cloud_sync: args.cloud_sync,
        ..schedule.with_retention(args.retention)
    }
}

async fn run_schedule(app: &CliApp, target: &str, args: ScheduleArgs, provider: &str) -> Result<()> {
    if let Some(remote) = &args.cloud_remote {
        let path = args.cloud_path.clone().unwrap_or_default();
        app.backup_manager
            .set_cloud_config(target, Some(CloudConfig::rclone(remote, path)))
            .await?;
        info!("☁️  云同步目标: rclone:{}", remote);
    }

    let schedule = build_schedule(&args);
    match app
        .backup_manager
        .schedule_backup(&app.cron_manager, target, schedule, provider)
        .await?
    {
        Some(job) if job.enabled => info!(
            "✅ 定时备份已设置: {} (任务 {})",
            job.cron_expression, job.id
        ),
        Some(job) => info!("⏸️  定时备份已保存但处于禁用状态 (任务 {})", job.id),
        None => info!("⏸️  定时备份未启用"),
    }
    Ok(())
}

async fn show_status(app: &CliApp, target: &str) -> Result<()> {
    app.backup_manager.target(target)?;
    let settings = app.backup_manager.backup_settings(target).await?;

    info!("📊 {} 的备份状态", target);
    match app.backup_manager.last_backup(target).await? {
        Some(record) => {
            info!("   最近备份: {}", record.set_name);
            info!(
                "   时间: {}",
                record
                    .created_at
                    .with_timezone(&chrono::Local)
                    .format("%Y-%m-%d %H:%M:%S")
            );
            info!("   归档: {}", record.archive_path.display());
            if let Some(db) = &record.database_path {
                info!("   数据库: {}", db.display());
            }
        }
        None => info!("   最近备份: 无"),
    }

    let expression = settings
        .schedule
        .to_cron_expression()
        .unwrap_or_else(|_| DEFAULT_BACKUP_CRON.to_string());
    info!(
        "   定时备份: {} ({})，保留 {} 个",
        if settings.schedule.enabled { "启用" } else { "未启用" },
        expression,
        settings.schedule.retention_count
    );
    if let Some(cloud) = &settings.cloud {
        info!(
            "   云同步: {} {}",
            cloud.provider_id(),
            if settings.schedule.cloud_sync { "(开启)" } else { "(关闭)" }
        );
    }

    if let Some(job_id) = &settings.job_id {
        match app.cron_manager.get_job(job_id).await? {
            Some(job) => info!(
                "   任务: {} 上次执行: {} {}",
                job.id,
                job.last_run
                    .map(|t| t.with_timezone(&chrono::Local).format("%Y-%m-%d %H:%M:%S").to_string())
                    .unwrap_or_else(|| "从未".to_string()),
                job.last_status.map(|s| s.to_string()).unwrap_or_default()
            ),
            None => warn!("   绑定的任务 {} 已不存在", job_id),
        }
    }
    Ok(())
}

fn show_restore_report(report: &RestoreReport) {
    for artifact in &report.restored {
        info!(
            "   ✅ {} [{}] {}",
            artifact.name,
            artifact.kind.as_str(),
            format_size(artifact.size_bytes)
        );
    }
    if report.restarted {
        info!("🔄 目标 {} 已重启", report.target_id);
    } else {
        warn!("⚠️  目标 {} 未能自动重启，请手动检查", report.target_id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use harbor_core::backup::ScheduleType;

    fn args(frequency: Frequency) -> ScheduleArgs {
        ScheduleArgs {
            frequency,
            hour: 3,
            minute: 15,
            day_of_week: None,
            day_of_month: None,
            retention: 7,
            cloud_sync: false,
            cloud_remote: None,
            cloud_path: None,
            disabled: false,
        }
    }

    #[test]
    fn test_build_schedule_defaults() {
        let weekly = build_schedule(&args(Frequency::Weekly));
        assert_eq!(weekly.schedule_type, ScheduleType::Weekly);
        assert_eq!(weekly.day_of_week, Some(0));
        assert_eq!(weekly.retention_count, 7);
        assert_eq!(weekly.to_cron_expression().unwrap(), "15 3 * * 0");

        let mut monthly_args = args(Frequency::Monthly);
        monthly_args.disabled = true;
        let monthly = build_schedule(&monthly_args);
        assert!(!monthly.enabled);
        assert_eq!(monthly.to_cron_expression().unwrap(), "15 3 1 * *");
    }
}
