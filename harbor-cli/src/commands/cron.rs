use crate::app::CliApp;
use crate::cli::CronCommand;
use harbor_core::{HarborError, Result, cron::CronJob};
use tracing::{error, info, warn};

/// 运行定时任务相关命令
pub async fn run_cron_command(app: &CliApp, cmd: CronCommand) -> Result<()> {
    let cron = &app.cron_manager;
    match cmd {
        CronCommand::List => {
            let jobs = cron.list_jobs().await?;
            if jobs.is_empty() {
                info!("📋 暂无定时任务");
                return Ok(());
            }
            info!("📋 定时任务 (共 {} 个):", jobs.len());
            for job in &jobs {
                show_job_line(job);
            }
            Ok(())
        }
        CronCommand::Show { job_id } => {
            let job = require_job(app, &job_id).await?;
            show_job_detail(&job);
            Ok(())
        }
        CronCommand::Enable { job_id } => {
            let job = cron.enable_job(&job_id).await?;
            info!("✅ 任务已启用: {} ({})", job.id, job.cron_expression);
            Ok(())
        }
        CronCommand::Disable { job_id } => {
            let job = cron.disable_job(&job_id).await?;
            info!("⏸️  任务已禁用: {}", job.id);
            Ok(())
        }
        CronCommand::Remove { job_id } => {
            if cron.remove_job(&job_id).await? {
                info!("🗑️  任务已删除: {}", job_id);
            } else {
                warn!("⚠️  任务不存在: {}", job_id);
            }
            Ok(())
        }
        CronCommand::Run { job_id } => {
            info!("🚀 执行任务: {}", job_id);
            let result = cron.run_job(&job_id).await?;
            for line in &result.logs {
                info!("   {}", line);
            }
            for (key, value) in &result.details {
                info!("   {} = {}", key, value);
            }
            match &result.error {
                None => info!("✅ 任务完成: {}", result.status),
                Some(e) => error!("❌ 任务失败: {}", e),
            }
            Ok(())
        }
        CronCommand::RunJob { job_id } => {
            let result = cron.run_job(&job_id).await?;
            if result.is_success() {
                info!("任务 {} 执行成功", job_id);
                Ok(())
            } else {
                Err(HarborError::scheduling(format!(
                    "任务 {} 执行失败: {}",
                    job_id,
                    result.error.unwrap_or_else(|| result.status.to_string())
                )))
            }
        }
        CronCommand::Types => {
            info!("🧩 已注册的任务类型:");
            for job_type in cron.job_types() {
                info!("   - {}", job_type);
            }
            Ok(())
        }
    }
}

async fn require_job(app: &CliApp, job_id: &str) -> Result<CronJob> {
    app.cron_manager
        .get_job(job_id)
        .await?
        .ok_or_else(|| HarborError::scheduling(format!("任务不存在: {job_id}")))
}

fn show_job_line(job: &CronJob) {
    info!(
        "   {} {} [{}] {} {}",
        if job.enabled { "🟢" } else { "⚪" },
        job.id,
        job.job_type,
        job.target_id,
        job.cron_expression
    );
}

fn show_job_detail(job: &CronJob) {
    info!("📄 任务 {}", job.id);
    info!("   类型: {}", job.job_type);
    info!("   目标: {}", job.target_id);
    info!("   表达式: {}", job.cron_expression);
    info!("   状态: {}", if job.enabled { "启用" } else { "禁用" });
    if let Some(description) = &job.description {
        info!("   描述: {}", description);
    }
    info!(
        "   创建时间: {}",
        job.created_at
            .with_timezone(&chrono::Local)
            .format("%Y-%m-%d %H:%M:%S")
    );
    match (&job.last_run, &job.last_status) {
        (Some(at), Some(status)) => info!(
            "   上次执行: {} ({})",
            at.with_timezone(&chrono::Local).format("%Y-%m-%d %H:%M:%S"),
            status
        ),
        _ => info!("   上次执行: 从未"),
    }
    for (key, value) in &job.parameters {
        info!("   参数 {} = {}", key, value);
    }
}
