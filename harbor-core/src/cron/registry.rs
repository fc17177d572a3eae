use super::models::{CronJob, JobResult, JobStatus};
use super::runner::Runner;
use futures::FutureExt;
use std::collections::BTreeMap;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use tracing::{error, info, instrument, warn};

/// 任务类型到执行器的映射，在启动时显式构建
#[derive(Clone, Default)]
pub struct JobRegistry {
    runners: BTreeMap<String, Arc<dyn Runner>>,
}

impl JobRegistry {
    pub fn new(runners: Vec<Arc<dyn Runner>>) -> Self {
        let mut registry = Self::default();
        for runner in runners {
            registry.register(runner);
        }
        registry
    }

    pub fn register(&mut self, runner: Arc<dyn Runner>) {
        let job_type = runner.job_type().to_string();
        if self.runners.insert(job_type.clone(), runner).is_some() {
            warn!("任务类型 {} 的执行器被替换", job_type);
        }
    }

    pub fn get(&self, job_type: &str) -> Option<Arc<dyn Runner>> {
        self.runners.get(job_type).cloned()
    }

    pub fn job_types(&self) -> Vec<String> {
        self.runners.keys().cloned().collect()
    }

    /// 执行任务，不会返回错误：缺少执行器、执行失败或 panic 都转换为失败结果
    #[instrument(skip_all, fields(job_id = %job.id, job_type = %job.job_type))]
    pub async fn execute_job(&self, job: &CronJob) -> JobResult {
        let Some(runner) = self.get(&job.job_type) else {
            warn!("没有任务类型 {} 的执行器", job.job_type);
            return JobResult::failure(
                &job.id,
                format!(
                    "未知的任务类型: {}（可用: {}）",
                    job.job_type,
                    self.job_types().join(", ")
                ),
            );
        };

        info!("开始执行任务");
        let outcome = AssertUnwindSafe(runner.run(job)).catch_unwind().await;

        let mut result = match outcome {
            Ok(Ok(result)) => result,
            Ok(Err(e)) => {
                error!("任务执行失败: {}", e);
                JobResult::failure(&job.id, e.to_string())
            }
            Err(panic) => {
                let message = panic
                    .downcast_ref::<&str>()
                    .map(|s| s.to_string())
                    .or_else(|| panic.downcast_ref::<String>().cloned())
                    .unwrap_or_else(|| "未知原因".to_string());
                error!("任务执行时发生 panic: {}", message);
                JobResult::failure(&job.id, format!("执行器 panic: {message}"))
            }
        };

        if result.status == JobStatus::Running {
            result.complete();
        }
        info!(status = %result.status, "任务执行结束");
        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{HarborError, Result};
    use async_trait::async_trait;

    struct EchoRunner;

    #[async_trait]
    impl Runner for EchoRunner {
        fn job_type(&self) -> &str {
            "echo"
        }

        async fn run(&self, job: &CronJob) -> Result<JobResult> {
            let mut result = JobResult::new(&job.id);
            result.add_log("echo");
            Ok(result)
        }
    }

    struct FailingRunner;

    #[async_trait]
    impl Runner for FailingRunner {
        fn job_type(&self) -> &str {
            "failing"
        }

        async fn run(&self, _job: &CronJob) -> Result<JobResult> {
            Err(HarborError::storage("磁盘已满"))
        }
    }

    struct PanickingRunner;

    #[async_trait]
    impl Runner for PanickingRunner {
        fn job_type(&self) -> &str {
            "panicking"
        }

        async fn run(&self, _job: &CronJob) -> Result<JobResult> {
            panic!("boom");
        }
    }

    fn registry() -> JobRegistry {
        JobRegistry::new(vec![
            Arc::new(EchoRunner),
            Arc::new(FailingRunner),
            Arc::new(PanickingRunner),
        ])
    }

    #[tokio::test]
    async fn test_unknown_job_type_is_failure_result() {
        let job = CronJob::new("bogus", "0 2 * * *", "example.com");
        let result = registry().execute_job(&job).await;
        assert_eq!(result.status, JobStatus::Failure);
        assert!(result.error.unwrap().contains("bogus"));
        assert!(result.end_time.is_some());
    }

    #[tokio::test]
    async fn test_running_result_is_completed() {
        let job = CronJob::new("echo", "0 2 * * *", "example.com");
        let result = registry().execute_job(&job).await;
        assert!(result.is_success());
        assert_eq!(result.logs.len(), 1);
    }

    #[tokio::test]
    async fn test_errors_and_panics_become_failures() {
        let registry = registry();

        let failed = registry
            .execute_job(&CronJob::new("failing", "0 2 * * *", "example.com"))
            .await;
        assert_eq!(failed.status, JobStatus::Failure);
        assert!(failed.error.unwrap().contains("磁盘已满"));

        let panicked = registry
            .execute_job(&CronJob::new("panicking", "0 2 * * *", "example.com"))
            .await;
        assert_eq!(panicked.status, JobStatus::Failure);
        assert!(panicked.error.unwrap().contains("boom"));
    }

    #[test]
    fn test_job_types_sorted() {
        assert_eq!(registry().job_types(), vec!["echo", "failing", "panicking"]);
    }
}
