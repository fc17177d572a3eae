use crate::constants::cron::{CRON_FIELDS_COUNT, JOB_ID_PREFIX, LOG_TIME_FORMAT};
use crate::{HarborError, Result};
use chrono::{DateTime, Local, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

/// 任务执行状态
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum JobStatus {
    Running,
    Success,
    Failure,
}

impl JobStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobStatus::Running => "running",
            JobStatus::Success => "success",
            JobStatus::Failure => "failure",
        }
    }
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for JobStatus {
    type Err = HarborError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "running" => Ok(JobStatus::Running),
            "success" => Ok(JobStatus::Success),
            "failure" => Ok(JobStatus::Failure),
            other => Err(HarborError::custom(format!("未知的任务状态: {other}"))),
        }
    }
}

/// 持久化的定时任务定义
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CronJob {
    /// 创建后不再改变
    pub id: String,
    pub job_type: String,
    pub cron_expression: String,
    pub target_id: String,
    #[serde(default)]
    pub parameters: BTreeMap<String, Value>,
    pub enabled: bool,
    pub created_at: DateTime<Utc>,
    pub last_run: Option<DateTime<Utc>>,
    pub last_status: Option<JobStatus>,
    pub description: Option<String>,
}

impl CronJob {
    pub fn new(
        job_type: impl Into<String>,
        cron_expression: impl Into<String>,
        target_id: impl Into<String>,
    ) -> Self {
        Self {
            id: generate_job_id(),
            job_type: job_type.into(),
            cron_expression: cron_expression.into(),
            target_id: target_id.into(),
            parameters: BTreeMap::new(),
            enabled: true,
            created_at: Utc::now(),
            last_run: None,
            last_status: None,
            description: None,
        }
    }

    pub fn with_parameter(mut self, key: &str, value: impl Into<Value>) -> Self {
        self.parameters.insert(key.to_string(), value.into());
        self
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    pub fn param_str(&self, key: &str) -> Option<&str> {
        self.parameters.get(key).and_then(Value::as_str)
    }

    pub fn param_u32(&self, key: &str) -> Option<u32> {
        self.parameters
            .get(key)
            .and_then(Value::as_u64)
            .and_then(|v| u32::try_from(v).ok())
    }

    pub fn param_bool(&self, key: &str) -> Option<bool> {
        self.parameters.get(key).and_then(Value::as_bool)
    }
}

/// 生成 `job_<32位十六进制>` 形式的任务ID，使用完整的 UUID v4
pub fn generate_job_id() -> String {
    format!("{JOB_ID_PREFIX}{}", uuid::Uuid::new_v4().simple())
}

/// 校验五段式 cron 表达式
pub fn validate_cron_expression(expr: &str) -> Result<()> {
    if expr.contains('\n') || expr.contains('\r') {
        return Err(HarborError::scheduling("cron 表达式不能包含换行"));
    }

    let fields: Vec<&str> = expr.split_whitespace().collect();
    if fields.len() != CRON_FIELDS_COUNT {
        return Err(HarborError::scheduling(format!(
            "cron 表达式必须为 {CRON_FIELDS_COUNT} 段: {expr}"
        )));
    }

    let allowed = |c: char| c.is_ascii_alphanumeric() || matches!(c, '*' | ',' | '-' | '/');
    if let Some(field) = fields.iter().find(|f| !f.chars().all(allowed)) {
        return Err(HarborError::scheduling(format!(
            "cron 表达式包含非法字段: {field}"
        )));
    }

    Ok(())
}

/// 单次任务执行结果
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobResult {
    pub job_id: String,
    pub status: JobStatus,
    pub start_time: DateTime<Utc>,
    pub end_time: Option<DateTime<Utc>>,
    pub logs: Vec<String>,
    pub error: Option<String>,
    pub details: BTreeMap<String, Value>,
}

impl JobResult {
    /// 以运行中状态开始一次执行
    pub fn new(job_id: impl Into<String>) -> Self {
        Self {
            job_id: job_id.into(),
            status: JobStatus::Running,
            start_time: Utc::now(),
            end_time: None,
            logs: Vec::new(),
            error: None,
            details: BTreeMap::new(),
        }
    }

    /// 直接构造失败结果
    pub fn failure(job_id: impl Into<String>, error: impl Into<String>) -> Self {
        let mut result = Self::new(job_id);
        result.fail(error);
        result
    }

    /// 追加带时间戳的日志
    pub fn add_log(&mut self, message: impl AsRef<str>) {
        self.logs.push(format!(
            "[{}] {}",
            Local::now().format(LOG_TIME_FORMAT),
            message.as_ref()
        ));
    }

    pub fn add_detail(&mut self, key: &str, value: impl Into<Value>) {
        self.details.insert(key.to_string(), value.into());
    }

    pub fn complete(&mut self) {
        self.status = JobStatus::Success;
        self.finish();
    }

    pub fn fail(&mut self, error: impl Into<String>) {
        let error = error.into();
        self.add_log(format!("失败: {error}"));
        self.error = Some(error);
        self.status = JobStatus::Failure;
        self.finish();
    }

    pub fn is_success(&self) -> bool {
        self.status == JobStatus::Success
    }

    fn finish(&mut self) {
        self.end_time = Some(Utc::now().max(self.start_time));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_job_id_format() {
        let id = generate_job_id();
        assert!(id.starts_with("job_"));
        assert_eq!(id.len(), 4 + 32);
        assert!(id[4..].chars().all(|c| c.is_ascii_hexdigit()));

        let ids: std::collections::HashSet<String> = (0..1000).map(|_| generate_job_id()).collect();
        assert_eq!(ids.len(), 1000);
    }

    #[test]
    fn test_validate_cron_expression() {
        assert!(validate_cron_expression("30 2 * * 0").is_ok());
        assert!(validate_cron_expression("*/15 0-6 1,15 * MON").is_ok());
        assert!(validate_cron_expression("30 2 * *").is_err());
        assert!(validate_cron_expression("30 2 * * 0\n* * * * *").is_err());
        assert!(validate_cron_expression("30 2 * * 0;rm").is_err());
    }

    #[test]
    fn test_job_parameters() {
        let job = CronJob::new("backup", "0 2 * * *", "example.com")
            .with_parameter("provider", "local")
            .with_parameter("retention_count", 5)
            .with_parameter("cloud_sync", false);

        assert_eq!(job.param_str("provider"), Some("local"));
        assert_eq!(job.param_u32("retention_count"), Some(5));
        assert_eq!(job.param_bool("cloud_sync"), Some(false));
        assert_eq!(job.param_str("missing"), None);
        assert!(job.enabled);
    }

    #[test]
    fn test_job_result_lifecycle() {
        let mut result = JobResult::new("job_12345678");
        assert_eq!(result.status, JobStatus::Running);
        assert!(result.end_time.is_none());

        result.add_log("开始");
        result.complete();
        assert!(result.is_success());
        assert!(result.end_time.unwrap() >= result.start_time);

        let failed = JobResult::failure("job_12345678", "boom");
        assert_eq!(failed.status, JobStatus::Failure);
        assert_eq!(failed.error.as_deref(), Some("boom"));
        assert!(failed.end_time.unwrap() >= failed.start_time);
    }

    #[test]
    fn test_job_status_round_trip() {
        for status in [JobStatus::Running, JobStatus::Success, JobStatus::Failure] {
            assert_eq!(status.as_str().parse::<JobStatus>().unwrap(), status);
        }
        assert!("bogus".parse::<JobStatus>().is_err());
    }
}
