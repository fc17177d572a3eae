use crate::backup::PipelineStep;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, HarborError>;

#[derive(Error, Debug)]
pub enum HarborError {
    #[error("配置解析错误: {0}")]
    ConfigParse(#[from] toml::de::Error),

    #[error("配置序列化错误: {0}")]
    ConfigSerialize(#[from] toml::ser::Error),

    #[error("DuckDB数据库错误: {0}")]
    DuckDb(String),

    #[error("IO 错误: {0}")]
    Io(#[from] std::io::Error),

    #[error("序列化错误: {0}")]
    Serde(#[from] serde_json::Error),

    #[error("任务执行错误: {0}")]
    Join(#[from] tokio::task::JoinError),

    #[error("目录遍历错误: {0}")]
    WalkDir(#[from] walkdir::Error),

    #[error("路径错误: {0}")]
    StripPrefix(#[from] std::path::StripPrefixError),

    #[error("存储错误: {0}")]
    Storage(String),

    #[error("传输失败: {0}")]
    Transfer(String),

    #[error("数据库操作失败: {0}")]
    DatabaseOperation(String),

    #[error("归档操作失败: {0}")]
    Archive(String),

    #[error("配置错误: {0}")]
    Configuration(String),

    #[error("调度错误: {0}")]
    Scheduling(String),

    #[error("备份步骤 [{step}] 失败: {source}")]
    Pipeline {
        step: PipelineStep,
        #[source]
        source: Box<HarborError>,
    },

    #[error("Docker 命令执行失败: {0}")]
    Docker(String),

    #[error("配置文件未找到")]
    ConfigNotFound,

    #[error("自定义错误: {0}")]
    Custom(String),
}

// 为DuckDB错误实现From trait
impl From<duckdb::Error> for HarborError {
    fn from(err: duckdb::Error) -> Self {
        HarborError::DuckDb(err.to_string())
    }
}

impl HarborError {
    pub fn custom(msg: impl Into<String>) -> Self {
        Self::Custom(msg.into())
    }

    pub fn storage(msg: impl Into<String>) -> Self {
        Self::Storage(msg.into())
    }

    pub fn transfer(msg: impl Into<String>) -> Self {
        Self::Transfer(msg.into())
    }

    pub fn database_operation(msg: impl Into<String>) -> Self {
        Self::DatabaseOperation(msg.into())
    }

    pub fn archive(msg: impl Into<String>) -> Self {
        Self::Archive(msg.into())
    }

    pub fn configuration(msg: impl Into<String>) -> Self {
        Self::Configuration(msg.into())
    }

    pub fn scheduling(msg: impl Into<String>) -> Self {
        Self::Scheduling(msg.into())
    }

    pub fn docker(msg: impl Into<String>) -> Self {
        Self::Docker(msg.into())
    }

    /// 流水线失败时返回出错的步骤
    pub fn failed_step(&self) -> Option<PipelineStep> {
        match self {
            HarborError::Pipeline { step, .. } => Some(*step),
            _ => None,
        }
    }
}
