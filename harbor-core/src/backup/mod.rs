//! 备份流水线、恢复与保留策略

mod lock;
mod manager;
mod pipeline;
mod record;
mod restore;
mod retention;


pub use lock::TargetLock;
pub use manager::{
    BackupManager, BackupManagerOptions, CreatedBackup, DeletionReport, RestoreReport,
    RestoredArtifact,
};
pub use pipeline::{BackupContext, BackupOutcome, BackupPipeline, FailurePolicy, PipelineStep};
pub use record::{
    BackupRecord, BackupSchedule, BackupSettings, BackupStore, CloudConfig, ScheduleType,
};
pub use restore::{ArtifactKind, classify};
pub use retention::{RetentionPolicy, RetentionReport};
