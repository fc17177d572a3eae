use crate::storage::ArtifactMetadata;
use serde::{Deserialize, Serialize};

/// 保留策略：保留最新的 `keep` 个备份集，0 表示不限制
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RetentionPolicy {
    pub keep: u32,
}

impl RetentionPolicy {
    pub fn new(keep: u32) -> Self {
        Self { keep }
    }

    pub fn is_unlimited(&self) -> bool {
        self.keep == 0
    }

    /// 从按新到旧排序的列表中选出需要删除的备份集，按从旧到新返回
    pub fn select_expired(&self, newest_first: &[ArtifactMetadata]) -> Vec<ArtifactMetadata> {
        if self.is_unlimited() {
            return Vec::new();
        }

        newest_first
            .iter()
            .skip(self.keep as usize)
            .rev()
            .cloned()
            .collect()
    }
}

/// 一次保留策略执行的结果
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RetentionReport {
    pub target_id: String,
    pub keep: u32,
    pub kept: usize,
    /// (备份集名, 大小)
    pub removed: Vec<(String, u64)>,
}

impl RetentionReport {
    pub fn freed_bytes(&self) -> u64 {
        self.removed.iter().map(|(_, size)| size).sum()
    }
}
