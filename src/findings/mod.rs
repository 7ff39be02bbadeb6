//! 风险 / 机会结果集
//!
//! 每个 (target, mode) 至多保存 MAX_FINDINGS 条排序结果；满额时必须指定替换的槽位，
//! 不会静默淘汰最旧条目。

pub mod normalize;
pub mod store;

use std::fmt;
use std::fmt::Write as _;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::explore::state::{ExplorationMode, FlowPath, SavedExcerpt};

pub use normalize::{normalize_confidence, normalize_headline, normalize_rationale};
pub use store::{FindingsRepository, FindingsStore, InMemoryFindings, JsonFileFindings, Versioned};

/// 每个 (target, mode) 的容量
pub const MAX_FINDINGS: usize = 3;

/// 置信度分档（可比较：Low < Medium < High）
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConfidenceBucket {
    Low,
    Medium,
    High,
}

impl ConfidenceBucket {
    pub fn as_str(&self) -> &'static str {
        match self {
            ConfidenceBucket::Low => "low",
            ConfidenceBucket::Medium => "medium",
            ConfidenceBucket::High => "high",
        }
    }

    /// 档位的代表分值（文字置信度转数值时使用）
    pub fn representative_score(&self) -> f64 {
        match self {
            ConfidenceBucket::Low => 0.2,
            ConfidenceBucket::Medium => 0.5,
            ConfidenceBucket::High => 0.8,
        }
    }
}

impl fmt::Display for ConfidenceBucket {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// 存储键
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct FindingsKey {
    pub target: String,
    pub mode: ExplorationMode,
}

impl FindingsKey {
    pub fn new(target: impl Into<String>, mode: ExplorationMode) -> Self {
        Self {
            target: target.into(),
            mode,
        }
    }

    /// 文件名安全的形式：`<target>__<mode>`；[A-Za-z0-9-] 以外的字节（含 `_`）转义为 `_xx`，
    /// 因此不同 target 不会映射到同一文件，且 `__` 只出现在分隔处
    pub fn file_stem(&self) -> String {
        let mut target = String::with_capacity(self.target.len());
        for b in self.target.bytes() {
            if b.is_ascii_alphanumeric() || b == b'-' {
                target.push(b as char);
            } else {
                let _ = write!(target, "_{:02x}", b);
            }
        }
        format!("{}__{}", target, self.mode.as_str())
    }
}

impl fmt::Display for FindingsKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.target, self.mode)
    }
}

/// 待保存的结果（id 与时间戳由存储生成）
#[derive(Debug, Clone)]
pub struct NewFinding {
    pub headline: String,
    pub rationale: String,
    pub flow_path: FlowPath,
    pub evidence: Vec<SavedExcerpt>,
    pub confidence: ConfidenceBucket,
    pub steps_taken: u32,
}

/// 已持久化的结果
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FindingRecord {
    pub id: String,
    pub headline: String,
    pub rationale: String,
    pub flow_path: FlowPath,
    pub evidence: Vec<SavedExcerpt>,
    pub confidence: ConfidenceBucket,
    pub target: String,
    pub saved_at: String,
    #[serde(default)]
    pub steps_taken: u32,
}

/// 存储错误
#[derive(Error, Debug)]
pub enum FindingsError {
    #[error("{key} already holds {MAX_FINDINGS} findings; a replacement slot is required")]
    AtCapacity { key: String },

    #[error("invalid slot {slot} for {key} (holds {len})")]
    InvalidSlot { key: String, slot: usize, len: usize },

    #[error("concurrent write to {key}: expected version {expected}, found {found}")]
    Conflict { key: String, expected: u64, found: u64 },

    #[error("findings I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("findings serialization error: {0}")]
    Serde(#[from] serde_json::Error),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_file_stem_escapes_target() {
        let key = FindingsKey::new("strategy:s/1", ExplorationMode::Opportunity);
        assert_eq!(key.file_stem(), "strategy_3as_2f1__opportunity");
    }

    #[test]
    fn test_file_stem_distinct_for_colliding_targets() {
        let a = FindingsKey::new("strategy:s1", ExplorationMode::Risk).file_stem();
        let b = FindingsKey::new("strategy_s1", ExplorationMode::Risk).file_stem();
        assert_ne!(a, b);
        assert_eq!(b, "strategy_5fs1__risk");
    }

    #[test]
    fn test_bucket_ordering() {
        assert!(ConfidenceBucket::High > ConfidenceBucket::Medium);
        assert!(ConfidenceBucket::Medium > ConfidenceBucket::Low);
    }
}
