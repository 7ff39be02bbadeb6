//! 结果存储：容量与替换规则 + 可插拔后端
//!
//! FindingsStore 负责规则（生成 id、时间戳、容量、槽位替换），后端只做带版本号的整体读写。
//! 同一进程内对同一键的 save 由按键互斥锁串行化；跨进程并发写由版本号检测为 Conflict。

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::{FindingRecord, FindingsError, FindingsKey, NewFinding, MAX_FINDINGS};

/// 带版本号的结果列表（版本号每次写入 +1，未写过为 0）
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Versioned {
    pub version: u64,
    pub findings: Vec<FindingRecord>,
}

/// 存储后端
#[async_trait]
pub trait FindingsRepository: Send + Sync {
    async fn load(&self, key: &FindingsKey) -> Result<Versioned, FindingsError>;

    /// 仅当当前版本等于 expected_version 时写入，返回新版本号
    async fn store(
        &self,
        key: &FindingsKey,
        expected_version: u64,
        findings: &[FindingRecord],
    ) -> Result<u64, FindingsError>;
}

/// 内存后端（测试与一次性运行）
#[derive(Debug, Default)]
pub struct InMemoryFindings {
    data: Mutex<HashMap<FindingsKey, Versioned>>,
}

impl InMemoryFindings {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl FindingsRepository for InMemoryFindings {
    async fn load(&self, key: &FindingsKey) -> Result<Versioned, FindingsError> {
        let data = self.data.lock().map_err(|e| poisoned(e.to_string()))?;
        Ok(data.get(key).cloned().unwrap_or_default())
    }

    async fn store(
        &self,
        key: &FindingsKey,
        expected_version: u64,
        findings: &[FindingRecord],
    ) -> Result<u64, FindingsError> {
        let mut data = self.data.lock().map_err(|e| poisoned(e.to_string()))?;
        let entry = data.entry(key.clone()).or_default();
        if entry.version != expected_version {
            return Err(FindingsError::Conflict {
                key: key.to_string(),
                expected: expected_version,
                found: entry.version,
            });
        }
        entry.version += 1;
        entry.findings = findings.to_vec();
        Ok(entry.version)
    }
}

fn poisoned(msg: String) -> FindingsError {
    FindingsError::Io(std::io::Error::new(std::io::ErrorKind::Other, msg))
}

/// JSON 文件后端：每个键一个 `<target>__<mode>.json`，内容为 `{"version": n, "findings": [...]}`
#[derive(Debug, Clone)]
pub struct JsonFileFindings {
    root: PathBuf,
}

impl JsonFileFindings {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn path_for(&self, key: &FindingsKey) -> PathBuf {
        self.root.join(format!("{}.json", key.file_stem()))
    }

    async fn read(&self, path: &Path) -> Result<Versioned, FindingsError> {
        match tokio::fs::read_to_string(path).await {
            Ok(text) if text.trim().is_empty() => Ok(Versioned::default()),
            Ok(text) => Ok(serde_json::from_str(&text)?),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(Versioned::default()),
            Err(e) => Err(e.into()),
        }
    }
}

#[async_trait]
impl FindingsRepository for JsonFileFindings {
    async fn load(&self, key: &FindingsKey) -> Result<Versioned, FindingsError> {
        self.read(&self.path_for(key)).await
    }

    async fn store(
        &self,
        key: &FindingsKey,
        expected_version: u64,
        findings: &[FindingRecord],
    ) -> Result<u64, FindingsError> {
        let path = self.path_for(key);
        let current = self.read(&path).await?;
        if current.version != expected_version {
            return Err(FindingsError::Conflict {
                key: key.to_string(),
                expected: expected_version,
                found: current.version,
            });
        }
        let next = Versioned {
            version: expected_version + 1,
            findings: findings.to_vec(),
        };
        tokio::fs::create_dir_all(&self.root).await?;
        // 先写临时文件再 rename，读者不会看到半写状态
        let tmp = path.with_extension(format!("json.{}.tmp", Uuid::new_v4().simple()));
        tokio::fs::write(&tmp, serde_json::to_vec_pretty(&next)?).await?;
        tokio::fs::rename(&tmp, &path).await?;
        Ok(next.version)
    }
}

/// 结果存储：容量 / 替换规则与按键串行化
pub struct FindingsStore {
    repo: Arc<dyn FindingsRepository>,
    locks: Mutex<HashMap<FindingsKey, Arc<tokio::sync::Mutex<()>>>>,
}

impl FindingsStore {
    pub fn new(repo: Arc<dyn FindingsRepository>) -> Self {
        Self {
            repo,
            locks: Mutex::new(HashMap::new()),
        }
    }

    pub fn in_memory() -> Self {
        Self::new(Arc::new(InMemoryFindings::new()))
    }

    fn key_lock(&self, key: &FindingsKey) -> Result<Arc<tokio::sync::Mutex<()>>, FindingsError> {
        let mut locks = self.locks.lock().map_err(|e| poisoned(e.to_string()))?;
        Ok(locks.entry(key.clone()).or_default().clone())
    }

    /// 当前结果（0..=3 条，按槽位顺序）
    pub async fn get(&self, key: &FindingsKey) -> Result<Vec<FindingRecord>, FindingsError> {
        Ok(self.repo.load(key).await?.findings)
    }

    /// 保存结果并返回新 id
    ///
    /// - `replaces = None`：未满时追加，满额返回 AtCapacity
    /// - `replaces = Some(slot)`：slot 为 1 起的已有槽位，原地替换；越界返回 InvalidSlot
    pub async fn save(
        &self,
        key: &FindingsKey,
        finding: NewFinding,
        replaces: Option<usize>,
    ) -> Result<String, FindingsError> {
        let lock = self.key_lock(key)?;
        let _guard = lock.lock().await;

        let Versioned { version, mut findings } = self.repo.load(key).await?;
        let id = unique_id(key, &findings);
        let record = FindingRecord {
            id: id.clone(),
            headline: finding.headline,
            rationale: finding.rationale,
            flow_path: finding.flow_path,
            evidence: finding.evidence,
            confidence: finding.confidence,
            target: key.target.clone(),
            saved_at: chrono::Utc::now().to_rfc3339(),
            steps_taken: finding.steps_taken,
        };

        match replaces {
            Some(slot) => {
                if slot == 0 || slot > MAX_FINDINGS || slot > findings.len() {
                    return Err(FindingsError::InvalidSlot {
                        key: key.to_string(),
                        slot,
                        len: findings.len(),
                    });
                }
                let old = std::mem::replace(&mut findings[slot - 1], record);
                tracing::info!(key = %key, slot, replaced = %old.id, new_id = %id, "finding replaced");
            }
            None => {
                if findings.len() >= MAX_FINDINGS {
                    tracing::warn!(key = %key, "findings at capacity and no replacement slot given");
                    return Err(FindingsError::AtCapacity { key: key.to_string() });
                }
                findings.push(record);
                tracing::info!(key = %key, slot = findings.len(), new_id = %id, "finding appended");
            }
        }

        self.repo.store(key, version, &findings).await?;
        Ok(id)
    }
}

/// 模式前缀 + uuid 片段，与已有 id 查重
fn unique_id(key: &FindingsKey, existing: &[FindingRecord]) -> String {
    loop {
        let uuid = Uuid::new_v4().simple().to_string();
        let candidate = format!("{}_{}", key.mode.as_str(), &uuid[..12]);
        if !existing.iter().any(|f| f.id == candidate) {
            return candidate;
        }
    }
}
