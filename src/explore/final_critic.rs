//! FinalCritic：结果入库前的终审
//!
//! 依次审查引用完整性、引用准确性、因果链、新颖性与排名。推理引擎调用前后各有一层确定性守卫：
//! - 调用前：因果链至少两跳、正文引用全部在证据中、标题与已有结果不重复（Jaccard ≥ 0.8 视为重复）
//! - 调用后：置信度截断到 [0,1]；满额时按证据强度与最弱槽位比较，replaces 一律指向最弱槽位
//!
//! 任何内部失败都以 accepted = false 收尾，并给出非空理由。

use std::collections::{BTreeMap, BTreeSet};
use std::fmt::Write as _;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::explore::citations;
use crate::explore::context::truncate_chars;
use crate::explore::prompts::fill_template;
use crate::explore::protocol::largest_json_object;
use crate::explore::state::{ExplorationMode, ExplorationResult, SavedExcerpt};
use crate::findings::normalize::{bucket_for_score, normalize_confidence};
use crate::findings::{ConfidenceBucket, FindingRecord, MAX_FINDINGS};
use crate::llm::LlmClient;
use crate::memory::Message;

const ARTICLE_TEXT_CHARS: usize = 2000;
const ANALYSIS_TEXT_CHARS: usize = 1500;
const DUPLICATE_HEADLINE_JACCARD: f64 = 0.8;

/// 终审结论
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FinalVerdict {
    pub accepted: bool,
    pub confidence: f64,
    pub reasoning: String,
    /// 替换的槽位（1 起）
    pub replaces: Option<usize>,
    pub rejection_reasons: Vec<String>,
}

impl FinalVerdict {
    pub fn reject(reasoning: impl Into<String>, reasons: Vec<String>) -> Self {
        let reasoning = reasoning.into();
        let reasons = if reasons.is_empty() {
            vec![reasoning.clone()]
        } else {
            reasons
        };
        Self {
            accepted: false,
            confidence: 0.0,
            reasoning,
            replaces: None,
            rejection_reasons: reasons,
        }
    }
}

/// 证据强度：置信度档位 > 不同来源数 > 摘录数（按字段顺序比较）
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct EvidenceStrength {
    pub bucket: ConfidenceBucket,
    pub distinct_sources: usize,
    pub excerpts: usize,
}

impl EvidenceStrength {
    pub fn of(bucket: ConfidenceBucket, evidence: &[SavedExcerpt]) -> Self {
        let distinct: BTreeSet<&str> = evidence.iter().map(|e| e.source_id.as_str()).collect();
        Self {
            bucket,
            distinct_sources: distinct.len(),
            excerpts: evidence.len(),
        }
    }

    pub fn of_record(record: &FindingRecord) -> Self {
        Self::of(record.confidence, &record.evidence)
    }
}

/// 最弱槽位（1 起）；并列时取排名靠后的
pub fn weakest_slot(existing: &[FindingRecord]) -> Option<(usize, EvidenceStrength)> {
    existing
        .iter()
        .enumerate()
        .map(|(i, r)| (i + 1, EvidenceStrength::of_record(r)))
        .fold(None, |weakest, (slot, strength)| match weakest {
            Some((_, w)) if strength > w => weakest,
            _ => Some((slot, strength)),
        })
}

/// 标题词集合的 Jaccard 相似度
pub fn headline_similarity(a: &str, b: &str) -> f64 {
    let tokens = |s: &str| -> BTreeSet<String> {
        s.split(|c: char| !c.is_alphanumeric())
            .filter(|t| !t.is_empty())
            .map(|t| t.to_lowercase())
            .collect()
    };
    let (ta, tb) = (tokens(a), tokens(b));
    if ta.is_empty() && tb.is_empty() {
        return 1.0;
    }
    let inter = ta.intersection(&tb).count() as f64;
    let union = ta.union(&tb).count() as f64;
    inter / union
}

/// 终审输入
pub struct CriticInput<'a> {
    pub result: &'a ExplorationResult,
    /// source_id -> 原文（文章正文或章节全文）
    pub source_texts: &'a BTreeMap<String, String>,
    /// topic_id -> (section -> 文本)
    pub topic_analyses: &'a BTreeMap<String, BTreeMap<String, String>>,
    pub existing: &'a [FindingRecord],
    pub mode: ExplorationMode,
}

#[derive(Deserialize, Default)]
#[serde(default)]
struct RawVerdict {
    accepted: Option<serde_json::Value>,
    confidence: Option<serde_json::Value>,
    reasoning: Option<String>,
    replaces: Option<serde_json::Value>,
    rejection_reasons: Option<serde_json::Value>,
}

/// 解析终审回复：`{"thinking": ..., "verdict": {...}}` 或扁平对象
pub fn parse_verdict(text: &str) -> Option<FinalVerdict> {
    let value = largest_json_object(&text.replace("**", ""))?;
    let inner = match value.get("verdict") {
        Some(v) if v.is_object() => v.clone(),
        _ => value,
    };
    let raw: RawVerdict = serde_json::from_value(inner).ok()?;
    let accepted = match raw.accepted? {
        serde_json::Value::Bool(b) => b,
        serde_json::Value::String(s) => matches!(s.trim().to_lowercase().as_str(), "true" | "yes" | "accept" | "accepted"),
        _ => return None,
    };
    let confidence = match raw.confidence {
        Some(serde_json::Value::Number(n)) => n.as_f64().unwrap_or(0.0),
        Some(v @ serde_json::Value::String(_)) => normalize_confidence(&v).representative_score(),
        _ => 0.0,
    };
    let replaces = match raw.replaces {
        Some(serde_json::Value::Number(n)) => n.as_u64().map(|n| n as usize),
        Some(serde_json::Value::String(s)) => s.trim().parse().ok(),
        _ => None,
    };
    let rejection_reasons = match raw.rejection_reasons {
        Some(serde_json::Value::Array(items)) => items
            .into_iter()
            .map(|v| match v {
                serde_json::Value::String(s) => s,
                other => other.to_string(),
            })
            .filter(|s| !s.trim().is_empty())
            .collect(),
        Some(serde_json::Value::String(s)) if !s.trim().is_empty() => vec![s],
        _ => Vec::new(),
    };
    Some(FinalVerdict {
        accepted,
        confidence,
        reasoning: raw.reasoning.unwrap_or_default(),
        replaces,
        rejection_reasons,
    })
}

/// FinalCritic：持有 LLM（complex 档）与 prompt 模板
pub struct FinalCritic {
    llm: Arc<dyn LlmClient>,
    prompt_template: String,
}

impl FinalCritic {
    pub fn new(llm: Arc<dyn LlmClient>, prompt_template: impl Into<String>) -> Self {
        Self {
            llm,
            prompt_template: prompt_template.into(),
        }
    }

    pub async fn evaluate(&self, input: &CriticInput<'_>) -> FinalVerdict {
        if let Some(rejection) = pre_check(input) {
            tracing::info!(reasons = ?rejection.rejection_reasons, "final critic pre-check rejected");
            return rejection;
        }

        let context = build_context(input);
        let prompt = fill_template(
            &self.prompt_template,
            &[
                ("mode", input.mode.as_str()),
                ("target", input.result.target_id.as_str()),
                ("context", context.as_str()),
            ],
        );

        let response = match self.llm.complete(&[Message::user(prompt)]).await {
            Ok(r) => r,
            Err(e) => {
                tracing::warn!(error = %e, "final critic call failed");
                return FinalVerdict::reject(format!("Internal error: {}", e), vec![]);
            }
        };
        let Some(verdict) = parse_verdict(&response) else {
            tracing::warn!("final critic response not parseable");
            return FinalVerdict::reject("Internal error: could not parse critic verdict", vec![]);
        };
        let verdict = post_check(verdict, input);
        tracing::info!(
            accepted = verdict.accepted,
            confidence = verdict.confidence,
            replaces = ?verdict.replaces,
            "final critic verdict"
        );
        verdict
    }
}

/// 调用前守卫：不满足即直接拒绝
fn pre_check(input: &CriticInput<'_>) -> Option<FinalVerdict> {
    let result = input.result;
    let mut reasons = Vec::new();
    if result.flow_path.len() < 2 {
        reasons.push(format!(
            "Flow path has {} hop(s); a causal chain needs at least 2",
            result.flow_path.len()
        ));
    }
    let missing = citations::check(&result.rationale, &result.evidence);
    if !missing.is_empty() {
        let ids: Vec<&str> = missing.iter().map(String::as_str).collect();
        reasons.push(format!("Rationale cites sources missing from evidence: {}", ids.join(", ")));
    }
    if let Some(dup) = input
        .existing
        .iter()
        .find(|r| headline_similarity(&r.headline, &result.headline) >= DUPLICATE_HEADLINE_JACCARD)
    {
        reasons.push(format!("Duplicates existing finding '{}'", dup.headline));
    }
    if reasons.is_empty() {
        None
    } else {
        Some(FinalVerdict::reject("Finding failed deterministic checks", reasons))
    }
}

/// 调用后守卫：规范置信度、理由与 replaces
fn post_check(mut verdict: FinalVerdict, input: &CriticInput<'_>) -> FinalVerdict {
    verdict.confidence = verdict.confidence.clamp(0.0, 1.0);
    if !verdict.accepted {
        if verdict.rejection_reasons.is_empty() {
            let reason = if verdict.reasoning.is_empty() {
                "Rejected by final critic".to_string()
            } else {
                verdict.reasoning.clone()
            };
            verdict.rejection_reasons.push(reason);
        }
        verdict.replaces = None;
        return verdict;
    }
    verdict.rejection_reasons.clear();

    let existing = input.existing;
    if existing.len() < MAX_FINDINGS {
        verdict.replaces = None;
        return verdict;
    }

    // 满额时只能替换最弱槽位，且候选必须严格更强
    let candidate = EvidenceStrength::of(bucket_for_score(verdict.confidence), &input.result.evidence);
    match weakest_slot(existing) {
        Some((slot, weakest)) if candidate > weakest => {
            if verdict.replaces.is_some_and(|r| r != slot) {
                tracing::info!(requested = ?verdict.replaces, weakest = slot, "replaces redirected to weakest slot");
            }
            verdict.replaces = Some(slot);
            verdict
        }
        Some((slot, _)) => FinalVerdict::reject(
            verdict.reasoning,
            vec![format!(
                "At capacity ({} findings) and not stronger than the weakest existing finding (#{})",
                MAX_FINDINGS, slot
            )],
        ),
        None => verdict,
    }
}

/// 终审上下文：待审结果、证据、文章原文、话题分析、已有结果
fn build_context(input: &CriticInput<'_>) -> String {
    let r = input.result;
    let mut out = String::new();
    let _ = writeln!(
        out,
        "## Finding under review\nHeadline: {}\nFlow path: {}\nRationale:\n{}\n",
        r.headline, r.flow_path, r.rationale
    );

    let _ = writeln!(out, "## Evidence ({} excerpts)", r.evidence.len());
    for e in &r.evidence {
        let _ = writeln!(out, "- [{}] \"{}\" (why: {})", e.source_id, e.excerpt, e.why_relevant);
    }

    let _ = writeln!(out, "\n## Source texts");
    for (id, text) in input.source_texts {
        let _ = writeln!(out, "### {}\n{}\n", id, truncate_chars(text, ARTICLE_TEXT_CHARS, "..."));
    }

    let _ = writeln!(out, "## Topic analyses");
    for (topic, sections) in input.topic_analyses {
        for (section, text) in sections {
            let _ = writeln!(
                out,
                "### {} / {}\n{}\n",
                topic,
                section,
                truncate_chars(text, ANALYSIS_TEXT_CHARS, "...")
            );
        }
    }

    let _ = writeln!(out, "## Existing {} findings ({}/{})", input.mode, input.existing.len(), MAX_FINDINGS);
    if input.existing.is_empty() {
        let _ = writeln!(out, "(none)");
    }
    for (i, f) in input.existing.iter().enumerate() {
        let strength = EvidenceStrength::of_record(f);
        let _ = writeln!(
            out,
            "#{} [{} confidence, {} sources] {}\n   {}",
            i + 1,
            f.confidence,
            strength.distinct_sources,
            f.headline,
            f.flow_path
        );
    }
    out
}
