//! 探索状态与结果
//!
//! ExplorationState 由单次探索独占：临时内容映射、只增不减的已保存摘录、草稿与消息日志。
//! 结束时产出 ExplorationResult。

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::graph::TopicSnapshot;
use crate::memory::MessageLog;

/// 探索模式：寻找风险还是机会
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExplorationMode {
    Risk,
    Opportunity,
}

impl ExplorationMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            ExplorationMode::Risk => "risk",
            ExplorationMode::Opportunity => "opportunity",
        }
    }

    /// 该模式下优先展示的分析章节
    pub fn focus_sections(&self) -> &'static [&'static str] {
        match self {
            ExplorationMode::Risk => &["chain_reaction_map", "structural_threats", "risk_monitor"],
            ExplorationMode::Opportunity => {
                &["tactical_scenarios", "immediate_intelligence", "trade_intelligence"]
            }
        }
    }
}

impl fmt::Display for ExplorationMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ExplorationMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "risk" => Ok(ExplorationMode::Risk),
            "opportunity" => Ok(ExplorationMode::Opportunity),
            other => Err(format!("unknown mode '{}', expected risk or opportunity", other)),
        }
    }
}

/// 证据来源类型，由 id 前缀决定
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SourceType {
    Article,
    Section,
}

impl SourceType {
    pub fn from_source_id(id: &str) -> Option<Self> {
        if id.starts_with("art_") {
            Some(SourceType::Article)
        } else if id.starts_with("sec_") {
            Some(SourceType::Section)
        } else {
            None
        }
    }
}

/// 永久保存的摘录；创建后不可变
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SavedExcerpt {
    pub excerpt: String,
    pub source_id: String,
    pub source_type: SourceType,
    pub why_relevant: String,
    /// 内容被读取时所属的话题，可能是当前话题的相邻话题
    pub saved_at_topic: String,
    pub saved_at_step: u32,
}

/// 模型可能输出的各种箭头写法
const ARROW_VARIANTS: &[&str] = &[
    "-->", "—>", "–>", "->", "=>", "➔", "➜", "➤", "▶", "►", "⟶", "⇒", "⇨", "→",
];

/// 因果链：有序跳点列表，显示为 `a → b → c`
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct FlowPath(Vec<String>);

impl FlowPath {
    pub fn from_hops<I, S>(hops: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self(
            hops.into_iter()
                .map(|h| h.into().trim().to_string())
                .filter(|h| !h.is_empty())
                .collect(),
        )
    }

    /// 按任意箭头变体切分
    pub fn parse(text: &str) -> Self {
        let mut unified = text.to_string();
        for arrow in ARROW_VARIANTS {
            unified = unified.replace(arrow, "→");
        }
        Self::from_hops(unified.split('→'))
    }

    pub fn hops(&self) -> &[String] {
        &self.0
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl fmt::Display for FlowPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0.join(" → "))
    }
}

/// 当前草稿
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DraftFinding {
    pub headline: String,
    pub rationale: String,
    pub flow_path: FlowPath,
}

/// 单次探索的完整状态
#[derive(Debug, Clone)]
pub struct ExplorationState {
    pub target_id: String,
    pub strategy_id: Option<String>,
    pub mode: ExplorationMode,
    pub current_topic: TopicSnapshot,
    /// 当前话题的执行摘要与模式相关章节预览，每次移动后刷新
    pub topic_briefing: String,
    /// 同一 (target, mode) 下已存储的标题，提示模型避免重复
    pub existing_headlines: Vec<String>,
    pub visited_topics: Vec<String>,
    pub step_count: u32,
    pub max_steps: u32,
    pub messages: MessageLog,
    /// 临时内容 id -> 读取时所属话题（相邻话题的读取记在被读话题名下）
    pub temp_content_ids: BTreeMap<String, String>,
    pub saved_excerpts: Vec<SavedExcerpt>,
    pub draft_finding: Option<DraftFinding>,
    pub critic_feedback_received: bool,
}

impl ExplorationState {
    pub fn new(target_id: impl Into<String>, mode: ExplorationMode, start: TopicSnapshot, max_steps: u32) -> Self {
        let visited = vec![start.id.clone()];
        Self {
            target_id: target_id.into(),
            strategy_id: None,
            mode,
            current_topic: start,
            topic_briefing: String::new(),
            existing_headlines: Vec::new(),
            visited_topics: visited,
            step_count: 0,
            max_steps,
            messages: MessageLog::new(),
            temp_content_ids: BTreeMap::new(),
            saved_excerpts: Vec::new(),
            draft_finding: None,
            critic_feedback_received: false,
        }
    }

    pub fn with_strategy(mut self, strategy_id: impl Into<String>) -> Self {
        self.strategy_id = Some(strategy_id.into());
        self
    }

    pub fn remaining_steps(&self) -> u32 {
        self.max_steps.saturating_sub(self.step_count)
    }

    /// 删除所有临时内容消息并清空映射，返回被清除的 id
    pub fn clear_temp_content(&mut self) -> BTreeSet<String> {
        let cleared: BTreeSet<String> = std::mem::take(&mut self.temp_content_ids).into_keys().collect();
        self.messages.prune_ids(&cleared);
        cleared
    }

    pub fn saved_source_ids(&self) -> BTreeSet<String> {
        self.saved_excerpts.iter().map(|e| e.source_id.clone()).collect()
    }

    /// 存储键所用的目标：策略探索时为 `strategy:<id>`
    pub fn findings_target(&self) -> String {
        match &self.strategy_id {
            Some(id) => format!("strategy:{}", id),
            None => self.target_id.clone(),
        }
    }
}

/// 单次探索的输出
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExplorationResult {
    pub headline: String,
    pub rationale: String,
    pub flow_path: FlowPath,
    pub evidence: Vec<SavedExcerpt>,
    pub target_id: String,
    pub strategy_id: Option<String>,
    pub mode: ExplorationMode,
    pub steps_taken: u32,
    pub success: bool,
    pub error: Option<String>,
}

impl ExplorationResult {
    /// 由当前状态构建：有草稿时使用草稿内容
    pub fn from_state(state: &ExplorationState, success: bool, error: Option<String>) -> Self {
        let (headline, rationale, flow_path) = match &state.draft_finding {
            Some(d) => (d.headline.clone(), d.rationale.clone(), d.flow_path.clone()),
            None => (
                "Exploration Incomplete".to_string(),
                format!("Completed {} steps without drafting a finding", state.step_count),
                FlowPath::default(),
            ),
        };
        Self {
            headline,
            rationale,
            flow_path,
            evidence: state.saved_excerpts.clone(),
            target_id: state.target_id.clone(),
            strategy_id: state.strategy_id.clone(),
            mode: state.mode,
            steps_taken: state.step_count,
            success,
            error,
        }
    }

    /// 未进入循环即失败（起点不存在、策略无映射话题等）
    pub fn failed(
        target_id: impl Into<String>,
        strategy_id: Option<String>,
        mode: ExplorationMode,
        error: impl Into<String>,
    ) -> Self {
        let error = error.into();
        Self {
            headline: "Exploration Not Started".to_string(),
            rationale: error.clone(),
            flow_path: FlowPath::default(),
            evidence: Vec::new(),
            target_id: target_id.into(),
            strategy_id,
            mode,
            steps_taken: 0,
            success: false,
            error: Some(error),
        }
    }
}
