//! 推理引擎输出协议：工具表与 Tool Call 解析
//!
//! 期望格式 `{"thinking": "...", "tool_call": {"tool": "read_section", ...}}`。
//! parse_tool_call 依次尝试：去代码块 -> 整体解析 -> 括号配对提取最大对象 -> 正则兜底匹配工具名。
//! 缺少 tool_call 包装但顶层带 tool 字段时自动包装。

use std::sync::OnceLock;

use regex::Regex;
use serde::Deserialize;
use thiserror::Error;

use crate::explore::state::FlowPath;

/// 工具种类
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ToolKind {
    ReadSection,
    ReadArticles,
    SaveExcerpt,
    Think,
    MoveToTopic,
    DraftFinding,
    Finish,
    SuggestLink,
}

/// 工具名 -> 种类（顺序即提示词中的展示顺序）
pub const TOOL_TABLE: &[(&str, ToolKind)] = &[
    ("read_section", ToolKind::ReadSection),
    ("read_articles", ToolKind::ReadArticles),
    ("save_excerpt", ToolKind::SaveExcerpt),
    ("think", ToolKind::Think),
    ("move_to_topic", ToolKind::MoveToTopic),
    ("draft_finding", ToolKind::DraftFinding),
    ("finish", ToolKind::Finish),
    ("suggest_link", ToolKind::SuggestLink),
];

impl ToolKind {
    pub fn from_name(name: &str) -> Option<Self> {
        TOOL_TABLE
            .iter()
            .find(|(n, _)| *n == name)
            .map(|(_, kind)| *kind)
    }

    pub fn name(&self) -> &'static str {
        TOOL_TABLE
            .iter()
            .find(|(_, kind)| kind == self)
            .map(|(n, _)| *n)
            .unwrap_or("unknown")
    }
}

/// 所有合法工具名，逗号分隔
pub fn tool_names() -> String {
    TOOL_TABLE.iter().map(|(n, _)| *n).collect::<Vec<_>>().join(", ")
}

/// save_excerpt 中的单条保存请求
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct ExcerptSave {
    pub source_id: String,
    #[serde(default)]
    pub excerpt: String,
    #[serde(default)]
    pub why_relevant: String,
}

/// 解析后的工具调用
#[derive(Debug, Clone, PartialEq)]
pub enum ToolCall {
    ReadSection {
        topic_id: Option<String>,
        section: String,
    },
    ReadArticles {
        topic_id: Option<String>,
        limit: Option<usize>,
    },
    SaveExcerpt {
        saves: Vec<ExcerptSave>,
    },
    Think {
        thought: String,
    },
    MoveToTopic {
        topic_id: String,
        reason: String,
    },
    DraftFinding {
        headline: String,
        rationale: String,
        flow_path: FlowPath,
    },
    Finish,
    SuggestLink {
        source_topic: String,
        target_topic: String,
        relationship_type: String,
        reason: String,
    },
    /// 工具名不在工具表中
    Unknown { name: String },
    /// 工具名合法但参数缺失或类型不符
    Invalid { kind: ToolKind, error: String },
}

impl ToolCall {
    pub fn name(&self) -> &str {
        match self {
            ToolCall::Unknown { name } => name,
            ToolCall::Invalid { kind, .. } => kind.name(),
            other => other.kind().map(|k| k.name()).unwrap_or("unknown"),
        }
    }

    pub fn kind(&self) -> Option<ToolKind> {
        Some(match self {
            ToolCall::ReadSection { .. } => ToolKind::ReadSection,
            ToolCall::ReadArticles { .. } => ToolKind::ReadArticles,
            ToolCall::SaveExcerpt { .. } => ToolKind::SaveExcerpt,
            ToolCall::Think { .. } => ToolKind::Think,
            ToolCall::MoveToTopic { .. } => ToolKind::MoveToTopic,
            ToolCall::DraftFinding { .. } => ToolKind::DraftFinding,
            ToolCall::Finish => ToolKind::Finish,
            ToolCall::SuggestLink { .. } => ToolKind::SuggestLink,
            ToolCall::Invalid { kind, .. } => *kind,
            ToolCall::Unknown { .. } => return None,
        })
    }

    /// 除 save_excerpt 外的任何工具调用（含未知、非法）执行前都清空临时内容
    pub fn clears_temp_content(&self) -> bool {
        self.kind() != Some(ToolKind::SaveExcerpt)
    }

    /// 从 `{"tool": "...", ...}` 对象构建；未知工具与参数错误不会失败，而是落到 Unknown / Invalid
    pub fn from_object(obj: &serde_json::Value) -> Option<Self> {
        let name = obj.get("tool")?.as_str()?.trim();
        let Some(kind) = ToolKind::from_name(name) else {
            return Some(ToolCall::Unknown {
                name: name.to_string(),
            });
        };
        Some(match build_call(kind, obj) {
            Ok(call) => call,
            Err(e) => ToolCall::Invalid {
                kind,
                error: e.to_string(),
            },
        })
    }
}

#[derive(Deserialize)]
struct ReadSectionArgs {
    #[serde(default)]
    topic_id: Option<String>,
    section: String,
}

#[derive(Deserialize)]
struct ReadArticlesArgs {
    #[serde(default)]
    topic_id: Option<String>,
    #[serde(default)]
    limit: Option<serde_json::Value>,
}

#[derive(Deserialize)]
struct SaveExcerptArgs {
    #[serde(default)]
    saves: Vec<ExcerptSave>,
}

#[derive(Deserialize)]
struct ThinkArgs {
    #[serde(default)]
    thought: String,
}

#[derive(Deserialize)]
struct MoveArgs {
    topic_id: String,
    #[serde(default)]
    reason: String,
}

/// flow_path 可以是箭头字符串或跳点数组
#[derive(Deserialize)]
#[serde(untagged)]
enum FlowPathArg {
    Text(String),
    Hops(Vec<String>),
}

#[derive(Deserialize)]
struct DraftArgs {
    headline: String,
    rationale: String,
    #[serde(default)]
    flow_path: Option<FlowPathArg>,
}

#[derive(Deserialize)]
struct SuggestLinkArgs {
    #[serde(default)]
    source_topic: String,
    #[serde(default)]
    target_topic: String,
    #[serde(default)]
    relationship_type: String,
    #[serde(default)]
    reason: String,
}

fn build_call(kind: ToolKind, obj: &serde_json::Value) -> Result<ToolCall, serde_json::Error> {
    let obj = obj.clone();
    Ok(match kind {
        ToolKind::ReadSection => {
            let a: ReadSectionArgs = serde_json::from_value(obj)?;
            ToolCall::ReadSection {
                topic_id: non_empty(a.topic_id),
                section: a.section.trim().to_string(),
            }
        }
        ToolKind::ReadArticles => {
            let a: ReadArticlesArgs = serde_json::from_value(obj)?;
            ToolCall::ReadArticles {
                topic_id: non_empty(a.topic_id),
                limit: a.limit.as_ref().and_then(coerce_limit),
            }
        }
        ToolKind::SaveExcerpt => {
            let a: SaveExcerptArgs = serde_json::from_value(obj)?;
            ToolCall::SaveExcerpt { saves: a.saves }
        }
        ToolKind::Think => {
            let a: ThinkArgs = serde_json::from_value(obj)?;
            ToolCall::Think { thought: a.thought }
        }
        ToolKind::MoveToTopic => {
            let a: MoveArgs = serde_json::from_value(obj)?;
            ToolCall::MoveToTopic {
                topic_id: a.topic_id.trim().to_string(),
                reason: a.reason,
            }
        }
        ToolKind::DraftFinding => {
            let a: DraftArgs = serde_json::from_value(obj)?;
            let flow_path = match a.flow_path {
                Some(FlowPathArg::Text(s)) => FlowPath::parse(&s),
                Some(FlowPathArg::Hops(h)) => FlowPath::from_hops(h),
                None => FlowPath::default(),
            };
            ToolCall::DraftFinding {
                headline: a.headline,
                rationale: a.rationale,
                flow_path,
            }
        }
        ToolKind::Finish => ToolCall::Finish,
        ToolKind::SuggestLink => {
            let a: SuggestLinkArgs = serde_json::from_value(obj)?;
            ToolCall::SuggestLink {
                source_topic: a.source_topic,
                target_topic: a.target_topic,
                relationship_type: a.relationship_type,
                reason: a.reason,
            }
        }
    })
}

fn non_empty(s: Option<String>) -> Option<String> {
    s.map(|s| s.trim().to_string()).filter(|s| !s.is_empty())
}

fn coerce_limit(v: &serde_json::Value) -> Option<usize> {
    match v {
        serde_json::Value::Number(n) => n.as_u64().map(|n| n as usize),
        serde_json::Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

/// 一次推理引擎回复的解析结果
#[derive(Debug, Clone, PartialEq)]
pub struct AgentResponse {
    pub thinking: String,
    pub tool_call: ToolCall,
    /// 是否经由正则兜底得到（参数丢失）
    pub recovered: bool,
}

#[derive(Error, Debug, Clone, PartialEq)]
pub enum ParseError {
    #[error("empty response")]
    Empty,

    #[error("no tool call found in response: {0}")]
    NoToolCall(String),
}

static TOOL_NAME_RE: OnceLock<Regex> = OnceLock::new();

/// 解析推理引擎回复
pub fn parse_tool_call(text: &str) -> Result<AgentResponse, ParseError> {
    let cleaned = strip_code_fences(text);
    if cleaned.is_empty() {
        return Err(ParseError::Empty);
    }

    if let Ok(value) = serde_json::from_str::<serde_json::Value>(&cleaned) {
        if let Some(resp) = interpret(&value) {
            return Ok(resp);
        }
    }

    let mut candidates: Vec<serde_json::Value> = balanced_objects(&cleaned)
        .into_iter()
        .filter_map(|s| serde_json::from_str(s).ok())
        .collect();
    candidates.sort_by_key(|v: &serde_json::Value| std::cmp::Reverse(v.to_string().len()));
    if let Some(resp) = candidates.iter().find_map(interpret) {
        return Ok(resp);
    }

    let re = TOOL_NAME_RE.get_or_init(|| {
        let names: Vec<&str> = TOOL_TABLE.iter().map(|(n, _)| *n).collect();
        Regex::new(&format!(r#""tool"\s*:\s*"({})""#, names.join("|"))).unwrap()
    });
    if let Some(name) = re.captures(&cleaned).and_then(|c| c.get(1)) {
        let obj = serde_json::json!({ "tool": name.as_str() });
        if let Some(tool_call) = ToolCall::from_object(&obj) {
            tracing::warn!(tool = name.as_str(), "tool call recovered by name only");
            return Ok(AgentResponse {
                thinking: String::new(),
                tool_call,
                recovered: true,
            });
        }
    }

    Err(ParseError::NoToolCall(cleaned.chars().take(200).collect()))
}

/// 解析出的对象若含 tool_call.tool 或顶层 tool 则视为有效
fn interpret(value: &serde_json::Value) -> Option<AgentResponse> {
    let obj = value.as_object()?;
    let thinking = obj
        .get("thinking")
        .and_then(|t| t.as_str())
        .unwrap_or_default()
        .to_string();
    let call_obj = match obj.get("tool_call") {
        Some(inner) if inner.get("tool").is_some() => inner,
        _ if obj.contains_key("tool") => value,
        _ => return None,
    };
    let tool_call = ToolCall::from_object(call_obj)?;
    Some(AgentResponse {
        thinking,
        tool_call,
        recovered: false,
    })
}

/// 去掉 ```json ... ``` 包裹
pub fn strip_code_fences(text: &str) -> String {
    let trimmed = text.trim();
    let Some(start) = trimmed.find("```") else {
        return trimmed.to_string();
    };
    let after = &trimmed[start + 3..];
    let after = after
        .strip_prefix("json")
        .or_else(|| after.strip_prefix("JSON"))
        .unwrap_or(after);
    match after.find("```") {
        Some(end) => after[..end].trim().to_string(),
        None => after.trim().to_string(),
    }
}

/// 顶层平衡的 `{...}` 片段（跳过字符串内的括号）
pub fn balanced_objects(text: &str) -> Vec<&str> {
    let mut out = Vec::new();
    let mut depth = 0usize;
    let mut start = None;
    let mut in_string = false;
    let mut escaped = false;
    for (i, c) in text.char_indices() {
        if in_string {
            match c {
                _ if escaped => escaped = false,
                '\\' => escaped = true,
                '"' => in_string = false,
                _ => {}
            }
            continue;
        }
        match c {
            '"' if depth > 0 => in_string = true,
            '{' => {
                if depth == 0 {
                    start = Some(i);
                }
                depth += 1;
            }
            '}' if depth > 0 => {
                depth -= 1;
                if depth == 0 {
                    if let Some(s) = start.take() {
                        out.push(&text[s..=i]);
                    }
                }
            }
            _ => {}
        }
    }
    out
}

/// 回复中最大的可解析 JSON 对象（供 Critic 解析复用）
pub fn largest_json_object(text: &str) -> Option<serde_json::Value> {
    let cleaned = strip_code_fences(text);
    if let Ok(v @ serde_json::Value::Object(_)) = serde_json::from_str(&cleaned) {
        return Some(v);
    }
    balanced_objects(&cleaned)
        .into_iter()
        .filter_map(|s| serde_json::from_str::<serde_json::Value>(s).ok())
        .filter(|v| v.is_object())
        .max_by_key(|v| v.to_string().len())
}
