//! 保存前的规范化：置信度分档、标题、正文与因果链跳点

use std::sync::OnceLock;

use regex::Regex;

use super::ConfidenceBucket;
use crate::explore::state::FlowPath;

const MAX_HEADLINE_CHARS: usize = 100;

static WHITESPACE_RE: OnceLock<Regex> = OnceLock::new();
static CITATION_SPACING_RE: OnceLock<Regex> = OnceLock::new();
static BLANK_LINES_RE: OnceLock<Regex> = OnceLock::new();
static DIRECTION_RE: OnceLock<Regex> = OnceLock::new();

fn whitespace_re() -> &'static Regex {
    WHITESPACE_RE.get_or_init(|| Regex::new(r"\s+").unwrap())
}

/// 数值或文字置信度 -> 分档；无法识别时为 medium
pub fn normalize_confidence(value: &serde_json::Value) -> ConfidenceBucket {
    match value {
        serde_json::Value::Number(n) => n.as_f64().map(bucket_for_score).unwrap_or(ConfidenceBucket::Medium),
        serde_json::Value::String(s) => bucket_for_word(s),
        _ => ConfidenceBucket::Medium,
    }
}

pub fn bucket_for_score(score: f64) -> ConfidenceBucket {
    if score >= 0.7 {
        ConfidenceBucket::High
    } else if score >= 0.4 {
        ConfidenceBucket::Medium
    } else {
        ConfidenceBucket::Low
    }
}

fn bucket_for_word(word: &str) -> ConfidenceBucket {
    let w = word.trim().to_lowercase();
    match w.as_str() {
        "high" | "very high" | "strong" | "confident" => ConfidenceBucket::High,
        "medium" | "moderate" | "mid" => ConfidenceBucket::Medium,
        "low" | "weak" | "uncertain" => ConfidenceBucket::Low,
        other => match other.parse::<f64>() {
            Ok(score) => bucket_for_score(score),
            Err(_) => {
                tracing::warn!(value = %word, "unknown confidence value, defaulting to medium");
                ConfidenceBucket::Medium
            }
        },
    }
}

/// 去换行、折叠空白、去外层引号，超长截断并加 "..."
pub fn normalize_headline(headline: &str) -> String {
    let collapsed = whitespace_re().replace_all(headline.trim(), " ").to_string();
    let unquoted = strip_quotes(&collapsed);
    if unquoted.is_empty() {
        return "Untitled Finding".to_string();
    }
    if unquoted.chars().count() > MAX_HEADLINE_CHARS {
        let cut: String = unquoted.chars().take(MAX_HEADLINE_CHARS - 3).collect();
        format!("{}...", cut.trim_end())
    } else {
        unquoted.to_string()
    }
}

fn strip_quotes(s: &str) -> &str {
    for q in ['"', '\''] {
        if s.len() >= 2 && s.starts_with(q) && s.ends_with(q) {
            return s[1..s.len() - 1].trim();
        }
    }
    s
}

/// 收紧引用括号内空白，折叠多余空行
pub fn normalize_rationale(rationale: &str) -> String {
    let cite = CITATION_SPACING_RE.get_or_init(|| {
        Regex::new(r"\(\s+((?:art|sec)_[A-Za-z0-9_\-]+)\s*\)|\(\s*((?:art|sec)_[A-Za-z0-9_\-]+)\s+\)").unwrap()
    });
    let blank = BLANK_LINES_RE.get_or_init(|| Regex::new(r"\n{3,}").unwrap());
    let tightened = cite.replace_all(rationale, |caps: &regex::Captures| {
        let id = caps.get(1).or_else(|| caps.get(2)).map(|m| m.as_str()).unwrap_or_default();
        format!("({})", id)
    });
    blank.replace_all(&tightened, "\n\n").trim().to_string()
}

/// 跳点：下划线转空格、方向符号前留一个空格、折叠空白
pub fn normalize_flow_path(path: &FlowPath) -> FlowPath {
    let direction = DIRECTION_RE.get_or_init(|| Regex::new(r"\s*([↑↓])").unwrap());
    FlowPath::from_hops(path.hops().iter().map(|hop| {
        let spaced = hop.replace('_', " ");
        let directed = direction.replace_all(&spaced, " $1");
        whitespace_re().replace_all(directed.trim(), " ").to_string()
    }))
}
