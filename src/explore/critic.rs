//! MidCritic：首个草稿的一次性建议审阅
//!
//! 只在一次探索的第一个通过引用校验的草稿上运行，输出作为永久指令消息注入，从不修改草稿。
//! 推理引擎或解析失败时给出 score 0 / continue_exploring 的反馈，不中断探索。

use std::fmt::Write as _;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::explore::prompts::fill_template;
use crate::explore::protocol::largest_json_object;
use crate::explore::state::{DraftFinding, SavedExcerpt};
use crate::llm::LlmClient;
use crate::memory::Message;

/// 审阅结论
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CriticVerdict {
    ContinueExploring,
    ReviseDraft,
    ReadyToFinish,
}

impl CriticVerdict {
    fn parse(s: &str) -> Self {
        match s.trim().to_lowercase().replace([' ', '-'], "_").as_str() {
            "revise_draft" | "revise" => CriticVerdict::ReviseDraft,
            "ready_to_finish" | "ready" | "finish" => CriticVerdict::ReadyToFinish,
            _ => CriticVerdict::ContinueExploring,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            CriticVerdict::ContinueExploring => "continue_exploring",
            CriticVerdict::ReviseDraft => "revise_draft",
            CriticVerdict::ReadyToFinish => "ready_to_finish",
        }
    }
}

/// 审阅反馈
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CriticFeedback {
    pub quality_score: f64,
    pub citation_issues: Vec<String>,
    pub chain_gaps: Vec<String>,
    pub suggestions: Vec<String>,
    pub verdict: CriticVerdict,
    pub reasoning: String,
}

impl CriticFeedback {
    /// 内部失败时的反馈
    pub fn internal_error(error: impl std::fmt::Display) -> Self {
        Self {
            quality_score: 0.0,
            citation_issues: Vec::new(),
            chain_gaps: Vec::new(),
            suggestions: vec![format!("Internal error: {}", error)],
            verdict: CriticVerdict::ContinueExploring,
            reasoning: "Critic review failed; keep strengthening the evidence chain.".to_string(),
        }
    }

    /// 注入给探索智能体的永久消息
    pub fn to_message(&self, step: u32) -> Message {
        let mut out = String::new();
        let _ = writeln!(out, "CRITIC FEEDBACK ON YOUR DRAFT");
        let _ = writeln!(
            out,
            "Quality score: {:.2} | Verdict: {}\n",
            self.quality_score,
            self.verdict.as_str()
        );
        let critical: Vec<&String> = self.citation_issues.iter().chain(&self.chain_gaps).collect();
        if !critical.is_empty() {
            let _ = writeln!(out, "Critical issues:");
            for issue in critical {
                let _ = writeln!(out, "- {}", issue);
            }
            out.push('\n');
        }
        if !self.suggestions.is_empty() {
            let _ = writeln!(out, "Action plan:");
            for (i, s) in self.suggestions.iter().enumerate() {
                let _ = writeln!(out, "{}. {}", i + 1, s);
            }
            out.push('\n');
        }
        if !self.reasoning.is_empty() {
            let _ = writeln!(out, "Why: {}\n", self.reasoning);
        }
        let next = match self.verdict {
            CriticVerdict::ContinueExploring => {
                "MANDATORY NEXT ACTION: keep exploring. Read and save the missing evidence, then call draft_finding again."
            }
            CriticVerdict::ReviseDraft => {
                "MANDATORY NEXT ACTION: call draft_finding again with a revised rationale that fixes the issues above."
            }
            CriticVerdict::ReadyToFinish => "MANDATORY NEXT ACTION: call finish to submit the draft.",
        };
        let _ = write!(out, "{}", next);
        Message::user(out).with_id(format!("critic_feedback_{}", step))
    }
}

/// 模型输出的宽松形态：字段可缺失，列表可为单个字符串
#[derive(Deserialize, Default)]
#[serde(default)]
struct RawFeedback {
    quality_score: Option<serde_json::Value>,
    citation_issues: StringList,
    chain_gaps: StringList,
    suggestions: StringList,
    verdict: Option<String>,
    reasoning: Option<String>,
}

#[derive(Deserialize, Default)]
#[serde(untagged)]
enum StringList {
    #[default]
    None,
    One(String),
    Many(Vec<serde_json::Value>),
}

impl StringList {
    fn into_vec(self) -> Vec<String> {
        match self {
            StringList::None => Vec::new(),
            StringList::One(s) if s.trim().is_empty() => Vec::new(),
            StringList::One(s) => vec![s],
            StringList::Many(items) => items
                .into_iter()
                .map(|v| match v {
                    serde_json::Value::String(s) => s,
                    other => other.to_string(),
                })
                .collect(),
        }
    }
}

/// 解析审阅回复；接受 `{"feedback": {...}}` 或扁平对象
pub fn parse_feedback(text: &str) -> Option<CriticFeedback> {
    let cleaned = text.replace("**", "");
    let value = largest_json_object(&cleaned)?;
    let inner = match value.get("feedback") {
        Some(f) if f.is_object() => f.clone(),
        _ => value,
    };
    let raw: RawFeedback = serde_json::from_value(inner).ok()?;
    let score = match raw.quality_score {
        Some(serde_json::Value::Number(n)) => n.as_f64().unwrap_or(0.0),
        Some(serde_json::Value::String(s)) => s.trim().parse().unwrap_or(0.0),
        _ => 0.0,
    };
    Some(CriticFeedback {
        quality_score: score.clamp(0.0, 1.0),
        citation_issues: raw.citation_issues.into_vec(),
        chain_gaps: raw.chain_gaps.into_vec(),
        suggestions: raw.suggestions.into_vec(),
        verdict: raw
            .verdict
            .as_deref()
            .map(CriticVerdict::parse)
            .unwrap_or(CriticVerdict::ContinueExploring),
        reasoning: raw.reasoning.unwrap_or_default(),
    })
}

/// MidCritic：持有 LLM（medium 档）与 prompt 模板
pub struct MidCritic {
    llm: Arc<dyn LlmClient>,
    prompt_template: String,
}

impl MidCritic {
    pub fn new(llm: Arc<dyn LlmClient>, prompt_template: impl Into<String>) -> Self {
        Self {
            llm,
            prompt_template: prompt_template.into(),
        }
    }

    pub async fn review(
        &self,
        draft: &DraftFinding,
        excerpts: &[SavedExcerpt],
        step: u32,
        max_steps: u32,
    ) -> CriticFeedback {
        let mut evidence = String::new();
        for e in excerpts {
            let _ = writeln!(
                evidence,
                "- [{}] \"{}\" (why: {}; saved at {} step {})",
                e.source_id, e.excerpt, e.why_relevant, e.saved_at_topic, e.saved_at_step
            );
        }
        let prompt = fill_template(
            &self.prompt_template,
            &[
                ("headline", draft.headline.as_str()),
                ("rationale", draft.rationale.as_str()),
                ("flow_path", draft.flow_path.to_string().as_str()),
                ("evidence", evidence.trim_end()),
                ("step", step.to_string().as_str()),
                ("max_steps", max_steps.to_string().as_str()),
            ],
        );

        let response = match self.llm.complete(&[Message::user(prompt)]).await {
            Ok(r) => r,
            Err(e) => {
                tracing::warn!(error = %e, "mid critic call failed");
                return CriticFeedback::internal_error(e);
            }
        };
        match parse_feedback(&response) {
            Some(fb) => {
                tracing::info!(
                    score = fb.quality_score,
                    verdict = fb.verdict.as_str(),
                    "mid critic feedback"
                );
                fb
            }
            None => {
                tracing::warn!("mid critic response not parseable");
                CriticFeedback::internal_error("could not parse critic response")
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::explore::state::FlowPath;
    use crate::llm::{LlmError, ScriptedLlmClient};

    fn draft() -> DraftFinding {
        DraftFinding {
            headline: "Fed cut squeezes EUR".to_string(),
            rationale: "Fed cuts (art_A1)".to_string(),
            flow_path: FlowPath::parse("fed -> eurusd"),
        }
    }

    #[test]
    fn test_parse_wrapped_with_markdown() {
        let fb = parse_feedback(
            "**Review**\n```json\n{\"feedback\": {\"quality_score\": 1.4, \"chain_gaps\": \"missing ECB link\", \
             \"suggestions\": [\"read ecb_policy\"], \"verdict\": \"revise_draft\", \"reasoning\": \"thin\"}}\n```",
        )
        .unwrap();
        assert_eq!(fb.quality_score, 1.0);
        assert_eq!(fb.chain_gaps, vec!["missing ECB link".to_string()]);
        assert_eq!(fb.verdict, CriticVerdict::ReviseDraft);
    }

    #[tokio::test]
    async fn test_engine_failure_is_soft() {
        let llm = Arc::new(ScriptedLlmClient::from_results(vec![Err(LlmError::Transport(
            "reset".to_string(),
        ))]));
        let critic = MidCritic::new(llm, "{headline}");
        let fb = critic.review(&draft(), &[], 3, 10).await;
        assert_eq!(fb.quality_score, 0.0);
        assert_eq!(fb.verdict, CriticVerdict::ContinueExploring);
        assert!(fb.suggestions[0].starts_with("Internal error"));
    }

    #[tokio::test]
    async fn test_prompt_filled_and_message_built() {
        let llm = Arc::new(ScriptedLlmClient::new([
            r#"{"quality_score": 0.8, "verdict": "ready_to_finish", "reasoning": "solid"}"#,
        ]));
        let critic = MidCritic::new(llm.clone(), "Review {headline} via {flow_path} at {step}/{max_steps}");
        let fb = critic.review(&draft(), &[], 3, 10).await;
        let sent = llm.last_call().unwrap();
        assert_eq!(sent[0].content, "Review Fed cut squeezes EUR via fed → eurusd at 3/10");
        let msg = fb.to_message(3);
        assert_eq!(msg.msg_id.as_deref(), Some("critic_feedback_3"));
        assert!(!msg.prunable);
        assert!(msg.content.contains("call finish"));
    }

    #[tokio::test]
    async fn test_draft_text_is_not_re_expanded() {
        let llm = Arc::new(ScriptedLlmClient::new([r#"{"quality_score": 0.5}"#]));
        let critic = MidCritic::new(llm.clone(), "H={headline} R={rationale}");
        let mut d = draft();
        d.headline = "Fed {rationale} squeeze".to_string();
        critic.review(&d, &[], 1, 5).await;
        let sent = llm.last_call().unwrap();
        assert_eq!(sent[0].content, "H=Fed {rationale} squeeze R=Fed cuts (art_A1)");
    }
}
