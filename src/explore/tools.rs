//! 工具执行器
//!
//! dispatch(tool_call, state) 解释一次工具调用并返回新消息与 finish 标记。
//! 除 save_excerpt 外，任何调用（成功、拒绝、未知工具）在执行前都先清空临时内容。
//! 每次调用输出结构化审计日志（JSON）。

use std::collections::BTreeSet;
use std::fmt::Write as _;
use std::sync::Arc;
use std::time::Instant;

use crate::config::ExplorationSection;
use crate::core::AgentError;
use crate::explore::citations;
use crate::explore::context::{build_briefing, truncate_chars};
use crate::explore::critic::MidCritic;
use crate::explore::protocol::{tool_names, ExcerptSave, ToolCall};
use crate::explore::state::{DraftFinding, ExplorationState, FlowPath, SavedExcerpt, SourceType};
use crate::graph::{article_source_id, section_source_id, ContentProvider};
use crate::memory::Message;

const DEFAULT_ARTICLE_LIMIT: usize = 3;
const THOUGHT_ECHO_CHARS: usize = 300;
const TRUNCATION_MARK: &str = "\n\n[... truncated ...]";

/// 读取上限与可读章节
#[derive(Debug, Clone)]
pub struct ReadLimits {
    pub max_articles: usize,
    pub section_chars: usize,
    pub article_chars: usize,
    pub sections: Vec<String>,
}

impl From<&ExplorationSection> for ReadLimits {
    fn from(cfg: &ExplorationSection) -> Self {
        Self {
            max_articles: cfg.max_articles.max(1),
            section_chars: cfg.section_char_limit,
            article_chars: cfg.article_char_limit,
            sections: cfg.sections.clone(),
        }
    }
}

impl Default for ReadLimits {
    fn default() -> Self {
        Self::from(&ExplorationSection::default())
    }
}

/// 一次调用的结局
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ToolOutcome {
    Ok,
    Rejected,
    Finish,
}

impl ToolOutcome {
    fn as_str(&self) -> &'static str {
        match self {
            ToolOutcome::Ok => "ok",
            ToolOutcome::Rejected => "rejected",
            ToolOutcome::Finish => "finish",
        }
    }
}

/// dispatch 返回值
#[derive(Debug)]
pub struct Dispatch {
    pub messages: Vec<Message>,
    pub outcome: ToolOutcome,
}

impl Dispatch {
    pub fn is_finish(&self) -> bool {
        self.outcome == ToolOutcome::Finish
    }

    fn ok(messages: Vec<Message>) -> Self {
        Self {
            messages,
            outcome: ToolOutcome::Ok,
        }
    }

    fn rejected(msg: Message) -> Self {
        Self {
            messages: vec![msg],
            outcome: ToolOutcome::Rejected,
        }
    }
}

/// 工具执行器：持有内容读取、MidCritic 与读取上限
pub struct ToolExecutor {
    content: Arc<dyn ContentProvider>,
    critic: MidCritic,
    limits: ReadLimits,
}

impl ToolExecutor {
    pub fn new(content: Arc<dyn ContentProvider>, critic: MidCritic, limits: ReadLimits) -> Self {
        Self {
            content,
            critic,
            limits,
        }
    }

    pub fn sections(&self) -> &[String] {
        &self.limits.sections
    }

    /// 执行一次工具调用；内容读取失败（重试耗尽）返回 AgentError::Content
    pub async fn dispatch(&self, call: &ToolCall, state: &mut ExplorationState) -> Result<Dispatch, AgentError> {
        let start = Instant::now();
        // 清空前的快照，供草稿拒绝时判断引用是否仍可保存
        let loaded_before: BTreeSet<String> = state.temp_content_ids.keys().cloned().collect();
        let cleared = if call.clears_temp_content() {
            state.clear_temp_content().len()
        } else {
            0
        };

        let step = state.step_count;
        let result = match call {
            ToolCall::ReadSection { topic_id, section } => {
                self.read_section(topic_id.as_deref(), section, state).await
            }
            ToolCall::ReadArticles { topic_id, limit } => {
                self.read_articles(topic_id.as_deref(), *limit, state).await
            }
            ToolCall::SaveExcerpt { saves } => Ok(save_excerpts(saves, state)),
            ToolCall::Think { thought } => Ok(Dispatch::ok(vec![Message::user(format!(
                "Thought recorded: {}",
                truncate_chars(thought.trim(), THOUGHT_ECHO_CHARS, "...")
            ))
            .with_id(format!("think_{}", step))])),
            ToolCall::MoveToTopic { topic_id, reason } => self.move_to_topic(topic_id, reason, state).await,
            ToolCall::DraftFinding {
                headline,
                rationale,
                flow_path,
            } => Ok(self.draft_finding(headline, rationale, flow_path, &loaded_before, state).await),
            ToolCall::Finish => Ok(finish(state)),
            ToolCall::SuggestLink {
                source_topic,
                target_topic,
                relationship_type,
                ..
            } => {
                tracing::info!(
                    source = %source_topic,
                    target = %target_topic,
                    relation = %relationship_type,
                    "link suggested"
                );
                Ok(Dispatch::ok(vec![notice(
                    "suggest_link",
                    step,
                    format!(
                        "Link suggestion noted: {} -[{}]-> {}",
                        source_topic, relationship_type, target_topic
                    ),
                )]))
            }
            ToolCall::Unknown { name } => Ok(Dispatch::rejected(notice(
                "unknown_tool",
                step,
                format!("Unknown tool '{}'. Valid tools: {}", name, tool_names()),
            ))),
            ToolCall::Invalid { kind, error } => Ok(Dispatch::rejected(notice(
                kind.name(),
                step,
                format!("Invalid arguments for {}: {}", kind.name(), error),
            ))),
        };

        let duration_ms = start.elapsed().as_millis() as u64;
        let outcome = match &result {
            Ok(d) => d.outcome.as_str(),
            Err(_) => "error",
        };
        let audit = serde_json::json!({
            "event": "tool_audit",
            "tool": call.name(),
            "step": step,
            "outcome": outcome,
            "cleared": cleared,
            "duration_ms": duration_ms,
            "args_preview": args_preview(call),
        });
        tracing::info!(audit = %audit.to_string(), "tool");
        result
    }

    async fn read_section(
        &self,
        topic_id: Option<&str>,
        section: &str,
        state: &mut ExplorationState,
    ) -> Result<Dispatch, AgentError> {
        let step = state.step_count;
        let topic = match readable_topic(topic_id, state) {
            Ok(t) => t,
            Err(msg) => return Ok(Dispatch::rejected(notice("read_section", step, msg))),
        };
        if !self.limits.sections.iter().any(|s| s == section) {
            return Ok(Dispatch::rejected(notice(
                "read_section",
                step,
                format!(
                    "Unknown section '{}'. Available sections: {}",
                    section,
                    self.limits.sections.join(", ")
                ),
            )));
        }
        let Some(text) = self.content.read_section(&topic, section).await? else {
            return Ok(Dispatch::rejected(notice(
                "read_section",
                step,
                format!("Section '{}' is empty for topic '{}'. Try another section or read_articles.", section, topic),
            )));
        };

        let source_id = section_source_id(&topic, section);
        let body = truncate_chars(&text, self.limits.section_chars, TRUNCATION_MARK);
        let content = format!(
            "TEMPORARY CONTENT [{id}] ({section} of {topic})\n\n{body}\n\n\
             This content disappears on your next tool call unless you save it, e.g.\n\
             {{\"tool\": \"save_excerpt\", \"saves\": [{{\"source_id\": \"{id}\", \"excerpt\": \"<exact quote>\", \"why_relevant\": \"<why>\"}}]}}",
            id = source_id,
            section = section,
            topic = topic,
            body = body,
        );
        state.temp_content_ids.insert(source_id.clone(), topic);
        Ok(Dispatch::ok(vec![Message::temporary(source_id, content)]))
    }

    async fn read_articles(
        &self,
        topic_id: Option<&str>,
        limit: Option<usize>,
        state: &mut ExplorationState,
    ) -> Result<Dispatch, AgentError> {
        let step = state.step_count;
        let topic = match readable_topic(topic_id, state) {
            Ok(t) => t,
            Err(msg) => return Ok(Dispatch::rejected(notice("read_articles", step, msg))),
        };
        let limit = limit
            .unwrap_or(DEFAULT_ARTICLE_LIMIT)
            .clamp(1, self.limits.max_articles);
        let articles = self.content.read_articles(&topic, limit).await?;
        if articles.is_empty() {
            return Ok(Dispatch::rejected(notice(
                "read_articles",
                step,
                format!("No articles found for topic '{}'. Try read_section instead.", topic),
            )));
        }

        let ids: Vec<String> = articles.iter().map(|a| article_source_id(&a.id)).collect();
        let summary_id = format!("articles_summary_{}", step);
        let mut messages = vec![Message::temporary(
            summary_id.clone(),
            format!(
                "TEMPORARY CONTENT: {} article(s) loaded from {}: {}\n\
                 Save what you need with save_excerpt before any other tool call.",
                articles.len(),
                topic,
                ids.join(", ")
            ),
        )];
        state.temp_content_ids.insert(summary_id, topic.clone());
        for (article, id) in articles.iter().zip(ids) {
            let body = truncate_chars(article.body(), self.limits.article_chars, TRUNCATION_MARK);
            messages.push(Message::temporary(
                id.clone(),
                format!("📄 **{}**: {}\n\n{}", id, article.title, body),
            ));
            state.temp_content_ids.insert(id, topic.clone());
        }
        Ok(Dispatch::ok(messages))
    }

    async fn move_to_topic(
        &self,
        topic_id: &str,
        reason: &str,
        state: &mut ExplorationState,
    ) -> Result<Dispatch, AgentError> {
        let step = state.step_count;
        if !state.current_topic.is_connected(topic_id) {
            let options: Vec<&str> = state
                .current_topic
                .connected_topics
                .iter()
                .map(|c| c.id.as_str())
                .collect();
            return Ok(Dispatch::rejected(notice(
                "move_to_topic",
                step,
                format!(
                    "Cannot move to '{}': not connected to {}. Connected topics: {}",
                    topic_id,
                    state.current_topic.id,
                    options.join(", ")
                ),
            )));
        }
        let Some(snapshot) = self.content.get_topic_snapshot(topic_id).await? else {
            return Ok(Dispatch::rejected(notice(
                "move_to_topic",
                step,
                format!("Topic '{}' could not be loaded. Choose another connection.", topic_id),
            )));
        };
        let briefing = build_briefing(self.content.as_ref(), &snapshot, state.mode).await?;
        tracing::info!(from = %state.current_topic.id, to = %snapshot.id, reason = %reason, "moved");
        state.current_topic = snapshot;
        state.topic_briefing = briefing;
        state.visited_topics.push(topic_id.to_string());
        Ok(Dispatch::ok(Vec::new()))
    }

    async fn draft_finding(
        &self,
        headline: &str,
        rationale: &str,
        flow_path: &FlowPath,
        loaded_before: &BTreeSet<String>,
        state: &mut ExplorationState,
    ) -> Dispatch {
        let step = state.step_count;
        let missing = citations::check(rationale, &state.saved_excerpts);
        if !missing.is_empty() {
            return Dispatch::rejected(
                Message::user(citation_rejection(&missing, loaded_before))
                    .with_id(format!("missing_citations_{}", step)),
            );
        }

        let draft = DraftFinding {
            headline: headline.trim().to_string(),
            rationale: rationale.trim().to_string(),
            flow_path: flow_path.clone(),
        };
        state.draft_finding = Some(draft.clone());

        if state.critic_feedback_received {
            return Dispatch::ok(vec![notice(
                "draft_finding",
                step,
                "Revised finding drafted! Call finish when ready.".to_string(),
            )]);
        }
        let feedback = self
            .critic
            .review(&draft, &state.saved_excerpts, step, state.max_steps)
            .await;
        state.critic_feedback_received = true;
        Dispatch::ok(vec![feedback.to_message(step)])
    }
}

/// 读取目标：默认当前话题，显式指定时只能是当前或相邻话题
fn readable_topic(topic_id: Option<&str>, state: &ExplorationState) -> Result<String, String> {
    let current = &state.current_topic;
    match topic_id {
        None => Ok(current.id.clone()),
        Some(id) if id == current.id || current.is_connected(id) => Ok(id.to_string()),
        Some(id) => Err(format!(
            "Cannot read '{}': only the current topic ({}) or its connected topics can be read.",
            id, current.id
        )),
    }
}

fn save_excerpts(saves: &[ExcerptSave], state: &mut ExplorationState) -> Dispatch {
    let step = state.step_count;
    if saves.is_empty() {
        return Dispatch::rejected(notice(
            "save_excerpt",
            step,
            "save_excerpt needs a non-empty 'saves' list of {source_id, excerpt, why_relevant}.".to_string(),
        ));
    }

    let mut saved = Vec::new();
    let mut errors = Vec::new();
    for s in saves {
        let source_id = s.source_id.trim();
        let Some(source_type) = SourceType::from_source_id(source_id) else {
            errors.push(format!("'{}' is not an article (art_) or section (sec_) id", source_id));
            continue;
        };
        let Some(read_from) = state.temp_content_ids.get(source_id).cloned() else {
            errors.push(format!("'{}' is not currently loaded; read it again first", source_id));
            continue;
        };
        if s.excerpt.trim().is_empty() {
            errors.push(format!("'{}' has an empty excerpt", source_id));
            continue;
        }
        state.saved_excerpts.push(SavedExcerpt {
            excerpt: s.excerpt.trim().to_string(),
            source_id: source_id.to_string(),
            source_type,
            why_relevant: s.why_relevant.trim().to_string(),
            saved_at_topic: read_from,
            saved_at_step: step,
        });
        saved.push(source_id.to_string());
    }

    let mut out = format!(
        "Saved {} excerpt(s): {} (total saved: {})",
        saved.len(),
        if saved.is_empty() { "none".to_string() } else { saved.join(", ") },
        state.saved_excerpts.len()
    );
    if !errors.is_empty() {
        let _ = write!(out, "\nErrors:\n- {}", errors.join("\n- "));
    }
    let still_loaded: Vec<&str> = state
        .temp_content_ids
        .keys()
        .filter(|id| SourceType::from_source_id(id).is_some())
        .map(String::as_str)
        .collect();
    if !still_loaded.is_empty() {
        let _ = write!(out, "\nStill loaded (save now or lose on next tool): {}", still_loaded.join(", "));
    }
    let msg = Message::user(out).with_id(format!("saved_{}", step));
    if saved.is_empty() {
        Dispatch::rejected(msg)
    } else {
        Dispatch::ok(vec![msg])
    }
}

fn finish(state: &ExplorationState) -> Dispatch {
    if state.draft_finding.is_some() {
        Dispatch {
            messages: Vec::new(),
            outcome: ToolOutcome::Finish,
        }
    } else {
        Dispatch::rejected(notice(
            "finish",
            state.step_count,
            "Cannot finish: no draft finding yet. Call draft_finding first.".to_string(),
        ))
    }
}

/// 引用缺失的拒绝消息：逐个标注仍可保存还是必须重新读取
fn citation_rejection(missing: &BTreeSet<String>, loaded_before: &BTreeSet<String>) -> String {
    let mut out = String::from("DRAFT REJECTED - CITATION ERROR\n\nYour rationale cites sources you have not saved:\n");
    let mut any_loaded = false;
    for id in missing {
        if SourceType::from_source_id(id).is_none() {
            let _ = writeln!(out, "- {}: not a source id. Cite saved art_/sec_ ids only.", id);
        } else if loaded_before.contains(id) {
            any_loaded = true;
            let _ = writeln!(out, "- {}: Currently loaded! Save it with save_excerpt before drafting.", id);
        } else {
            let _ = writeln!(out, "- {}: NOT loaded. You must read it again, then save it.", id);
        }
    }
    out.push_str("\nMANDATORY STEPS:\n");
    if any_loaded {
        out.push_str(
            "Note: this draft call cleared loaded content; ids marked loaded must be read again before saving.\n",
        );
    }
    out.push_str(
        "1. Read the missing sources (read_section / read_articles).\n\
         2. Save them with save_excerpt.\n\
         3. Call draft_finding again, citing only saved source ids.",
    );
    out
}

/// 永久提示消息
fn notice(tool: &str, step: u32, text: String) -> Message {
    Message::user(text).with_id(format!("{}_{}", tool, step))
}

fn args_preview(call: &ToolCall) -> String {
    let s = format!("{:?}", call);
    if s.chars().count() > 200 {
        format!("{}...", s.chars().take(200).collect::<String>())
    } else {
        s
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::explore::protocol::ToolKind;
    use crate::explore::state::ExplorationMode;
    use crate::graph::InMemoryGraph;
    use crate::llm::ScriptedLlmClient;
    use serde_json::json;

    fn graph() -> Arc<InMemoryGraph> {
        Arc::new(
            InMemoryGraph::from_value(json!({
                "topics": [
                    {"id": "eurusd", "name": "EUR/USD",
                     "sections": {"executive_summary": "Rates drive EUR", "risk_monitor": "ECB dovish tilt"},
                     "articles": [{"id": "A1", "title": "ECB", "content": "ECB holds rates"},
                                  {"id": "A2", "title": "Fed", "content": "Fed cuts"}],
                     "connections": [{"id": "fed_policy", "relation": "INFLUENCED_BY"}]},
                    {"id": "fed_policy", "name": "Fed Policy",
                     "sections": {"executive_summary": "Fed easing", "risk_monitor": "Sticky core inflation"},
                     "articles": [{"id": "B1", "title": "Minutes", "content": "No cuts this year"}]},
                    {"id": "oil", "name": "Oil"}
                ]
            }))
            .unwrap(),
        )
    }

    async fn setup(critic_responses: &[&str]) -> (ToolExecutor, ExplorationState, Arc<ScriptedLlmClient>) {
        let g = graph();
        let start = g.get_topic_snapshot("eurusd").await.unwrap().unwrap();
        let llm = Arc::new(ScriptedLlmClient::new(critic_responses.iter().copied()));
        let exec = ToolExecutor::new(g, MidCritic::new(llm.clone(), "{headline}"), ReadLimits::default());
        let mut state = ExplorationState::new("eurusd", ExplorationMode::Risk, start, 10);
        state.step_count = 1;
        (exec, state, llm)
    }

    fn save(id: &str) -> ToolCall {
        ToolCall::SaveExcerpt {
            saves: vec![ExcerptSave {
                source_id: id.to_string(),
                excerpt: "quote".to_string(),
                why_relevant: "why".to_string(),
            }],
        }
    }

    #[tokio::test]
    async fn test_read_then_save_then_clear() {
        let (exec, mut state, _) = setup(&[]).await;
        let d = exec
            .dispatch(&ToolCall::ReadArticles { topic_id: None, limit: Some(10) }, &mut state)
            .await
            .unwrap();
        assert_eq!(d.messages.len(), 3);
        assert!(state.temp_content_ids.contains_key("art_A1"));
        state.messages.extend(d.messages);

        let d = exec.dispatch(&save("art_A1"), &mut state).await.unwrap();
        assert_eq!(d.outcome, ToolOutcome::Ok);
        assert_eq!(state.saved_excerpts.len(), 1);
        assert!(state.temp_content_ids.contains_key("art_A2"));
        assert!(d.messages[0].content.contains("art_A2"));

        exec.dispatch(&ToolCall::Think { thought: "hm".into() }, &mut state)
            .await
            .unwrap();
        assert!(state.temp_content_ids.is_empty());
        assert!(!state.messages.contains_id("art_A1"));
        assert_eq!(state.saved_excerpts.len(), 1);
    }

    #[tokio::test]
    async fn test_save_rejects_unloaded_and_empty() {
        let (exec, mut state, _) = setup(&[]).await;
        let d = exec.dispatch(&save("art_A1"), &mut state).await.unwrap();
        assert_eq!(d.outcome, ToolOutcome::Rejected);
        assert!(d.messages[0].content.contains("not currently loaded"));
        let d = exec
            .dispatch(&ToolCall::SaveExcerpt { saves: vec![] }, &mut state)
            .await
            .unwrap();
        assert_eq!(d.outcome, ToolOutcome::Rejected);
        assert!(state.saved_excerpts.is_empty());
    }

    #[tokio::test]
    async fn test_read_section_validation() {
        let (exec, mut state, _) = setup(&[]).await;
        let d = exec
            .dispatch(
                &ToolCall::ReadSection { topic_id: Some("oil".into()), section: "risk_monitor".into() },
                &mut state,
            )
            .await
            .unwrap();
        assert_eq!(d.outcome, ToolOutcome::Rejected);

        let d = exec
            .dispatch(&ToolCall::ReadSection { topic_id: None, section: "gossip".into() }, &mut state)
            .await
            .unwrap();
        assert!(d.messages[0].content.contains("Available sections"));

        let d = exec
            .dispatch(&ToolCall::ReadSection { topic_id: None, section: "risk_monitor".into() }, &mut state)
            .await
            .unwrap();
        assert_eq!(d.messages[0].msg_id.as_deref(), Some("sec_eurusd_risk_monitor"));
        assert!(d.messages[0].prunable);
    }

    #[tokio::test]
    async fn test_move_only_to_connected() {
        let (exec, mut state, _) = setup(&[]).await;
        let d = exec
            .dispatch(&ToolCall::MoveToTopic { topic_id: "oil".into(), reason: "x".into() }, &mut state)
            .await
            .unwrap();
        assert_eq!(d.outcome, ToolOutcome::Rejected);
        assert_eq!(state.current_topic.id, "eurusd");

        exec.dispatch(&ToolCall::MoveToTopic { topic_id: "fed_policy".into(), reason: "x".into() }, &mut state)
            .await
            .unwrap();
        assert_eq!(state.current_topic.id, "fed_policy");
        assert_eq!(state.visited_topics, vec!["eurusd", "fed_policy"]);
        assert!(state.topic_briefing.contains("Fed easing"));
    }

    #[tokio::test]
    async fn test_draft_rejection_marks_recoverable() {
        let (exec, mut state, llm) = setup(&[]).await;
        let d = exec
            .dispatch(&ToolCall::ReadArticles { topic_id: None, limit: None }, &mut state)
            .await
            .unwrap();
        state.messages.extend(d.messages);
        let draft = ToolCall::DraftFinding {
            headline: "h".into(),
            rationale: "ECB (art_A1) and (art_Q9)".into(),
            flow_path: FlowPath::parse("a -> b"),
        };
        let d = exec.dispatch(&draft, &mut state).await.unwrap();
        assert_eq!(d.outcome, ToolOutcome::Rejected);
        let text = &d.messages[0].content;
        assert!(text.starts_with("DRAFT REJECTED - CITATION ERROR"));
        assert!(text.contains("art_A1: Currently loaded!"));
        assert!(text.contains("art_Q9: NOT loaded"));
        assert!(state.draft_finding.is_none());
        assert!(state.temp_content_ids.is_empty());
        assert_eq!(llm.call_count(), 0);
    }

    #[tokio::test]
    async fn test_mid_critic_runs_once() {
        let (exec, mut state, llm) = setup(&[r#"{"quality_score": 0.6, "verdict": "revise_draft"}"#]).await;
        let draft = ToolCall::DraftFinding {
            headline: "h".into(),
            rationale: "no citations".into(),
            flow_path: FlowPath::parse("a -> b"),
        };
        let d = exec.dispatch(&draft, &mut state).await.unwrap();
        assert!(d.messages[0].content.contains("CRITIC FEEDBACK"));
        assert!(state.critic_feedback_received);

        state.step_count = 2;
        let d = exec.dispatch(&draft, &mut state).await.unwrap();
        assert!(d.messages[0].content.starts_with("Revised finding drafted!"));
        assert_eq!(llm.call_count(), 1);

        let d = exec.dispatch(&ToolCall::Finish, &mut state).await.unwrap();
        assert!(d.is_finish());
    }

    #[tokio::test]
    async fn test_finish_without_draft_and_unknown_tool() {
        let (exec, mut state, _) = setup(&[]).await;
        assert!(!exec.dispatch(&ToolCall::Finish, &mut state).await.unwrap().is_finish());
        let d = exec
            .dispatch(&ToolCall::Unknown { name: "search".into() }, &mut state)
            .await
            .unwrap();
        assert!(d.messages[0].content.contains("read_section"));
    }

    #[tokio::test]
    async fn test_excerpt_from_connected_topic_records_that_topic() {
        let (exec, mut state, _) = setup(&[]).await;
        let d = exec
            .dispatch(&ToolCall::ReadArticles { topic_id: Some("fed_policy".into()), limit: None }, &mut state)
            .await
            .unwrap();
        state.messages.extend(d.messages);
        exec.dispatch(&save("art_B1"), &mut state).await.unwrap();
        let d = exec
            .dispatch(
                &ToolCall::ReadSection { topic_id: Some("fed_policy".into()), section: "risk_monitor".into() },
                &mut state,
            )
            .await
            .unwrap();
        assert_eq!(d.messages[0].msg_id.as_deref(), Some("sec_fed_policy_risk_monitor"));
        state.messages.extend(d.messages);
        exec.dispatch(&save("sec_fed_policy_risk_monitor"), &mut state).await.unwrap();

        assert_eq!(state.current_topic.id, "eurusd");
        let topics: Vec<(&str, &str)> = state
            .saved_excerpts
            .iter()
            .map(|e| (e.source_id.as_str(), e.saved_at_topic.as_str()))
            .collect();
        assert_eq!(
            topics,
            vec![("art_B1", "fed_policy"), ("sec_fed_policy_risk_monitor", "fed_policy")]
        );
    }

    #[tokio::test]
    async fn test_rejected_calls_still_clear_loaded_content() {
        let (exec, mut state, _) = setup(&[]).await;
        let rejected = [
            ToolCall::MoveToTopic { topic_id: "oil".into(), reason: "x".into() },
            ToolCall::Unknown { name: "search".into() },
            ToolCall::Invalid { kind: ToolKind::ReadSection, error: "missing field `section`".into() },
        ];
        for call in &rejected {
            let d = exec
                .dispatch(&ToolCall::ReadArticles { topic_id: None, limit: Some(1) }, &mut state)
                .await
                .unwrap();
            state.messages.extend(d.messages);
            assert!(state.messages.contains_id("art_A1"));

            let d = exec.dispatch(call, &mut state).await.unwrap();
            assert_eq!(d.outcome, ToolOutcome::Rejected);
            assert!(state.temp_content_ids.is_empty());
            assert!(!state.messages.contains_id("art_A1"));
            assert!(!state.messages.contains_id("articles_summary_1"));
        }
        assert_eq!(state.current_topic.id, "eurusd");
    }

    #[tokio::test]
    async fn test_think_echoes_thought() {
        let (exec, mut state, _) = setup(&[]).await;
        let d = exec
            .dispatch(&ToolCall::Think { thought: "Fed path matters more than ECB".into() }, &mut state)
            .await
            .unwrap();
        assert_eq!(d.messages[0].msg_id.as_deref(), Some("think_1"));
        assert_eq!(d.messages[0].content, "Thought recorded: Fed path matters more than ECB");
    }

    #[tokio::test]
    async fn test_non_id_citation_flagged_in_rejection() {
        let (exec, mut state, _) = setup(&[]).await;
        let draft = ToolCall::DraftFinding {
            headline: "h".into(),
            rationale: "Fed stays hawkish (fed_policy)".into(),
            flow_path: FlowPath::parse("a -> b"),
        };
        let d = exec.dispatch(&draft, &mut state).await.unwrap();
        assert_eq!(d.outcome, ToolOutcome::Rejected);
        assert!(d.messages[0].content.contains("fed_policy: not a source id"));
    }
}
