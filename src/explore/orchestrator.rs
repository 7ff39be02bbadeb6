//! 探索编排：入口
//!
//! explore(topic, mode) -> AgentLoop -> FinalCritic；被拒时给予唯一一次有界重试（注入终审理由），
//! 再次终审后不再重试。通过终审的结果规范化后写入 FindingsStore。

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use serde::Serialize;

use crate::config::ExplorationSection;
use crate::explore::context::build_briefing;
use crate::explore::critic::MidCritic;
use crate::explore::final_critic::{CriticInput, FinalCritic, FinalVerdict};
use crate::explore::loop_::AgentLoop;
use crate::explore::prompts::PromptSet;
use crate::explore::state::{ExplorationMode, ExplorationResult, ExplorationState, SourceType};
use crate::explore::tools::{ReadLimits, ToolExecutor};
use crate::findings::normalize::{bucket_for_score, normalize_flow_path};
use crate::findings::{
    normalize_headline, normalize_rationale, FindingRecord, FindingsKey, FindingsStore, NewFinding,
};
use crate::graph::{article_source_id, section_source_id, ContentProvider};
use crate::llm::{ClientRegistry, ModelTier};
use crate::memory::Message;

/// 单次探索的选项
#[derive(Debug, Clone, Default)]
pub struct ExploreOptions {
    /// 未设置时使用配置的 max_steps
    pub max_steps: Option<u32>,
    /// 只探索，不终审也不入库
    pub skip_critic: bool,
}

/// 探索结局：结果、终审结论与入库情况
#[derive(Debug, Clone, Serialize)]
pub struct ExplorationOutcome {
    pub result: ExplorationResult,
    pub verdict: Option<FinalVerdict>,
    pub retried: bool,
    pub saved_finding_id: Option<String>,
    pub save_error: Option<String>,
}

impl ExplorationOutcome {
    fn unreviewed(result: ExplorationResult) -> Self {
        Self {
            result,
            verdict: None,
            retried: false,
            saved_finding_id: None,
            save_error: None,
        }
    }
}

/// 编排器：持有探索循环、终审器、内容读取与结果存储
pub struct Orchestrator {
    content: Arc<dyn ContentProvider>,
    findings: Arc<FindingsStore>,
    agent: AgentLoop,
    final_critic: FinalCritic,
    prompts: PromptSet,
    settings: ExplorationSection,
}

impl Orchestrator {
    /// 探索循环与终审用 complex 档，MidCritic 用 medium 档
    pub fn new(
        registry: &ClientRegistry,
        content: Arc<dyn ContentProvider>,
        findings: Arc<FindingsStore>,
        settings: ExplorationSection,
        prompts: PromptSet,
    ) -> Self {
        let mid_critic = MidCritic::new(registry.get(ModelTier::Medium), prompts.mid_critic.clone());
        let executor = ToolExecutor::new(content.clone(), mid_critic, ReadLimits::from(&settings));
        let agent = AgentLoop::new(registry.get(ModelTier::Complex), executor, prompts.explorer.clone());
        let final_critic = FinalCritic::new(registry.get(ModelTier::Complex), prompts.final_critic.clone());
        Self {
            content,
            findings,
            agent,
            final_critic,
            prompts,
            settings,
        }
    }

    pub async fn explore(&self, topic_id: &str, mode: ExplorationMode, opts: &ExploreOptions) -> ExplorationOutcome {
        self.run(topic_id, None, topic_id, mode, opts).await
    }

    /// 从策略映射的首个话题出发；结果以 `strategy:<id>` 为键
    pub async fn explore_strategy(
        &self,
        strategy_id: &str,
        mode: ExplorationMode,
        opts: &ExploreOptions,
    ) -> ExplorationOutcome {
        let topics = match self.content.strategy_topics(strategy_id).await {
            Ok(t) => t,
            Err(e) => {
                return ExplorationOutcome::unreviewed(ExplorationResult::failed(
                    strategy_id,
                    Some(strategy_id.to_string()),
                    mode,
                    format!("Could not load strategy topics: {}", e),
                ))
            }
        };
        let Some(start) = topics.first() else {
            tracing::warn!(strategy = %strategy_id, "strategy has no mapped topics");
            return ExplorationOutcome::unreviewed(ExplorationResult::failed(
                strategy_id,
                Some(strategy_id.to_string()),
                mode,
                format!("Strategy '{}' has no mapped topics", strategy_id),
            ));
        };
        self.run(start, Some(strategy_id.to_string()), start, mode, opts).await
    }

    async fn run(
        &self,
        target_id: &str,
        strategy_id: Option<String>,
        start_topic: &str,
        mode: ExplorationMode,
        opts: &ExploreOptions,
    ) -> ExplorationOutcome {
        let failed = |error: String| {
            ExplorationOutcome::unreviewed(ExplorationResult::failed(target_id, strategy_id.clone(), mode, error))
        };

        let snapshot = match self.content.get_topic_snapshot(start_topic).await {
            Ok(Some(s)) => s,
            Ok(None) => return failed(format!("Topic not found: {}", start_topic)),
            Err(e) => return failed(format!("Could not load topic '{}': {}", start_topic, e)),
        };
        let briefing = match build_briefing(self.content.as_ref(), &snapshot, mode).await {
            Ok(b) => b,
            Err(e) => return failed(format!("Could not load topic briefing: {}", e)),
        };

        let max_steps = opts.max_steps.unwrap_or(self.settings.max_steps).max(1);
        let mut state = ExplorationState::new(target_id, mode, snapshot, max_steps);
        if let Some(id) = &strategy_id {
            state = state.with_strategy(id.clone());
        }
        let key = FindingsKey::new(state.findings_target(), mode);
        let existing = match self.findings.get(&key).await {
            Ok(f) => f,
            Err(e) => return failed(format!("Could not load existing findings for {}: {}", key, e)),
        };
        state.topic_briefing = briefing;
        state.existing_headlines = existing.iter().map(|f| f.headline.clone()).collect();
        state.messages.push(Message::system(self.prompts.explorer_system(
            mode,
            target_id,
            self.agent.executor().sections(),
        )));

        let result = self.agent.run(&mut state).await;
        if !result.success {
            return ExplorationOutcome::unreviewed(result);
        }
        if opts.skip_critic {
            tracing::info!(key = %key, "critic skipped");
            return ExplorationOutcome::unreviewed(result);
        }

        let mut verdict = self.review(&result, &existing, mode).await;
        let mut result = result;
        let mut retried = false;
        if !verdict.accepted {
            retried = true;
            tracing::info!(reasons = ?verdict.rejection_reasons, "final critic rejected, retrying once");
            let retry = self
                .agent
                .resume(
                    &mut state,
                    &verdict.reasoning,
                    &verdict.rejection_reasons,
                    self.settings.retry_steps,
                )
                .await;
            if retry.success {
                verdict = self.review(&retry, &existing, mode).await;
            } else {
                tracing::info!(error = ?retry.error, "retry ended without a draft");
            }
            result = retry;
        }

        let mut outcome = ExplorationOutcome {
            result,
            verdict: None,
            retried,
            saved_finding_id: None,
            save_error: None,
        };
        if verdict.accepted {
            match self.save(&key, &outcome.result, &verdict).await {
                Ok(id) => outcome.saved_finding_id = Some(id),
                Err(e) => {
                    tracing::error!(key = %key, error = %e, "saving accepted finding failed");
                    outcome.save_error = Some(e);
                }
            }
        }
        outcome.verdict = Some(verdict);
        outcome
    }

    async fn review(&self, result: &ExplorationResult, existing: &[FindingRecord], mode: ExplorationMode) -> FinalVerdict {
        let (source_texts, topic_analyses) = self.gather_sources(result).await;
        let input = CriticInput {
            result,
            source_texts: &source_texts,
            topic_analyses: &topic_analyses,
            existing,
            mode,
        };
        self.final_critic.evaluate(&input).await
    }

    /// 证据原文（章节重读、文章从保存时所在话题重读，失败退回摘录本身）与相关话题的分析章节
    async fn gather_sources(
        &self,
        result: &ExplorationResult,
    ) -> (BTreeMap<String, String>, BTreeMap<String, BTreeMap<String, String>>) {
        let mut texts = BTreeMap::new();
        let mut article_cache: HashMap<String, HashMap<String, String>> = HashMap::new();

        for e in &result.evidence {
            if texts.contains_key(&e.source_id) {
                continue;
            }
            let fetched = match e.source_type {
                SourceType::Section => {
                    let prefix = section_source_id(&e.saved_at_topic, "");
                    match e.source_id.strip_prefix(&prefix) {
                        Some(section) => self
                            .content
                            .read_section(&e.saved_at_topic, section)
                            .await
                            .unwrap_or_else(|err| {
                                tracing::warn!(source = %e.source_id, error = %err, "re-reading section failed");
                                None
                            }),
                        None => None,
                    }
                }
                SourceType::Article => {
                    if !article_cache.contains_key(&e.saved_at_topic) {
                        let articles = self
                            .content
                            .read_articles(&e.saved_at_topic, self.settings.max_articles.max(1))
                            .await
                            .unwrap_or_else(|err| {
                                tracing::warn!(topic = %e.saved_at_topic, error = %err, "re-reading articles failed");
                                Vec::new()
                            });
                        let by_id = articles
                            .into_iter()
                            .map(|a| (article_source_id(&a.id), a.body().to_string()))
                            .collect();
                        article_cache.insert(e.saved_at_topic.clone(), by_id);
                    }
                    article_cache
                        .get(&e.saved_at_topic)
                        .and_then(|m| m.get(&e.source_id))
                        .cloned()
                }
            };
            texts.insert(e.source_id.clone(), fetched.unwrap_or_else(|| e.excerpt.clone()));
        }

        let mut topics: Vec<&str> = vec![result.target_id.as_str()];
        for e in &result.evidence {
            if !topics.contains(&e.saved_at_topic.as_str()) {
                topics.push(&e.saved_at_topic);
            }
        }
        let mut analyses = BTreeMap::new();
        for topic in topics {
            let mut sections = BTreeMap::new();
            for section in &self.settings.sections {
                match self.content.read_section(topic, section).await {
                    Ok(Some(text)) => {
                        sections.insert(section.clone(), text);
                    }
                    Ok(None) => {}
                    Err(err) => tracing::warn!(topic, section = %section, error = %err, "reading analysis failed"),
                }
            }
            if !sections.is_empty() {
                analyses.insert(topic.to_string(), sections);
            }
        }
        (texts, analyses)
    }

    async fn save(&self, key: &FindingsKey, result: &ExplorationResult, verdict: &FinalVerdict) -> Result<String, String> {
        let finding = NewFinding {
            headline: normalize_headline(&result.headline),
            rationale: normalize_rationale(&result.rationale),
            flow_path: normalize_flow_path(&result.flow_path),
            evidence: result.evidence.clone(),
            confidence: bucket_for_score(verdict.confidence),
            steps_taken: result.steps_taken,
        };
        self.findings
            .save(key, finding, verdict.replaces)
            .await
            .map_err(|e| e.to_string())
    }
}
