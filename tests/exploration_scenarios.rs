//! 探索端到端场景测试（脚本化 LLM + 内存图）

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use pathfinder::config::ExplorationSection;
    use pathfinder::explore::critic::MidCritic;
    use pathfinder::explore::state::SourceType;
    use pathfinder::explore::{
        AgentLoop, ExplorationMode, ExplorationState, ExploreOptions, FlowPath, Orchestrator, PromptSet,
        ReadLimits, SavedExcerpt, ToolExecutor,
    };
    use pathfinder::findings::{ConfidenceBucket, FindingsKey, FindingsStore, NewFinding};
    use pathfinder::graph::{ContentProvider, InMemoryGraph};
    use pathfinder::llm::{ClientRegistry, ModelTier, ScriptedLlmClient};
    use serde_json::json;

    fn graph() -> Arc<InMemoryGraph> {
        Arc::new(
            InMemoryGraph::from_value(json!({
                "topics": [
                    {"id": "eurusd", "name": "EUR/USD",
                     "sections": {"executive_summary": "Rate differentials drive EUR/USD",
                                  "risk_monitor": "ECB dovish tilt vs sticky US inflation"},
                     "articles": [
                        {"id": "A1", "title": "ECB holds", "content": "The ECB held rates and signalled cuts."},
                        {"id": "A2", "title": "EU growth", "content": "Eurozone PMI fell to 46."}
                     ],
                     "connections": [{"id": "fed_policy", "relation": "INFLUENCED_BY"},
                                     {"id": "china_stimulus", "relation": "AFFECTED_BY"}]},
                    {"id": "fed_policy", "name": "Fed Policy",
                     "sections": {"executive_summary": "Fed on hold"},
                     "articles": [
                        {"id": "B1", "title": "Fed minutes", "content": "Officials see no cuts this year."},
                        {"id": "B2", "title": "US CPI", "content": "Core CPI rose 0.4% m/m."}
                     ],
                     "connections": [{"id": "eurusd", "relation": "AFFECTS"}]},
                    {"id": "china_stimulus", "name": "China Stimulus"}
                ],
                "strategies": {"s1": ["eurusd"], "empty": []}
            }))
            .unwrap(),
        )
    }

    fn call(tool_call: serde_json::Value) -> String {
        json!({"thinking": "next step", "tool_call": tool_call}).to_string()
    }

    fn save_two(a: &str, b: &str) -> String {
        call(json!({"tool": "save_excerpt", "saves": [
            {"source_id": a, "excerpt": format!("quote from {}", a), "why_relevant": "links the chain"},
            {"source_id": b, "excerpt": format!("quote from {}", b), "why_relevant": "links the chain"}
        ]}))
    }

    fn draft(headline: &str, rationale: &str) -> String {
        call(json!({"tool": "draft_finding", "headline": headline, "rationale": rationale,
                    "flow_path": "fed_policy -> eurusd -> eu_exporters"}))
    }

    const MID_FEEDBACK: &str =
        r#"{"feedback": {"quality_score": 0.7, "verdict": "ready_to_finish", "reasoning": "chain holds"}}"#;

    fn orchestrator(
        agent: Arc<ScriptedLlmClient>,
        mid: Arc<ScriptedLlmClient>,
        findings: Arc<FindingsStore>,
    ) -> Orchestrator {
        let registry = ClientRegistry::single(agent).with_tier(ModelTier::Medium, mid);
        Orchestrator::new(
            &registry,
            graph(),
            findings,
            ExplorationSection::default(),
            PromptSet::builtin(),
        )
    }

    #[tokio::test]
    async fn test_two_reads_two_saves_then_draft_succeeds() {
        let agent = Arc::new(ScriptedLlmClient::new([
            call(json!({"tool": "read_articles", "limit": 2})),
            save_two("art_A1", "art_A2"),
            call(json!({"tool": "read_articles", "topic_id": "fed_policy", "limit": 2})),
            save_two("art_B1", "art_B2"),
            draft(
                "Hawkish Fed vs easing ECB squeezes EUR",
                "Fed holds (art_B1, art_B2) while the ECB eases (art_A1) into weak growth (art_A2).",
            ),
            call(json!({"tool": "finish"})),
        ]));
        let mid = Arc::new(ScriptedLlmClient::new([MID_FEEDBACK]));
        let orch = orchestrator(agent.clone(), mid.clone(), Arc::new(FindingsStore::in_memory()));

        let opts = ExploreOptions {
            max_steps: Some(5),
            skip_critic: true,
        };
        let outcome = orch.explore("eurusd", ExplorationMode::Risk, &opts).await;

        assert!(outcome.result.success);
        assert_eq!(outcome.result.evidence.len(), 4);
        assert!(outcome.result.steps_taken <= 5);
        assert!(outcome.verdict.is_none());
        assert_eq!(mid.call_count(), 1);

        // 第 4 步的读取清掉了 A1/A2 的临时内容
        let step4 = agent.call(3).unwrap();
        assert!(!step4.iter().any(|m| m.msg_id.as_deref() == Some("art_A1")));
        let step3 = agent.call(2).unwrap();
        assert!(step3.iter().any(|m| m.msg_id.as_deref() == Some("art_A1")));
    }

    #[tokio::test]
    async fn test_draft_citing_unsaved_source_is_rejected() {
        let g = graph();
        let start = g.get_topic_snapshot("eurusd").await.unwrap().unwrap();
        let agent = Arc::new(ScriptedLlmClient::new([
            draft("Ghost finding", "Something happened (art_ZZ9)."),
            call(json!({"tool": "think", "thought": "need evidence"})),
            call(json!({"tool": "read_articles"})),
        ]));
        let mid = Arc::new(ScriptedLlmClient::default());
        let exec = ToolExecutor::new(g, MidCritic::new(mid.clone(), "{headline}"), ReadLimits::default());
        let agent_loop = AgentLoop::new(agent.clone(), exec, "system");
        let mut state = ExplorationState::new("eurusd", ExplorationMode::Risk, start, 3);

        let result = agent_loop.run(&mut state).await;

        assert!(!result.success);
        assert_eq!(result.steps_taken, 3);
        assert!(state.draft_finding.is_none());
        assert_eq!(mid.call_count(), 0);
        let second = agent.call(1).unwrap();
        let rejection = second
            .iter()
            .find(|m| m.msg_id.as_deref() == Some("missing_citations_1"))
            .unwrap();
        assert!(rejection.content.contains("art_ZZ9: NOT loaded"));
        assert!(second
            .iter()
            .any(|m| m.content.starts_with("EXPLORATION STEP 2/3")));
    }

    fn save_one(id: &str, excerpt: &str) -> String {
        call(json!({"tool": "save_excerpt", "saves": [
            {"source_id": id, "excerpt": excerpt, "why_relevant": "links the chain"}
        ]}))
    }

    #[tokio::test]
    async fn test_connected_topic_evidence_reaches_final_critic() {
        let agent = Arc::new(ScriptedLlmClient::new([
            call(json!({"tool": "read_articles", "topic_id": "fed_policy", "limit": 1})),
            save_one("art_B1", "no cuts"),
            call(json!({"tool": "read_section", "topic_id": "fed_policy", "section": "executive_summary"})),
            save_one("sec_fed_policy_executive_summary", "on hold"),
            draft(
                "Fed on hold keeps EUR capped",
                "The Fed rules out cuts (art_B1) and stays put (sec_fed_policy_executive_summary).",
            ),
            call(json!({"tool": "finish"})),
            r#"{"verdict": {"accepted": true, "confidence": 0.7, "reasoning": "sourced"}}"#.to_string(),
        ]));
        let mid = Arc::new(ScriptedLlmClient::new([MID_FEEDBACK]));
        let orch = orchestrator(agent.clone(), mid, Arc::new(FindingsStore::in_memory()));

        let outcome = orch
            .explore("eurusd", ExplorationMode::Risk, &ExploreOptions { max_steps: Some(8), skip_critic: false })
            .await;

        assert!(outcome.verdict.unwrap().accepted);
        assert!(outcome.result.evidence.iter().all(|e| e.saved_at_topic == "fed_policy"));
        let critic_prompt = &agent.last_call().unwrap()[0].content;
        assert!(critic_prompt.contains("### art_B1\nOfficials see no cuts this year."));
        assert!(critic_prompt.contains("### sec_fed_policy_executive_summary\nFed on hold"));
    }

    fn existing(headline: &str, confidence: ConfidenceBucket, sources: usize) -> NewFinding {
        NewFinding {
            headline: headline.to_string(),
            rationale: "prior".to_string(),
            flow_path: FlowPath::parse("a -> b"),
            evidence: (0..sources)
                .map(|i| SavedExcerpt {
                    excerpt: "old".to_string(),
                    source_id: format!("art_old_{}_{}", headline.len(), i),
                    source_type: SourceType::Article,
                    why_relevant: "old".to_string(),
                    saved_at_topic: "eurusd".to_string(),
                    saved_at_step: 1,
                })
                .collect(),
            confidence,
            steps_taken: 6,
        }
    }

    #[tokio::test]
    async fn test_accepted_finding_replaces_weakest_at_capacity() {
        let store = Arc::new(FindingsStore::in_memory());
        let key = FindingsKey::new("eurusd", ExplorationMode::Risk);
        for f in [
            existing("Oil shock widens trade deficit", ConfidenceBucket::High, 3),
            existing("Italian spreads blow out", ConfidenceBucket::Medium, 2),
            existing("Weak tourism season", ConfidenceBucket::Low, 1),
        ] {
            store.save(&key, f, None).await.unwrap();
        }

        let agent = Arc::new(ScriptedLlmClient::new([
            call(json!({"tool": "read_articles", "limit": 2})),
            save_two("art_A1", "art_A2"),
            draft(
                "ECB easing into recession pressures EUR",
                "The ECB signals cuts (art_A1) as PMI collapses (art_A2).",
            ),
            call(json!({"tool": "finish"})),
            r#"{"thinking": "solid", "verdict": {"accepted": true, "confidence": 0.85, "reasoning": "well sourced", "replaces": null, "rejection_reasons": []}}"#.to_string(),
        ]));
        let mid = Arc::new(ScriptedLlmClient::new([MID_FEEDBACK]));
        let orch = orchestrator(agent.clone(), mid, store.clone());

        let outcome = orch
            .explore("eurusd", ExplorationMode::Risk, &ExploreOptions { max_steps: Some(8), skip_critic: false })
            .await;

        let verdict = outcome.verdict.unwrap();
        assert!(verdict.accepted);
        assert_eq!(verdict.replaces, Some(3));
        assert!(!outcome.retried);
        assert!(outcome.saved_finding_id.is_some());

        let stored = store.get(&key).await.unwrap();
        assert_eq!(stored.len(), 3);
        assert!(!stored.iter().any(|f| f.headline == "Weak tourism season"));
        assert_eq!(stored[2].headline, "ECB easing into recession pressures EUR");
        assert_eq!(stored[2].confidence, ConfidenceBucket::High);
        assert_eq!(stored[2].flow_path.to_string(), "fed policy → eurusd → eu exporters");
        assert_eq!(agent.remaining(), 0);
    }

    #[tokio::test]
    async fn test_second_rejection_ends_without_more_retries() {
        let rejection = r#"{"verdict": {"accepted": false, "confidence": 0.3, "reasoning": "chain too thin", "rejection_reasons": ["missing transmission step"]}}"#;
        let agent = Arc::new(ScriptedLlmClient::new([
            call(json!({"tool": "read_articles", "limit": 2})),
            save_two("art_A1", "art_A2"),
            draft("ECB cuts hit EUR", "ECB cuts (art_A1) amid weak PMI (art_A2)."),
            call(json!({"tool": "finish"})),
            rejection.to_string(),
            draft("ECB cuts hit EUR via yields", "ECB cuts (art_A1) lower yields amid weak PMI (art_A2)."),
            call(json!({"tool": "finish"})),
            rejection.to_string(),
        ]));
        let mid = Arc::new(ScriptedLlmClient::new([MID_FEEDBACK]));
        let store = Arc::new(FindingsStore::in_memory());
        let orch = orchestrator(agent.clone(), mid.clone(), store.clone());

        let outcome = orch
            .explore("eurusd", ExplorationMode::Risk, &ExploreOptions { max_steps: Some(6), skip_critic: false })
            .await;

        let verdict = outcome.verdict.unwrap();
        assert!(!verdict.accepted);
        assert!(!verdict.rejection_reasons.is_empty());
        assert!(outcome.retried);
        assert!(outcome.saved_finding_id.is_none());
        assert_eq!(agent.remaining(), 0);
        assert_eq!(agent.call_count(), 8);
        assert_eq!(mid.call_count(), 1);
        assert_eq!(outcome.result.headline, "ECB cuts hit EUR via yields");

        // 续跑时看到了终审理由
        let resumed = agent.call(5).unwrap();
        assert!(resumed
            .iter()
            .any(|m| m.content.contains("missing transmission step")));
        let key = FindingsKey::new("eurusd", ExplorationMode::Risk);
        assert!(store.get(&key).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_strategy_without_topics_does_not_run() {
        let agent = Arc::new(ScriptedLlmClient::default());
        let orch = orchestrator(agent.clone(), Arc::new(ScriptedLlmClient::default()), Arc::new(FindingsStore::in_memory()));
        let outcome = orch
            .explore_strategy("empty", ExplorationMode::Opportunity, &ExploreOptions::default())
            .await;
        assert!(!outcome.result.success);
        assert!(outcome.result.error.unwrap().contains("no mapped topics"));
        assert_eq!(agent.call_count(), 0);
    }

    #[tokio::test]
    async fn test_strategy_findings_keyed_by_strategy() {
        let agent = Arc::new(ScriptedLlmClient::new([
            call(json!({"tool": "read_section", "section": "risk_monitor"})),
            call(json!({"tool": "save_excerpt", "saves": [
                {"source_id": "sec_eurusd_risk_monitor", "excerpt": "ECB dovish tilt", "why_relevant": "policy gap"}
            ]})),
            call(json!({"tool": "move_to_topic", "topic_id": "fed_policy", "reason": "follow policy"})),
            call(json!({"tool": "read_articles", "limit": 1})),
            call(json!({"tool": "save_excerpt", "saves": [
                {"source_id": "art_B1", "excerpt": "no cuts this year", "why_relevant": "hawkish"}
            ]})),
            draft("Policy divergence widens", "ECB dovish (sec_eurusd_risk_monitor) vs hawkish Fed (art_B1)."),
            call(json!({"tool": "finish"})),
            r#"{"verdict": {"accepted": true, "confidence": "medium", "reasoning": "ok"}}"#.to_string(),
        ]));
        let store = Arc::new(FindingsStore::in_memory());
        let orch = orchestrator(agent, Arc::new(ScriptedLlmClient::new([MID_FEEDBACK])), store.clone());

        let outcome = orch
            .explore_strategy("s1", ExplorationMode::Opportunity, &ExploreOptions { max_steps: Some(10), skip_critic: false })
            .await;

        assert!(outcome.result.success);
        assert_eq!(outcome.result.strategy_id.as_deref(), Some("s1"));
        assert_eq!(outcome.result.evidence[1].saved_at_topic, "fed_policy");
        let stored = store
            .get(&FindingsKey::new("strategy:s1", ExplorationMode::Opportunity))
            .await
            .unwrap();
        assert_eq!(stored.len(), 1);
        assert_eq!(stored[0].confidence, ConfidenceBucket::Medium);
        assert!(stored[0].id.starts_with("opportunity_"));
    }
}
