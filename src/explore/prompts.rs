//! 提示词加载：config/prompts/{name}.txt（或 prompts_dir）优先，缺失时用内置模板

use std::path::Path;
use std::sync::OnceLock;

use regex::{Captures, Regex};

use crate::explore::protocol::tool_names;
use crate::explore::state::ExplorationMode;

const EXPLORER_FALLBACK: &str = "You are a graph exploration agent looking for a multi-hop {mode} for {target_topic}.\n\
Each turn output ONLY one JSON object: {\"thinking\": \"...\", \"tool_call\": {\"tool\": \"<name>\", ...}}.\n\
Tools: {tools}.\n\
read_section{topic_id?, section} with section one of: {available_sections}.\n\
read_articles{topic_id?, limit}. Loaded content is TEMPORARY: any tool other than save_excerpt clears it.\n\
save_excerpt{saves:[{source_id, excerpt, why_relevant}]} keeps evidence permanently.\n\
move_to_topic{topic_id, reason} follows a connection. think{thought} records reasoning.\n\
draft_finding{headline, rationale, flow_path} must cite every claim as (source_id) using saved excerpts only.\n\
finish{} submits the draft. suggest_link{source_topic, target_topic, relationship_type} is advisory.";

const MID_CRITIC_FALLBACK: &str = "Review this draft finding at step {step}/{max_steps}.\n\
Headline: {headline}\nFlow path: {flow_path}\nRationale:\n{rationale}\n\nSaved evidence:\n{evidence}\n\n\
Check that every claim is cited, citations match the evidence, and the chain has no gaps.\n\
Respond with JSON: {\"feedback\": {\"quality_score\": 0.0-1.0, \"citation_issues\": [], \"chain_gaps\": [], \
\"suggestions\": [], \"verdict\": \"continue_exploring|revise_draft|ready_to_finish\", \"reasoning\": \"...\"}}";

const FINAL_CRITIC_FALLBACK: &str = "You are the final gatekeeper for {mode} findings on {target}.\n\
Check in order: citation completeness, citation accuracy against the source texts, chain validity, \
novelty against existing findings, ranking (with 3 existing findings accept only with replaces = weakest slot).\n\n\
{context}\n\n\
Respond with JSON: {\"thinking\": \"...\", \"verdict\": {\"accepted\": true|false, \"confidence\": 0.0-1.0, \
\"reasoning\": \"...\", \"replaces\": null|1|2|3, \"rejection_reasons\": []}}";

/// 三类提示词模板
#[derive(Debug, Clone)]
pub struct PromptSet {
    pub explorer: String,
    pub mid_critic: String,
    pub final_critic: String,
}

impl PromptSet {
    pub fn builtin() -> Self {
        Self {
            explorer: EXPLORER_FALLBACK.to_string(),
            mid_critic: MID_CRITIC_FALLBACK.to_string(),
            final_critic: FINAL_CRITIC_FALLBACK.to_string(),
        }
    }

    /// prompts_dir 中的 {name}.txt 优先，其次 config/prompts 与 ../config/prompts
    pub fn load(prompts_dir: Option<&Path>) -> Self {
        let builtin = Self::builtin();
        Self {
            explorer: load_one(prompts_dir, "explorer", builtin.explorer),
            mid_critic: load_one(prompts_dir, "mid_critic", builtin.mid_critic),
            final_critic: load_one(prompts_dir, "final_critic", builtin.final_critic),
        }
    }

    /// 探索智能体的 system prompt
    pub fn explorer_system(&self, mode: ExplorationMode, target_topic: &str, sections: &[String]) -> String {
        fill_template(
            &self.explorer,
            &[
                ("mode", mode.as_str()),
                ("target_topic", target_topic),
                ("available_sections", sections.join(", ").as_str()),
                ("tools", tool_names().as_str()),
            ],
        )
    }
}

/// 单遍替换 `{name}` 占位符；代入的值不会再被展开，未知占位符原样保留
pub fn fill_template(template: &str, values: &[(&str, &str)]) -> String {
    static PLACEHOLDER_RE: OnceLock<Regex> = OnceLock::new();
    let re = PLACEHOLDER_RE.get_or_init(|| Regex::new(r"\{([a-z_]+)\}").unwrap());
    re.replace_all(template, |caps: &Captures| {
        values
            .iter()
            .find(|(name, _)| *name == &caps[1])
            .map(|(_, value)| value.to_string())
            .unwrap_or_else(|| caps[0].to_string())
    })
    .into_owned()
}

fn load_one(prompts_dir: Option<&Path>, name: &str, fallback: String) -> String {
    let file = format!("{}.txt", name);
    prompts_dir
        .map(|d| d.join(&file))
        .into_iter()
        .chain([
            Path::new("config/prompts").join(&file),
            Path::new("../config/prompts").join(&file),
        ])
        .find_map(|p| std::fs::read_to_string(p).ok())
        .unwrap_or_else(|| {
            tracing::debug!(prompt = name, "using built-in prompt");
            fallback
        })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_explorer_placeholders_filled() {
        let p = PromptSet::builtin();
        let s = p.explorer_system(ExplorationMode::Opportunity, "eurusd", &["risk_monitor".to_string()]);
        assert!(s.contains("opportunity for eurusd"));
        assert!(s.contains("section one of: risk_monitor"));
        assert!(s.contains("draft_finding, finish"));
        assert!(!s.contains("{tools}"));
    }

    #[test]
    fn test_fill_template_single_pass() {
        let out = fill_template(
            "H: {headline} R: {rationale} {\"keep\": {unknown}}",
            &[("headline", "uses {rationale} literally"), ("rationale", "body")],
        );
        assert_eq!(out, "H: uses {rationale} literally R: body {\"keep\": {unknown}}");
    }

    #[test]
    fn test_prompts_dir_override() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("mid_critic.txt"), "custom {headline}").unwrap();
        let p = PromptSet::load(Some(dir.path()));
        assert_eq!(p.mid_critic, "custom {headline}");
        assert!(p.final_critic.contains("{context}"));
    }
}
