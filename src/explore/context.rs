//! 每轮上下文块与收敛提示
//!
//! build_step_context 每步生成一条不可剪枝的 user 消息：当前位置、简报、相邻话题、已保存摘录、
//! 访问路径、草稿与收敛提示。提示强度随剩余步数与摘录数量增强。

use std::collections::BTreeMap;
use std::fmt::Write as _;

use crate::explore::state::{ExplorationMode, ExplorationState};
use crate::graph::{ContentError, ContentProvider, TopicSnapshot};

/// 收敛压力消息的固定 id（每步替换）
pub const CONVERGENCE_PRESSURE_ID: &str = "convergence_pressure";

const BRIEFING_PREVIEW_CHARS: usize = 500;
const BRIEFING_FOCUS_SECTIONS: usize = 2;
const CONNECTIONS_PER_RELATION: usize = 10;
const EXCERPT_PREVIEW_CHARS: usize = 100;
const WHY_PREVIEW_CHARS: usize = 80;

/// 按字符截断，超长时追加 suffix
pub fn truncate_chars(text: &str, max: usize, suffix: &str) -> String {
    if text.chars().count() <= max {
        text.to_string()
    } else {
        let cut: String = text.chars().take(max).collect();
        format!("{}{}", cut, suffix)
    }
}

/// 步数进度百分比
fn progress_pct(step: u32, max_steps: u32) -> u32 {
    if max_steps == 0 {
        100
    } else {
        step.saturating_mul(100) / max_steps
    }
}

/// 根据进度与证据量给出收敛提示；无需提示时返回 None
pub fn convergence_hint(
    step: u32,
    max_steps: u32,
    excerpts: usize,
    has_draft: bool,
    has_temp_content: bool,
) -> Option<String> {
    let remaining = max_steps.saturating_sub(step);
    let pct = progress_pct(step, max_steps);

    if has_temp_content && !has_draft {
        return Some(
            "You have content loaded. Save the relevant parts with save_excerpt NOW, \
             before any other tool clears it."
                .to_string(),
        );
    }
    if has_draft {
        return Some(
            "A draft exists. Call finish to submit it, or revise it with draft_finding if the critic asked for changes."
                .to_string(),
        );
    }
    if remaining <= 2 {
        return Some(if excerpts >= 2 {
            format!(
                "FINAL CHANCE: {} step(s) left. Call draft_finding now using your {} saved excerpts.",
                remaining, excerpts
            )
        } else {
            format!(
                "FINAL CHANCE: {} step(s) left and only {} excerpt(s) saved. Read and save at least two sources now.",
                remaining, excerpts
            )
        });
    }
    if pct >= 50 {
        return Some(if excerpts >= 2 {
            "Past the halfway mark. Draft your finding now with draft_finding.".to_string()
        } else {
            "Past the halfway mark with fewer than two excerpts. Read and save two sources now.".to_string()
        });
    }
    if remaining <= 3 {
        return Some(format!("Only {} steps remain. Start converging on a finding.", remaining));
    }
    if pct >= 40 && excerpts >= 2 {
        return Some(format!(
            "You have {} excerpts. Consider whether the chain is complete enough to draft.",
            excerpts
        ));
    }
    if pct >= 25 {
        return match excerpts {
            0 => Some("No excerpts saved yet. Read a section or articles and save the evidence you need.".to_string()),
            1 => Some("One excerpt saved. Find at least one more source to support the chain.".to_string()),
            _ => None,
        };
    }
    None
}

/// 无草稿时的收敛压力消息（步数过半且证据不足，或接近尾声且证据充足）
pub fn convergence_pressure(state: &ExplorationState) -> Option<String> {
    if state.draft_finding.is_some() {
        return None;
    }
    let pct = progress_pct(state.step_count, state.max_steps);
    let saved = state.saved_excerpts.len();
    if pct >= 65 && saved >= 2 {
        Some(format!(
            "HARD STOP: step {}/{} with {} excerpts saved and no draft. Your next call MUST be draft_finding.",
            state.step_count, state.max_steps, saved
        ))
    } else if pct >= 50 && saved < 2 {
        Some(format!(
            "WARNING: step {}/{} with only {} excerpt(s). Stop wandering: read and save evidence on this topic.",
            state.step_count, state.max_steps, saved
        ))
    } else {
        None
    }
}

/// 话题简报：执行摘要 + 当前模式的前两个重点章节预览
pub async fn build_briefing(
    content: &dyn ContentProvider,
    topic: &TopicSnapshot,
    mode: ExplorationMode,
) -> Result<String, ContentError> {
    let mut out = String::new();
    if let Some(summary) = &topic.executive_summary {
        let _ = writeln!(out, "Executive summary:\n{}\n", summary.trim());
    }
    for section in mode.focus_sections().iter().take(BRIEFING_FOCUS_SECTIONS) {
        if let Some(text) = content.read_section(&topic.id, section).await? {
            let _ = writeln!(
                out,
                "{} (preview):\n{}\n",
                section,
                truncate_chars(text.trim(), BRIEFING_PREVIEW_CHARS, "...")
            );
        }
    }
    Ok(out.trim_end().to_string())
}

/// 相邻话题按关系分组，每组至多 10 个
pub fn format_connections(topic: &TopicSnapshot) -> String {
    if topic.connected_topics.is_empty() {
        return "(no connected topics)".to_string();
    }
    let mut by_relation: BTreeMap<&str, Vec<String>> = BTreeMap::new();
    for c in &topic.connected_topics {
        by_relation
            .entry(c.relation.as_str())
            .or_default()
            .push(format!("{} ({})", c.id, c.name));
    }
    let mut out = String::new();
    for (relation, ids) in by_relation {
        let shown: Vec<&str> = ids.iter().take(CONNECTIONS_PER_RELATION).map(String::as_str).collect();
        let _ = write!(out, "  {}: {}", relation, shown.join(", "));
        if ids.len() > CONNECTIONS_PER_RELATION {
            let _ = write!(out, " ... and {} more", ids.len() - CONNECTIONS_PER_RELATION);
        }
        out.push('\n');
    }
    out.trim_end().to_string()
}

/// 生成本步上下文
pub fn build_step_context(state: &ExplorationState) -> String {
    let mut out = String::new();
    let _ = writeln!(out, "EXPLORATION STEP {}/{}", state.step_count, state.max_steps);
    if let Some(hint) = convergence_hint(
        state.step_count,
        state.max_steps,
        state.saved_excerpts.len(),
        state.draft_finding.is_some(),
        !state.temp_content_ids.is_empty(),
    ) {
        let _ = writeln!(out, "HINT: {}", hint);
    }
    let _ = writeln!(out, "\nTarget: {} | Mode: {}", state.target_id, state.mode);
    if let Some(strategy) = &state.strategy_id {
        let _ = writeln!(out, "Strategy: {}", strategy);
    }
    let _ = writeln!(
        out,
        "Current location: {} (id: {})",
        state.current_topic.name, state.current_topic.id
    );

    if !state.topic_briefing.is_empty() {
        let _ = writeln!(out, "\n## Topic briefing\n{}", state.topic_briefing);
    }
    if !state.existing_headlines.is_empty() {
        let _ = writeln!(out, "\n## Existing findings (don't duplicate)");
        for h in &state.existing_headlines {
            let _ = writeln!(out, "- {}", h);
        }
    }

    let _ = writeln!(out, "\n## Connected topics\n{}", format_connections(&state.current_topic));

    let _ = writeln!(out, "\n## Saved excerpts ({})", state.saved_excerpts.len());
    if state.saved_excerpts.is_empty() {
        let _ = writeln!(out, "(none yet)");
    }
    for e in &state.saved_excerpts {
        let _ = writeln!(
            out,
            "- [{}] \"{}\" | why: {}",
            e.source_id,
            truncate_chars(&e.excerpt, EXCERPT_PREVIEW_CHARS, "..."),
            truncate_chars(&e.why_relevant, WHY_PREVIEW_CHARS, "...")
        );
    }

    let _ = writeln!(out, "\nVisited: {}", state.visited_topics.join(" → "));

    if let Some(draft) = &state.draft_finding {
        let _ = writeln!(
            out,
            "\n## Current draft\nHeadline: {}\nFlow path: {}",
            draft.headline, draft.flow_path
        );
    }
    if !state.temp_content_ids.is_empty() {
        let ids: Vec<&str> = state.temp_content_ids.keys().map(String::as_str).collect();
        let _ = writeln!(
            out,
            "\nLOADED (temporary, cleared by any tool except save_excerpt): {}",
            ids.join(", ")
        );
    }

    let _ = write!(out, "\nWhat do you want to do next? Output your decision as JSON.");
    out
}
