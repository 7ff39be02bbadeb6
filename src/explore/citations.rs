//! 草稿引用校验：正文中每个括号引用都必须对应一条已保存摘录
//!
//! `(art_…)` / `(sec_…)` 以外、但形似 id 的括号内容（如 `(fed_policy)`、`(A1)`）同样视为引用，
//! 由于不可能被保存，总会被报告为缺失，而不是被静默忽略。

use std::collections::BTreeSet;
use std::sync::OnceLock;

use regex::Regex;

use crate::explore::state::SavedExcerpt;

static GROUP_RE: OnceLock<Regex> = OnceLock::new();
static ID_SHAPED_RE: OnceLock<Regex> = OnceLock::new();

/// 单个无空白的标识符，且含下划线或数字，并至少有一个字母
fn is_id_shaped(part: &str) -> bool {
    let re = ID_SHAPED_RE.get_or_init(|| Regex::new(r"^[A-Za-z0-9][A-Za-z0-9_\-.]*$").unwrap());
    re.is_match(part)
        && part.chars().any(|c| c.is_ascii_alphabetic())
        && part.chars().any(|c| c == '_' || c.is_ascii_digit())
}

/// 提取正文中括号内引用的 id（原样，不做修剪）；括号内可用逗号 / 分号列出多个
pub fn extract(text: &str) -> BTreeSet<String> {
    let group = GROUP_RE.get_or_init(|| Regex::new(r"\(([^()]*)\)").unwrap());
    group
        .captures_iter(text)
        .filter_map(|c| c.get(1))
        .flat_map(|m| m.as_str().split([',', ';']))
        .map(str::trim)
        .filter(|part| is_id_shaped(part))
        .map(str::to_string)
        .collect()
}

/// 引用了但未保存的来源 id；为空即校验通过
pub fn check(rationale: &str, saved: &[SavedExcerpt]) -> BTreeSet<String> {
    let saved_ids: BTreeSet<&str> = saved.iter().map(|e| e.source_id.as_str()).collect();
    extract(rationale)
        .into_iter()
        .filter(|id| !saved_ids.contains(id.as_str()))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::explore::state::SourceType;

    fn saved(id: &str) -> SavedExcerpt {
        SavedExcerpt {
            excerpt: "x".to_string(),
            source_id: id.to_string(),
            source_type: SourceType::from_source_id(id).unwrap_or(SourceType::Article),
            why_relevant: String::new(),
            saved_at_topic: "eurusd".to_string(),
            saved_at_step: 1,
        }
    }

    #[test]
    fn test_extract_single_and_lists() {
        let ids = extract("ECB holds (art_A1). Fed cuts (art_B2, sec_fed_policy_risk_monitor; art_C3).");
        let expected: BTreeSet<String> = ["art_A1", "art_B2", "art_C3", "sec_fed_policy_risk_monitor"]
            .iter()
            .map(|s| s.to_string())
            .collect();
        assert_eq!(ids, expected);
    }

    #[test]
    fn test_extract_ignores_prose_parentheses() {
        assert!(extract("Rates (as expected) rose (see art_A1 below)").is_empty());
    }

    #[test]
    fn test_unprefixed_ids_are_reported_missing() {
        let missing = check(
            "Fed stays hawkish (fed_policy) and ECB holds (A1) while EUR slides (art_A2).",
            &[saved("art_A2")],
        );
        let expected: BTreeSet<String> = ["A1", "fed_policy"].iter().map(|s| s.to_string()).collect();
        assert_eq!(missing, expected);
        assert!(extract("Dollar (USD) peaked (2024) as expected (e.g. Fed)").is_empty());
    }

    #[test]
    fn test_ids_are_not_trimmed() {
        let missing = check("ECB holds (art_A1.)", &[saved("art_A1")]);
        assert_eq!(missing.into_iter().collect::<Vec<_>>(), vec!["art_A1.".to_string()]);
    }

    #[test]
    fn test_check_reports_unsaved() {
        let missing = check("A (art_A1) B (art_B2)", &[saved("art_A1")]);
        assert_eq!(missing.into_iter().collect::<Vec<_>>(), vec!["art_B2".to_string()]);
        assert!(check("no citations at all", &[]).is_empty());
    }
}
