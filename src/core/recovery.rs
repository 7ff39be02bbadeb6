//! 错误恢复引擎
//!
//! 根据 AgentError 类型返回 RecoveryAction：格式错误 -> 注入格式提醒继续；
//! 推理引擎 / 内容读取在重试预算耗尽后仍失败 -> 终止本次探索。

use crate::core::{AgentError, RecoveryAction};
use crate::explore::protocol::TOOL_TABLE;

/// 格式提醒消息的固定 id（新的提醒会替换旧的，避免堆积）
pub const FORMAT_REMINDER_ID: &str = "format_reminder";

/// 语义化错误恢复：将错误映射为可执行动作
#[derive(Debug, Default)]
pub struct RecoveryEngine;

impl RecoveryEngine {
    pub fn new() -> Self {
        Self
    }

    pub fn handle(&self, err: &AgentError) -> RecoveryAction {
        match err {
            AgentError::JsonParseError(raw) => RecoveryAction::RetryWithPrompt(format_reminder(raw)),
            // 瞬时错误已在 RetryingLlmClient / RetryingContentProvider 内重试过，到这里即为不可恢复
            AgentError::LlmError(_) | AgentError::Content(_) => RecoveryAction::Abort,
        }
    }
}

fn format_reminder(raw: &str) -> String {
    let tools: Vec<&str> = TOOL_TABLE.iter().map(|(name, _)| *name).collect();
    let sample: String = raw.chars().take(200).collect();
    format!(
        "FORMAT ERROR: your last response could not be parsed ({sample}).\n\n\
         You MUST output ONLY one JSON object of this shape:\n\
         {{\"thinking\": \"your reasoning\", \"tool_call\": {{\"tool\": \"read_articles\", \"limit\": 3}}}}\n\n\
         Available tools: {}\n\
         Output the JSON object and nothing else.",
        tools.join(", ")
    )
}
