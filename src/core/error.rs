//! Agent 错误类型与恢复动作
//!
//! 与 RecoveryEngine 配合：根据 AgentError 决定 RetryWithPrompt（格式提醒，本轮仍计步）或 Abort（终止本次探索）。

use thiserror::Error;

use crate::graph::ContentError;
use crate::llm::LlmError;

/// 探索循环内的错误：回复解析、推理引擎、内容读取
#[derive(Error, Debug)]
pub enum AgentError {
    #[error("JSON parse error: {0}")]
    JsonParseError(String),

    #[error("LLM error: {0}")]
    LlmError(#[from] LlmError),

    #[error("Content provider error: {0}")]
    Content(#[from] ContentError),
}

/// 恢复引擎根据错误类型给出的建议动作
#[derive(Debug, Clone)]
pub enum RecoveryAction {
    /// 将提示注入下一轮，让 LLM 重试（如 JSON 格式错误）
    RetryWithPrompt(String),
    /// 终止当前探索
    Abort,
}
