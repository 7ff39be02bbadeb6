//! LLM 客户端抽象
//!
//! 所有后端（OpenAI 兼容 / DeepSeek / Scripted）实现 LlmClient::complete（非流式）。
//! RetryingLlmClient 为任意后端包一层请求超时与瞬时错误重试。

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use thiserror::Error;

use crate::core::{with_retry, RetryConfig, Transient};
use crate::memory::Message;

/// 推理引擎调用错误
#[derive(Error, Debug, Clone)]
pub enum LlmError {
    #[error("request timed out after {0:?}")]
    Timeout(Duration),

    #[error("rate limited (retry after {retry_after_ms} ms)")]
    RateLimited { retry_after_ms: u64 },

    #[error("transport error: {0}")]
    Transport(String),

    #[error("API error (status {status:?}): {message}")]
    Api { status: Option<u16>, message: String },

    #[error("empty response from model")]
    EmptyResponse,

    #[error("invalid request: {0}")]
    Request(String),
}

impl Transient for LlmError {
    fn is_transient(&self) -> bool {
        match self {
            LlmError::Timeout(_)
            | LlmError::RateLimited { .. }
            | LlmError::Transport(_)
            | LlmError::EmptyResponse => true,
            LlmError::Api { status, .. } => status.is_some_and(|s| s >= 500),
            LlmError::Request(_) => false,
        }
    }
}

impl LlmError {
    pub fn is_transient(&self) -> bool {
        Transient::is_transient(self)
    }
}

/// LLM 客户端 trait：非流式完成
#[async_trait]
pub trait LlmClient: Send + Sync {
    /// 非流式完成，返回模型原始文本
    async fn complete(&self, messages: &[Message]) -> Result<String, LlmError>;

    /// 获取累计 token 使用统计：(prompt_tokens, completion_tokens, total_tokens)
    /// 默认返回 (0, 0, 0)，具体实现可覆盖
    fn token_usage(&self) -> (u64, u64, u64) {
        (0, 0, 0)
    }
}

/// 带超时与重试的客户端包装
pub struct RetryingLlmClient {
    inner: Arc<dyn LlmClient>,
    config: RetryConfig,
}

impl RetryingLlmClient {
    pub fn new(inner: Arc<dyn LlmClient>, config: RetryConfig) -> Self {
        Self { inner, config }
    }
}

#[async_trait]
impl LlmClient for RetryingLlmClient {
    async fn complete(&self, messages: &[Message]) -> Result<String, LlmError> {
        let inner = &self.inner;
        // 空回复在重试闭包内判定，与其他瞬时错误一样重试
        with_retry(&self.config, "llm.complete", LlmError::Timeout, move || async move {
            let text = inner.complete(messages).await?;
            if text.trim().is_empty() {
                return Err(LlmError::EmptyResponse);
            }
            Ok(text)
        })
        .await
    }

    fn token_usage(&self) -> (u64, u64, u64) {
        self.inner.token_usage()
    }
}
