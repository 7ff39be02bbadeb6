//! 脚本化 LLM 客户端（用于测试与离线运行，无需 API）
//!
//! 按顺序弹出预置回复，并记录每次调用收到的消息，便于断言上下文构造与剪枝行为。

use std::collections::VecDeque;
use std::sync::Mutex;

use async_trait::async_trait;

use crate::llm::{LlmClient, LlmError};
use crate::memory::Message;

/// 脚本客户端：回复用完后返回不可重试的 Api 错误
#[derive(Debug, Default)]
pub struct ScriptedLlmClient {
    script: Mutex<VecDeque<Result<String, LlmError>>>,
    calls: Mutex<Vec<Vec<Message>>>,
}

impl ScriptedLlmClient {
    pub fn new<I, S>(responses: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self::from_results(responses.into_iter().map(|r| Ok(r.into())))
    }

    pub fn from_results(results: impl IntoIterator<Item = Result<String, LlmError>>) -> Self {
        Self {
            script: Mutex::new(results.into_iter().collect()),
            calls: Mutex::new(Vec::new()),
        }
    }

    pub fn call_count(&self) -> usize {
        self.calls.lock().map(|c| c.len()).unwrap_or(0)
    }

    /// 第 idx 次调用时收到的完整消息列表
    pub fn call(&self, idx: usize) -> Option<Vec<Message>> {
        self.calls.lock().ok().and_then(|c| c.get(idx).cloned())
    }

    pub fn last_call(&self) -> Option<Vec<Message>> {
        self.calls.lock().ok().and_then(|c| c.last().cloned())
    }

    pub fn remaining(&self) -> usize {
        self.script.lock().map(|s| s.len()).unwrap_or(0)
    }
}

#[async_trait]
impl LlmClient for ScriptedLlmClient {
    async fn complete(&self, messages: &[Message]) -> Result<String, LlmError> {
        if let Ok(mut calls) = self.calls.lock() {
            calls.push(messages.to_vec());
        }
        let next = self.script.lock().ok().and_then(|mut s| s.pop_front());
        next.unwrap_or_else(|| {
            Err(LlmError::Api {
                status: None,
                message: "no scripted response left (no reasoning engine configured?)".to_string(),
            })
        })
    }
}
