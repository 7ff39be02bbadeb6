//! LLM 层：客户端抽象与实现（OpenAI 兼容 / DeepSeek / Scripted）与分档注册表

pub mod deepseek;
pub mod mock;
pub mod openai;
pub mod registry;
pub mod traits;

pub use deepseek::{create_deepseek_client, DEEPSEEK_BASE_URL, DEEPSEEK_CHAT, DEEPSEEK_REASONER};
pub use mock::ScriptedLlmClient;
pub use openai::{OpenAiClient, TokenUsage};
pub use registry::{ClientRegistry, ModelTier};
pub use traits::{LlmClient, LlmError, RetryingLlmClient};
pub use crate::core::RetryConfig;
