//! 分档客户端注册表
//!
//! 启动时按配置一次性构建 simple / medium / complex 三档客户端，之后以 Arc 传给探索循环与评审器；
//! 不存在进程级缓存。每个客户端都包一层 RetryingLlmClient。

use std::collections::HashMap;
use std::sync::Arc;

use serde::Deserialize;

use crate::config::AppConfig;
use crate::llm::{
    create_deepseek_client, LlmClient, OpenAiClient, RetryingLlmClient, ScriptedLlmClient,
    DEEPSEEK_CHAT, DEEPSEEK_REASONER,
};

/// 模型档位
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ModelTier {
    Simple,
    Medium,
    Complex,
}

impl ModelTier {
    pub const ALL: [ModelTier; 3] = [ModelTier::Simple, ModelTier::Medium, ModelTier::Complex];

    pub fn as_str(&self) -> &'static str {
        match self {
            ModelTier::Simple => "simple",
            ModelTier::Medium => "medium",
            ModelTier::Complex => "complex",
        }
    }
}

/// 档位 → 客户端；缺失档位回退到 fallback
#[derive(Clone)]
pub struct ClientRegistry {
    clients: HashMap<ModelTier, Arc<dyn LlmClient>>,
    fallback: Arc<dyn LlmClient>,
}

impl ClientRegistry {
    /// 所有档位共用一个客户端（测试常用）
    pub fn single(client: Arc<dyn LlmClient>) -> Self {
        Self {
            clients: HashMap::new(),
            fallback: client,
        }
    }

    pub fn with_tier(mut self, tier: ModelTier, client: Arc<dyn LlmClient>) -> Self {
        self.clients.insert(tier, client);
        self
    }

    pub fn get(&self, tier: ModelTier) -> Arc<dyn LlmClient> {
        self.clients
            .get(&tier)
            .cloned()
            .unwrap_or_else(|| self.fallback.clone())
    }

    /// 各档累计 token（prompt, completion, total）
    pub fn token_usage(&self) -> (u64, u64, u64) {
        let mut seen: Vec<*const ()> = Vec::new();
        let mut total = (0, 0, 0);
        let all = self
            .clients
            .values()
            .chain(std::iter::once(&self.fallback));
        for c in all {
            let ptr = Arc::as_ptr(c) as *const ();
            if seen.contains(&ptr) {
                continue;
            }
            seen.push(ptr);
            let (p, cpl, t) = c.token_usage();
            total = (total.0 + p, total.1 + cpl, total.2 + t);
        }
        total
    }

    /// 根据配置与环境变量构建注册表
    ///
    /// 有 DEEPSEEK_API_KEY（或 provider=deepseek 且仅有 OPENAI_API_KEY）走 DeepSeek 端点；
    /// 有 OPENAI_API_KEY 且 provider 非 deepseek 走 OpenAI 兼容端点；都没有时使用空脚本客户端，
    /// 首次调用即失败并给出明确错误。
    pub fn from_config(cfg: &AppConfig) -> Self {
        let provider = cfg.llm.provider.to_lowercase();
        let use_deepseek = std::env::var("DEEPSEEK_API_KEY").is_ok()
            || (provider == "deepseek" && std::env::var("OPENAI_API_KEY").is_ok());
        let use_openai = std::env::var("OPENAI_API_KEY").is_ok() && provider != "deepseek";
        let retry = cfg.llm_retry();

        let build = |tier: ModelTier| -> Option<Arc<dyn LlmClient>> {
            let configured = match tier {
                ModelTier::Simple => cfg.llm.tiers.simple.clone(),
                ModelTier::Medium => cfg.llm.tiers.medium.clone(),
                ModelTier::Complex => cfg.llm.tiers.complex.clone(),
            };
            let base: Arc<dyn LlmClient> = if use_deepseek {
                let model = configured.unwrap_or_else(|| match tier {
                    ModelTier::Complex => DEEPSEEK_REASONER.to_string(),
                    _ => DEEPSEEK_CHAT.to_string(),
                });
                tracing::info!(tier = tier.as_str(), model = %model, "Using DeepSeek LLM");
                Arc::new(create_deepseek_client(Some(&model)))
            } else if use_openai {
                let model = configured.unwrap_or_else(|| match tier {
                    ModelTier::Complex => "gpt-4o".to_string(),
                    _ => "gpt-4o-mini".to_string(),
                });
                tracing::info!(tier = tier.as_str(), model = %model, "Using OpenAI LLM");
                Arc::new(OpenAiClient::new(
                    cfg.llm.base_url.as_deref(),
                    &model,
                    std::env::var("OPENAI_API_KEY").ok().as_deref(),
                ))
            } else {
                return None;
            };
            Some(Arc::new(RetryingLlmClient::new(base, retry.clone())))
        };

        let mut clients = HashMap::new();
        for tier in ModelTier::ALL {
            if let Some(c) = build(tier) {
                clients.insert(tier, c);
            }
        }

        let fallback: Arc<dyn LlmClient> = match clients.get(&ModelTier::Medium) {
            Some(c) => c.clone(),
            None => {
                tracing::warn!("No API key set or provider unknown, no reasoning engine available");
                Arc::new(ScriptedLlmClient::default())
            }
        };
        Self { clients, fallback }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::Message;

    #[tokio::test]
    async fn test_tier_falls_back_to_default() {
        let medium = Arc::new(ScriptedLlmClient::new(["medium"]));
        let default = Arc::new(ScriptedLlmClient::new(["default"]));
        let reg = ClientRegistry::single(default).with_tier(ModelTier::Medium, medium);
        let msgs = [Message::user("x")];
        assert_eq!(reg.get(ModelTier::Medium).complete(&msgs).await.unwrap(), "medium");
        assert_eq!(reg.get(ModelTier::Complex).complete(&msgs).await.unwrap(), "default");
    }
}
