//! 应用配置：从 config/default.toml 与环境变量加载
//!
//! 加载顺序：先读 TOML 文件，再用环境变量 `PATHFINDER__*` 覆盖（双下划线表示嵌套，如 `PATHFINDER__LLM__PROVIDER=openai`）。

use std::path::PathBuf;

use serde::Deserialize;

use crate::core::RetryConfig;

/// 应用配置根（对应 config/default.toml 的顶层）
#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct AppConfig {
    pub app: AppSection,
    pub llm: LlmSection,
    pub exploration: ExplorationSection,
    pub content: ContentSection,
    pub findings: FindingsSection,
}

/// [app] 段：应用名、提示词目录
#[derive(Debug, Clone, Deserialize, Default)]
pub struct AppSection {
    pub name: Option<String>,
    /// 提示词覆盖目录（{name}.txt），未设置时用 config/prompts
    pub prompts_dir: Option<PathBuf>,
}

/// [llm] 段：后端选择、分档模型、超时与重试
#[derive(Debug, Clone, Deserialize)]
pub struct LlmSection {
    /// 后端：deepseek / openai；优先级由 API Key 与 provider 共同决定
    #[serde(default = "default_provider")]
    pub provider: String,
    pub base_url: Option<String>,
    #[serde(default)]
    pub tiers: LlmTiersSection,
    #[serde(default)]
    pub timeouts: LlmTimeoutsSection,
    #[serde(default)]
    pub retry: RetrySection,
}

impl Default for LlmSection {
    fn default() -> Self {
        Self {
            provider: default_provider(),
            base_url: None,
            tiers: LlmTiersSection::default(),
            timeouts: LlmTimeoutsSection::default(),
            retry: RetrySection::default(),
        }
    }
}

fn default_provider() -> String {
    "deepseek".to_string()
}

/// [llm.tiers] 段：各档位模型名；未设置的档位回退到 provider 的默认模型
#[derive(Debug, Clone, Deserialize, Default)]
pub struct LlmTiersSection {
    pub simple: Option<String>,
    pub medium: Option<String>,
    pub complex: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct LlmTimeoutsSection {
    #[serde(default = "default_request_timeout")]
    pub request: u64,
}

impl Default for LlmTimeoutsSection {
    fn default() -> Self {
        Self {
            request: default_request_timeout(),
        }
    }
}

fn default_request_timeout() -> u64 {
    60
}

/// [llm.retry] / [content.retry] 段：瞬时错误重试预算
#[derive(Debug, Clone, Deserialize)]
pub struct RetrySection {
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    #[serde(default = "default_base_delay_ms")]
    pub base_delay_ms: u64,
}

impl Default for RetrySection {
    fn default() -> Self {
        Self {
            max_retries: default_max_retries(),
            base_delay_ms: default_base_delay_ms(),
        }
    }
}

fn default_max_retries() -> u32 {
    2
}

fn default_base_delay_ms() -> u64 {
    500
}

/// [exploration] 段：步数预算、读取上限、分析章节
#[derive(Debug, Clone, Deserialize)]
pub struct ExplorationSection {
    #[serde(default = "default_max_steps")]
    pub max_steps: u32,
    /// 终审拒绝后唯一一次重试追加的步数
    #[serde(default = "default_retry_steps")]
    pub retry_steps: u32,
    #[serde(default = "default_max_articles")]
    pub max_articles: usize,
    #[serde(default = "default_section_char_limit")]
    pub section_char_limit: usize,
    #[serde(default = "default_article_char_limit")]
    pub article_char_limit: usize,
    /// 可读取的分析章节名
    #[serde(default = "default_sections")]
    pub sections: Vec<String>,
}

impl Default for ExplorationSection {
    fn default() -> Self {
        Self {
            max_steps: default_max_steps(),
            retry_steps: default_retry_steps(),
            max_articles: default_max_articles(),
            section_char_limit: default_section_char_limit(),
            article_char_limit: default_article_char_limit(),
            sections: default_sections(),
        }
    }
}

fn default_max_steps() -> u32 {
    20
}

fn default_retry_steps() -> u32 {
    5
}

fn default_max_articles() -> usize {
    5
}

fn default_section_char_limit() -> usize {
    4000
}

fn default_article_char_limit() -> usize {
    1500
}

fn default_sections() -> Vec<String> {
    [
        "chain_reaction_map",
        "structural_threats",
        "tactical_scenarios",
        "immediate_intelligence",
        "macro_cascade",
        "trade_intelligence",
        "house_view",
        "risk_monitor",
        "executive_summary",
    ]
    .iter()
    .map(|s| s.to_string())
    .collect()
}

/// [content] 段：内容图来源与读取超时
#[derive(Debug, Clone, Deserialize)]
pub struct ContentSection {
    /// JSON 图文件（CLI --graph 优先）
    pub graph_path: Option<PathBuf>,
    #[serde(default = "default_content_timeout")]
    pub request_timeout: u64,
    #[serde(default)]
    pub retry: RetrySection,
}

impl Default for ContentSection {
    fn default() -> Self {
        Self {
            graph_path: None,
            request_timeout: default_content_timeout(),
            retry: RetrySection::default(),
        }
    }
}

fn default_content_timeout() -> u64 {
    30
}

/// [findings] 段：结果存储根目录
#[derive(Debug, Clone, Deserialize)]
pub struct FindingsSection {
    #[serde(default = "default_findings_root")]
    pub root: PathBuf,
}

impl Default for FindingsSection {
    fn default() -> Self {
        Self {
            root: default_findings_root(),
        }
    }
}

fn default_findings_root() -> PathBuf {
    PathBuf::from("data/findings")
}

impl AppConfig {
    pub fn llm_retry(&self) -> RetryConfig {
        RetryConfig::new(
            self.llm.retry.max_retries,
            self.llm.retry.base_delay_ms,
            self.llm.timeouts.request,
        )
    }

    pub fn content_retry(&self) -> RetryConfig {
        RetryConfig::new(
            self.content.retry.max_retries,
            self.content.retry.base_delay_ms,
            self.content.request_timeout,
        )
    }
}

/// 从 config 目录加载配置，环境变量 PATHFINDER__* 可覆盖
///
/// 1. 按顺序查找 config/default.toml、../config/default.toml，找到则作为第一源
/// 2. 若传入 config_path，则追加该文件（可覆盖前面的键；显式指定的文件必须存在）
/// 3. 最后叠加环境变量 PATHFINDER__*（双下划线表示嵌套键）
pub fn load_config(config_path: Option<PathBuf>) -> Result<AppConfig, config::ConfigError> {
    let mut builder = config::Config::builder();

    for name in ["config/default", "../config/default"] {
        if std::path::Path::new(&format!("{}.toml", name)).exists() {
            builder = builder.add_source(config::File::with_name(name).required(false));
            break;
        }
    }

    if let Some(path) = config_path {
        builder = builder.add_source(config::File::from(path).required(true));
    }

    builder = builder.add_source(
        config::Environment::with_prefix("PATHFINDER")
            .separator("__")
            .try_parsing(true),
    );

    builder.build()?.try_deserialize()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_defaults_without_sections() {
        let cfg = AppConfig::default();
        assert_eq!(cfg.exploration.max_steps, 20);
        assert_eq!(cfg.exploration.retry_steps, 5);
        assert_eq!(cfg.exploration.sections.len(), 9);
        assert_eq!(cfg.llm.timeouts.request, 60);
        assert_eq!(cfg.llm_retry().max_retries, 2);
    }

    #[test]
    fn test_file_overrides_partial_section() {
        let mut f = tempfile::Builder::new().suffix(".toml").tempfile().unwrap();
        writeln!(f, "[exploration]\nmax_steps = 8\n\n[llm.tiers]\ncomplex = \"deepseek-reasoner\"").unwrap();
        let cfg = load_config(Some(f.path().to_path_buf())).unwrap();
        assert_eq!(cfg.exploration.max_steps, 8);
        assert_eq!(cfg.exploration.max_articles, 5);
        assert_eq!(cfg.llm.tiers.complex.as_deref(), Some("deepseek-reasoner"));
    }

    #[test]
    fn test_missing_explicit_file_is_error() {
        assert!(load_config(Some(PathBuf::from("/nonexistent/pathfinder.toml"))).is_err());
    }
}
