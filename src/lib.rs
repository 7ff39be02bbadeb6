//! Pathfinder - 知识图谱探索智能体
//!
//! 模块划分：
//! - **config**: 应用配置加载（TOML + 环境变量）
//! - **core**: 错误与恢复、超时与重试
//! - **explore**: 探索循环、工具执行、引用校验、双阶段 Critic、编排
//! - **findings**: 每个 (target, mode) 至多 3 条的排序结果集与持久化
//! - **graph**: 内容图接入（ContentProvider）与 JSON 图实现
//! - **llm**: LLM 客户端抽象与实现（OpenAI 兼容 / DeepSeek / Scripted）与分档注册表
//! - **memory**: 可定向剪枝的消息日志
//! - **observability**: 日志初始化

pub mod config;
pub mod core;
pub mod explore;
pub mod findings;
pub mod graph;
pub mod llm;
pub mod memory;
pub mod observability;

pub use explore::{ExplorationMode, ExplorationOutcome, ExploreOptions, Orchestrator};
