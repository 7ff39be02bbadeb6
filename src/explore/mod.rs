//! 探索智能体
//!
//! - **state**: 探索状态、摘录、草稿与结果
//! - **protocol**: 工具表与 Tool Call 解析（含格式容错）
//! - **citations**: 草稿引用校验
//! - **context**: 每轮上下文与收敛提示
//! - **tools**: 工具执行器（临时内容规则、MidCritic 接入）
//! - **loop_**: 探索主循环
//! - **critic** / **final_critic**: 中途审阅与终审
//! - **orchestrator**: 入口，终审与唯一一次重试、结果入库
//! - **prompts**: 提示词加载

pub mod citations;
pub mod context;
pub mod critic;
pub mod final_critic;
pub mod loop_;
pub mod orchestrator;
pub mod prompts;
pub mod protocol;
pub mod state;
pub mod tools;

pub use critic::{CriticFeedback, CriticVerdict, MidCritic};
pub use final_critic::{EvidenceStrength, FinalCritic, FinalVerdict};
pub use loop_::AgentLoop;
pub use orchestrator::{ExplorationOutcome, ExploreOptions, Orchestrator};
pub use prompts::PromptSet;
pub use protocol::{parse_tool_call, AgentResponse, ParseError, ToolCall, ToolKind, TOOL_TABLE};
pub use state::{
    DraftFinding, ExplorationMode, ExplorationResult, ExplorationState, FlowPath, SavedExcerpt, SourceType,
};
pub use tools::{ReadLimits, ToolExecutor};
