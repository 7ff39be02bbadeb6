//! 探索主循环
//!
//! 每步：构建上下文 -> 调用推理引擎 -> 解析 Tool Call（失败则注入格式提醒，本步仍计数）-> dispatch。
//! finish 成功即返回；步数耗尽时以是否有草稿判定成败。推理引擎或内容读取的不可恢复错误直接终止。

use std::sync::Arc;

use crate::core::{AgentError, RecoveryAction, RecoveryEngine, FORMAT_REMINDER_ID};
use crate::explore::context::{build_step_context, convergence_pressure, CONVERGENCE_PRESSURE_ID};
use crate::explore::protocol::parse_tool_call;
use crate::explore::state::{ExplorationResult, ExplorationState};
use crate::explore::tools::ToolExecutor;
use crate::llm::LlmClient;
use crate::memory::Message;

/// 终审拒绝后注入的指令消息 id
pub const RETRY_DIRECTIVE_ID: &str = "critic_rejection";

/// 探索循环：持有推理引擎（complex 档）、工具执行器、恢复引擎与 system prompt
pub struct AgentLoop {
    llm: Arc<dyn LlmClient>,
    executor: ToolExecutor,
    recovery: RecoveryEngine,
    system_prompt: String,
}

impl AgentLoop {
    pub fn new(llm: Arc<dyn LlmClient>, executor: ToolExecutor, system_prompt: impl Into<String>) -> Self {
        Self {
            llm,
            executor,
            recovery: RecoveryEngine::new(),
            system_prompt: system_prompt.into(),
        }
    }

    pub fn executor(&self) -> &ToolExecutor {
        &self.executor
    }

    /// 运行至 finish、步数耗尽或不可恢复错误
    pub async fn run(&self, state: &mut ExplorationState) -> ExplorationResult {
        if state.messages.is_empty() {
            state.messages.push(Message::system(self.system_prompt.clone()));
        }
        tracing::info!(
            target_id = %state.target_id,
            mode = %state.mode,
            start = %state.current_topic.id,
            max_steps = state.max_steps,
            "exploration started"
        );

        while state.step_count < state.max_steps {
            state.step_count += 1;
            let step = state.step_count;

            state
                .messages
                .push(Message::user(build_step_context(state)).with_id(format!("step_{}", step)));
            state.messages.remove_by_id(CONVERGENCE_PRESSURE_ID);
            if let Some(pressure) = convergence_pressure(state) {
                state.messages.push(Message::user(pressure).with_id(CONVERGENCE_PRESSURE_ID));
            }

            let response = match self.llm.complete(state.messages.messages()).await {
                Ok(r) => r,
                Err(e) => return self.abort(state, AgentError::from(e)),
            };

            let parsed = match parse_tool_call(&response) {
                Ok(p) => p,
                Err(e) => {
                    tracing::warn!(step, error = %e, "unparseable response");
                    match self.recovery.handle(&AgentError::JsonParseError(e.to_string())) {
                        RecoveryAction::RetryWithPrompt(reminder) => {
                            state.messages.remove_by_id(FORMAT_REMINDER_ID);
                            state.messages.push(Message::user(reminder).with_id(FORMAT_REMINDER_ID));
                            continue;
                        }
                        RecoveryAction::Abort => {
                            return self.abort(state, AgentError::JsonParseError(e.to_string()))
                        }
                    }
                }
            };

            state.messages.remove_by_id(FORMAT_REMINDER_ID);
            state
                .messages
                .push(Message::assistant(response).with_id(format!("response_{}", step)));
            tracing::debug!(step, tool = parsed.tool_call.name(), thinking = %parsed.thinking, "tool call");

            let dispatch = match self.executor.dispatch(&parsed.tool_call, state).await {
                Ok(d) => d,
                Err(e) => return self.abort(state, e),
            };
            if dispatch.is_finish() {
                tracing::info!(step, excerpts = state.saved_excerpts.len(), "exploration finished");
                return ExplorationResult::from_state(state, true, None);
            }
            state.messages.extend(dispatch.messages);
        }

        let success = state.draft_finding.is_some();
        let error = if success {
            None
        } else {
            Some(format!(
                "Reached max steps ({}) without drafting a finding",
                state.max_steps
            ))
        };
        tracing::info!(success, steps = state.step_count, "exploration exhausted step budget");
        ExplorationResult::from_state(state, success, error)
    }

    /// 终审拒绝后的唯一一次续跑：追加步数、清空草稿、注入拒绝理由
    pub async fn resume(
        &self,
        state: &mut ExplorationState,
        reasoning: &str,
        rejection_reasons: &[String],
        extra_steps: u32,
    ) -> ExplorationResult {
        state.max_steps = state.max_steps.saturating_add(extra_steps);
        state.draft_finding = None;
        let mut directive = format!(
            "FINAL CRITIC REJECTED YOUR FINDING\n\nReasoning: {}\n\nRejection reasons:\n",
            reasoning
        );
        for r in rejection_reasons {
            directive.push_str(&format!("- {}\n", r));
        }
        directive.push_str(&format!(
            "\nYou have {} more steps. Fix these issues: gather the missing evidence, then call draft_finding and finish.",
            extra_steps
        ));
        state.messages.remove_by_id(RETRY_DIRECTIVE_ID);
        state.messages.push(Message::user(directive).with_id(RETRY_DIRECTIVE_ID));
        tracing::info!(extra_steps, max_steps = state.max_steps, "exploration resumed after rejection");
        self.run(state).await
    }

    fn abort(&self, state: &ExplorationState, err: AgentError) -> ExplorationResult {
        let action = self.recovery.handle(&err);
        tracing::error!(step = state.step_count, error = %err, action = ?action, "exploration aborted");
        ExplorationResult::from_state(state, false, Some(err.to_string()))
    }
}
