//! 探索会话的消息日志
//!
//! 每条消息可带 msg_id 与 prunable 标记：读取工具产生的临时内容可按 id 定向删除，
//! assistant 回复与指令类消息永久保留。

use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};

/// 消息角色（与 LLM API 一致）
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Assistant,
    System,
}

/// 单条消息
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Message {
    pub role: Role,
    pub content: String,
    /// 定向删除用的 id，如 "art_ABC123"、"sec_eurusd_executive_summary"、"step_3"
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub msg_id: Option<String>,
    /// 仅读取工具产生的临时内容为 true
    #[serde(default)]
    pub prunable: bool,
}

impl Message {
    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: content.into(),
            msg_id: None,
            prunable: false,
        }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: Role::Assistant,
            content: content.into(),
            msg_id: None,
            prunable: false,
        }
    }

    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: Role::System,
            content: content.into(),
            msg_id: None,
            prunable: false,
        }
    }

    /// 读取工具产生的临时内容：带 id、可剪枝
    pub fn temporary(id: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: content.into(),
            msg_id: Some(id.into()),
            prunable: true,
        }
    }

    pub fn with_id(mut self, id: impl Into<String>) -> Self {
        self.msg_id = Some(id.into());
        self
    }
}

/// 有序消息日志；只有 prunable 消息可被 prune_ids 删除
#[derive(Clone, Debug, Default)]
pub struct MessageLog {
    messages: Vec<Message>,
}

impl MessageLog {
    pub fn new() -> Self {
        Self::default()
    }

    /// 追加消息；assistant / system 消息一律强制为不可剪枝
    pub fn push(&mut self, mut msg: Message) {
        if msg.role != Role::User {
            msg.prunable = false;
        }
        self.messages.push(msg);
    }

    pub fn extend(&mut self, msgs: impl IntoIterator<Item = Message>) {
        for m in msgs {
            self.push(m);
        }
    }

    pub fn messages(&self) -> &[Message] {
        &self.messages
    }

    /// 删除 id 落在 ids 中的可剪枝消息，返回删除条数
    pub fn prune_ids(&mut self, ids: &BTreeSet<String>) -> usize {
        if ids.is_empty() {
            return 0;
        }
        let before = self.messages.len();
        self.messages.retain(|m| {
            !(m.prunable && m.msg_id.as_ref().is_some_and(|id| ids.contains(id)))
        });
        before - self.messages.len()
    }

    /// 删除所有指定 id 的消息（不论是否可剪枝），用于替换格式提醒等单例消息
    pub fn remove_by_id(&mut self, id: &str) -> usize {
        let before = self.messages.len();
        self.messages.retain(|m| m.msg_id.as_deref() != Some(id));
        before - self.messages.len()
    }

    pub fn contains_id(&self, id: &str) -> bool {
        self.messages.iter().any(|m| m.msg_id.as_deref() == Some(id))
    }

    pub fn len(&self) -> usize {
        self.messages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }
}
