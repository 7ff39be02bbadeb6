//! 记忆层：探索会话的有序消息日志（临时内容可定向剪枝）

pub mod conversation;

pub use conversation::{Message, MessageLog, Role};
