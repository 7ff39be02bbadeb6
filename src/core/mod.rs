//! 核心层：错误与恢复、外部调用的超时与重试

pub mod error;
pub mod recovery;
pub mod retry;

pub use error::{AgentError, RecoveryAction};
pub use recovery::{RecoveryEngine, FORMAT_REMINDER_ID};
pub use retry::{with_retry, RetryConfig, Transient};
