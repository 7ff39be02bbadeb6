//! 外部调用的超时与瞬时错误重试
//!
//! 推理引擎、内容读取都经由 with_retry：每次尝试加请求超时，仅对瞬时错误做固定次数的指数退避重试，
//! 非瞬时错误立即返回。

use std::fmt::Display;
use std::future::Future;
use std::time::Duration;

use tokio::time::{sleep, timeout};

/// 可判定是否为瞬时错误（超时、限流、连接中断等）
pub trait Transient {
    fn is_transient(&self) -> bool;
}

/// 重试配置：最大重试次数、退避基数、单次请求超时
#[derive(Debug, Clone)]
pub struct RetryConfig {
    pub max_retries: u32,
    pub base_delay: Duration,
    pub request_timeout: Duration,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: 2,
            base_delay: Duration::from_millis(500),
            request_timeout: Duration::from_secs(60),
        }
    }
}

impl RetryConfig {
    pub fn new(max_retries: u32, base_delay_ms: u64, request_timeout_secs: u64) -> Self {
        Self {
            max_retries,
            base_delay: Duration::from_millis(base_delay_ms),
            request_timeout: Duration::from_secs(request_timeout_secs.max(1)),
        }
    }

    /// 第 attempt 次重试前的等待时长（指数退避）
    fn backoff(&self, attempt: u32) -> Duration {
        self.base_delay.saturating_mul(1u32 << attempt.min(10))
    }
}

/// 带超时与瞬时错误重试执行 op；on_timeout 将超时转换为调用方的错误类型
pub async fn with_retry<T, E, F, Fut>(
    cfg: &RetryConfig,
    label: &str,
    on_timeout: impl Fn(Duration) -> E,
    mut op: F,
) -> Result<T, E>
where
    E: Transient + Display,
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
{
    let mut attempt = 0u32;
    loop {
        let outcome = match timeout(cfg.request_timeout, op()).await {
            Ok(r) => r,
            Err(_) => Err(on_timeout(cfg.request_timeout)),
        };
        match outcome {
            Ok(v) => return Ok(v),
            Err(e) if e.is_transient() && attempt < cfg.max_retries => {
                let delay = cfg.backoff(attempt);
                tracing::warn!(
                    op = label,
                    attempt = attempt + 1,
                    max_retries = cfg.max_retries,
                    delay_ms = delay.as_millis() as u64,
                    error = %e,
                    "transient failure, retrying"
                );
                sleep(delay).await;
                attempt += 1;
            }
            Err(e) => {
                if e.is_transient() {
                    tracing::error!(op = label, error = %e, "retry budget exhausted");
                } else {
                    tracing::error!(op = label, error = %e, "non-transient failure");
                }
                return Err(e);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    #[derive(Debug)]
    struct TestErr(bool);

    impl Display for TestErr {
        fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
            write!(f, "test error (transient={})", self.0)
        }
    }

    impl Transient for TestErr {
        fn is_transient(&self) -> bool {
            self.0
        }
    }

    fn fast() -> RetryConfig {
        RetryConfig {
            max_retries: 2,
            base_delay: Duration::from_millis(1),
            request_timeout: Duration::from_secs(5),
        }
    }

    #[tokio::test]
    async fn test_transient_retried_until_success() {
        let counter = AtomicU32::new(0);
        let calls = &counter;
        let result: Result<u32, TestErr> = with_retry(&fast(), "test", |_| TestErr(true), move || async move {
            let n = calls.fetch_add(1, Ordering::SeqCst);
            if n < 2 {
                Err(TestErr(true))
            } else {
                Ok(n)
            }
        })
        .await;
        assert_eq!(result.unwrap(), 2);
        assert_eq!(counter.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_non_transient_not_retried() {
        let counter = AtomicU32::new(0);
        let calls = &counter;
        let result: Result<u32, TestErr> = with_retry(&fast(), "test", |_| TestErr(true), move || async move {
            calls.fetch_add(1, Ordering::SeqCst);
            Err(TestErr(false))
        })
        .await;
        assert!(result.is_err());
        assert_eq!(counter.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_retry_budget_is_bounded() {
        let counter = AtomicU32::new(0);
        let calls = &counter;
        let result: Result<u32, TestErr> = with_retry(&fast(), "test", |_| TestErr(true), move || async move {
            calls.fetch_add(1, Ordering::SeqCst);
            Err(TestErr(true))
        })
        .await;
        assert!(result.is_err());
        assert_eq!(counter.load(Ordering::SeqCst), 3);
    }
}
