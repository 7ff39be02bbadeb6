//! 可观测性：tracing 订阅器初始化
//!
//! 默认 info 级别，RUST_LOG 可覆盖；工具审计日志以 `audit` 字段输出 JSON。

use tracing_subscriber::{fmt, prelude::*, EnvFilter};

/// 初始化全局订阅器；日志写 stderr，stdout 留给结果输出。重复调用时静默忽略
pub fn init() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let _ = tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().with_writer(std::io::stderr))
        .try_init();
}
