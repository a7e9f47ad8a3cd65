/// 工具函数模块
use tracing_subscriber::EnvFilter;
use uuid::Uuid;

use crate::transport::CallToken;

/// 初始化日志系统
///
/// `RUST_LOG` 优先，否则使用传入的级别
pub fn initialize_logging(level: &str) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(level));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .init();
}

/// 生成全局唯一的呼叫令牌
///
/// 使用 UUID v4，确保跨进程、跨重启不会冲突
pub fn new_call_token() -> CallToken {
    Uuid::new_v4().to_string()
}
