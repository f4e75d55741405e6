// ==========================================
// 分块事务批处理引擎 - 日志初始化
// ==========================================
// tracing + tracing-subscriber
// - RUST_LOG 控制过滤（默认 info）
// - TXN_ENGINE_LOG_FORMAT=json 输出 JSON 行
// ==========================================

use tracing_subscriber::{fmt, EnvFilter};

/// 日志格式环境变量
pub const ENV_LOG_FORMAT: &str = "TXN_ENGINE_LOG_FORMAT";

fn wants_json() -> bool {
    std::env::var(ENV_LOG_FORMAT)
        .map(|v| v.trim().eq_ignore_ascii_case("json"))
        .unwrap_or(false)
}

/// 初始化日志系统
///
/// # 环境变量
/// - RUST_LOG: 例如 `RUST_LOG=txn_batch_engine=debug,slow_sql=warn`
/// - TXN_ENGINE_LOG_FORMAT: `json` 或留空（文本）
///
/// 重复调用时忽略后续初始化
pub fn init() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    let result = if wants_json() {
        fmt()
            .json()
            .with_env_filter(filter)
            .with_target(true)
            .with_current_span(false)
            .try_init()
    } else {
        fmt()
            .with_env_filter(filter)
            .with_target(true)
            .with_thread_ids(false)
            .with_line_number(true)
            .try_init()
    };

    if result.is_err() {
        tracing::debug!("日志系统已初始化, 跳过");
    }
}

/// 测试环境日志（debug 级别, 输出到测试捕获）
pub fn init_test() {
    let _ = fmt()
        .with_env_filter(EnvFilter::new("debug"))
        .with_test_writer()
        .try_init();
}
