// ==========================================
// 分块事务批处理引擎 - 性能观测
// ==========================================
// 职责:
// - SQLite 语句 trace/profile: SQL 计数 + 慢 SQL 告警
// - PerfGuard: 作用域计时, 结束时输出耗时与 SQL 统计
// 计数按线程隔离（每个批次在独立的 blocking 线程上执行）
// ==========================================

use rusqlite::Connection;
use std::cell::Cell;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::{Duration, Instant};

/// 开关环境变量
pub const ENV_PERF_SQL: &str = "TXN_ENGINE_PERF_SQL";
/// 慢 SQL 阈值环境变量（毫秒）
pub const ENV_SLOW_SQL_MS: &str = "TXN_ENGINE_SLOW_SQL_MS";

static SQL_TRACE_ON: AtomicBool = AtomicBool::new(false);
static SLOW_SQL_MS: AtomicU64 = AtomicU64::new(0);

thread_local! {
    static GUARD_DEPTH: Cell<u32> = Cell::new(0);
    static STATEMENTS: Cell<u64> = Cell::new(0);
    static SLOW_STATEMENTS: Cell<u64> = Cell::new(0);
}

fn env_flag(v: &str) -> bool {
    matches!(v.trim().to_ascii_lowercase().as_str(), "1" | "true" | "yes" | "on")
}

fn shorten(sql: &str, max_chars: usize) -> String {
    let flat = sql.split_whitespace().collect::<Vec<_>>().join(" ");
    if flat.chars().count() <= max_chars {
        return flat;
    }
    let cut: String = flat.chars().take(max_chars).collect();
    format!("{}…", cut)
}

/// 为会话安装语句 trace/profile
///
/// - Debug 构建默认开启, Release 默认关闭
/// - `TXN_ENGINE_PERF_SQL=1/0` 强制开关
/// - `TXN_ENGINE_SLOW_SQL_MS` 慢 SQL 阈值（默认 debug 50ms / release 200ms）
///
/// # 返回
/// 是否已开启
pub fn install_sqlite_tracing(conn: &mut Connection) -> bool {
    let enabled = std::env::var(ENV_PERF_SQL)
        .map(|v| env_flag(&v))
        .unwrap_or(cfg!(debug_assertions));
    SQL_TRACE_ON.store(enabled, Ordering::Relaxed);

    if !enabled {
        conn.trace(None);
        conn.profile(None);
        return false;
    }

    let threshold = std::env::var(ENV_SLOW_SQL_MS)
        .ok()
        .and_then(|v| v.trim().parse::<u64>().ok())
        .unwrap_or(if cfg!(debug_assertions) { 50 } else { 200 });
    SLOW_SQL_MS.store(threshold, Ordering::Relaxed);

    conn.trace(Some(on_statement));
    conn.profile(Some(on_profile));
    true
}

fn guard_active() -> bool {
    GUARD_DEPTH.with(|d| d.get() > 0)
}

fn on_statement(_sql: &str) {
    if SQL_TRACE_ON.load(Ordering::Relaxed) && guard_active() {
        STATEMENTS.with(|c| c.set(c.get().saturating_add(1)));
    }
}

fn on_profile(sql: &str, elapsed: Duration) {
    if !SQL_TRACE_ON.load(Ordering::Relaxed) {
        return;
    }
    let ms = elapsed.as_millis() as u64;
    let threshold = SLOW_SQL_MS.load(Ordering::Relaxed);
    if threshold == 0 || ms < threshold {
        return;
    }
    tracing::warn!(target: "slow_sql", duration_ms = ms, sql = %shorten(sql, 400), "慢 SQL");
    if guard_active() {
        SLOW_STATEMENTS.with(|c| c.set(c.get().saturating_add(1)));
    }
}

// ==========================================
// PerfGuard - 作用域计时
// ==========================================
/// ```ignore
/// let _perf = txn_batch_engine::perf::PerfGuard::new("chunked_commit").with_label(batch_id);
/// ```
pub struct PerfGuard {
    op: &'static str,
    label: Option<String>,
    started: Instant,
    statements_at_start: u64,
    slow_at_start: u64,
}

impl PerfGuard {
    pub fn new(op: &'static str) -> Self {
        GUARD_DEPTH.with(|d| d.set(d.get().saturating_add(1)));
        Self {
            op,
            label: None,
            started: Instant::now(),
            statements_at_start: STATEMENTS.with(|c| c.get()),
            slow_at_start: SLOW_STATEMENTS.with(|c| c.get()),
        }
    }

    /// 附加标签（如批次ID）
    pub fn with_label(mut self, label: impl Into<String>) -> Self {
        self.label = Some(label.into());
        self
    }

    pub fn elapsed(&self) -> Duration {
        self.started.elapsed()
    }
}

impl Drop for PerfGuard {
    fn drop(&mut self) {
        let elapsed_ms = self.started.elapsed().as_millis() as u64;
        let sql_count = STATEMENTS.with(|c| c.get()).saturating_sub(self.statements_at_start);
        let slow_sql_count = SLOW_STATEMENTS.with(|c| c.get()).saturating_sub(self.slow_at_start);

        tracing::info!(
            target: "perf",
            op = self.op,
            label = self.label.as_deref().unwrap_or("-"),
            elapsed_ms,
            sql_count,
            slow_sql_count,
            "完成"
        );

        GUARD_DEPTH.with(|d| d.set(d.get().saturating_sub(1)));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_shorten_flattens_whitespace() {
        assert_eq!(shorten("SELECT  1\n FROM t", 100), "SELECT 1 FROM t");
        assert_eq!(shorten("abcdef", 3), "abc…");
    }

    #[test]
    fn test_env_flag() {
        assert!(env_flag(" YES "));
        assert!(env_flag("1"));
        assert!(!env_flag("off"));
    }
}
