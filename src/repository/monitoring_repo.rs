// ==========================================
// 分块事务批处理引擎 - 监控读模型仓储
// ==========================================
// 职责: 基于 transactions / transaction_status 计算窗口聚合
// 红线: 只读; 连接由 db::open_readonly_connection 打开
// ==========================================
// 口径:
// - 窗口内事务 = transactions.created_at >= since
// - 事务结果 = 该事务最新一条状态记录
// - 完成延迟 = completed_at - created_at（仅 completed）
// ==========================================

use crate::repository::error::{RepositoryError, RepositoryResult};
use chrono::{DateTime, Utc};
use rusqlite::{params, Connection};
use serde::{Deserialize, Serialize};
use std::sync::{Arc, Mutex};

/// 窗口聚合
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct WindowAggregates {
    pub total: u64,
    pub completed: u64,
    pub failed: u64,
    pub avg_latency_ms: Option<f64>,
}

/// 错误计数（按错误类别聚合）
///
/// 未分类的失败记录按消息原文各自成组
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ErrorCount {
    pub error_kind: String,
    /// 组内示例消息
    pub error_message: String,
    pub count: u64,
}

// 每个事务的最新状态
const LATEST_STATUS_CTE: &str = r#"
    WITH latest AS (
        SELECT s.transaction_id, s.status, s.error_message,
               COALESCE(s.error_kind, 'unclassified') AS error_kind, s.completed_at
        FROM transaction_status s
        WHERE s.status_id = (
            SELECT MAX(s2.status_id) FROM transaction_status s2
            WHERE s2.transaction_id = s.transaction_id
        )
    )
"#;

pub struct MonitoringRepository {
    conn: Arc<Mutex<Connection>>,
}

impl MonitoringRepository {
    pub fn new(conn: Arc<Mutex<Connection>>) -> Self {
        Self { conn }
    }

    fn get_conn(&self) -> RepositoryResult<std::sync::MutexGuard<'_, Connection>> {
        self.conn
            .lock()
            .map_err(|e| RepositoryError::LockError(e.to_string()))
    }

    /// 计算窗口聚合
    pub fn window_aggregates(&self, since: DateTime<Utc>) -> RepositoryResult<WindowAggregates> {
        let conn = self.get_conn()?;
        let sql = format!(
            r#"
            {}
            SELECT
                COUNT(*),
                SUM(CASE WHEN l.status = 'completed' THEN 1 ELSE 0 END),
                SUM(CASE WHEN l.status = 'failed' THEN 1 ELSE 0 END),
                AVG(CASE
                        WHEN l.status = 'completed' AND l.completed_at IS NOT NULL
                        THEN (julianday(l.completed_at) - julianday(t.created_at)) * 86400000.0
                    END)
            FROM transactions t
            JOIN latest l ON l.transaction_id = t.transaction_id
            WHERE julianday(t.created_at) >= julianday(?1)
            "#,
            LATEST_STATUS_CTE
        );

        let aggregates = conn.query_row(&sql, params![since], |row| {
            let total: i64 = row.get(0)?;
            let completed: Option<i64> = row.get(1)?;
            let failed: Option<i64> = row.get(2)?;
            let avg_latency_ms: Option<f64> = row.get(3)?;
            Ok(WindowAggregates {
                total: total.max(0) as u64,
                completed: completed.unwrap_or(0).max(0) as u64,
                failed: failed.unwrap_or(0).max(0) as u64,
                avg_latency_ms,
            })
        })?;

        Ok(aggregates)
    }

    /// 窗口内出现最多的错误类别（降序, 同频按类别与消息排序）
    pub fn top_errors(&self, since: DateTime<Utc>, limit: usize) -> RepositoryResult<Vec<ErrorCount>> {
        if limit == 0 {
            return Ok(Vec::new());
        }

        let conn = self.get_conn()?;
        let sql = format!(
            r#"
            {}
            SELECT l.error_kind, MIN(l.error_message) AS sample, COUNT(*) AS cnt
            FROM transactions t
            JOIN latest l ON l.transaction_id = t.transaction_id
            WHERE julianday(t.created_at) >= julianday(?1)
              AND l.status = 'failed'
              AND l.error_message IS NOT NULL
            GROUP BY l.error_kind,
                     CASE WHEN l.error_kind = 'unclassified' THEN l.error_message END
            ORDER BY cnt DESC, l.error_kind ASC, sample ASC
            LIMIT ?2
            "#,
            LATEST_STATUS_CTE
        );

        let mut stmt = conn.prepare(&sql)?;
        let rows = stmt.query_map(params![since, limit as i64], |row| {
            let count: i64 = row.get(2)?;
            Ok(ErrorCount {
                error_kind: row.get(0)?,
                error_message: row.get(1)?,
                count: count.max(0) as u64,
            })
        })?;

        let mut errors = Vec::new();
        for row in rows {
            errors.push(row?);
        }
        Ok(errors)
    }
}
