// ==========================================
// 分块事务批处理引擎 - 事务数据仓储
// ==========================================
// 对齐: transactions / transaction_status 表
// 红线: Repository 不做业务逻辑,只做数据映射
// 红线: transaction_status 只追加, 状态只允许单调前进
// ==========================================
// 说明: 写入函数接收调用方的会话（&Connection），
//      以便在引擎的外层事务/保存点内执行
// ==========================================

use crate::domain::{
    Direction, Transaction, TransactionState, TransactionStatusRecord, TransactionType,
};
use crate::repository::error::{RepositoryError, RepositoryResult};
use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension, Row};
use std::sync::{Arc, Mutex};

// ==========================================
// 会话级写入
// ==========================================

/// 插入事务行
///
/// # 返回
/// - `Err(UniqueConstraintViolation)`: 事务ID已存在
pub fn insert_transaction(
    conn: &Connection,
    tx: &Transaction,
    batch_id: &str,
    created_at: DateTime<Utc>,
) -> RepositoryResult<()> {
    conn.execute(
        r#"
        INSERT INTO transactions (
            transaction_id, transaction_type, amount, direction, description,
            reference_id, article_id, account_id, target_account_id,
            batch_id, created_at
        ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)
        "#,
        params![
            tx.id,
            tx.transaction_type.as_str(),
            tx.amount,
            tx.direction.as_str(),
            tx.description,
            tx.reference_id,
            tx.article_id,
            tx.account_id,
            tx.target_account_id,
            batch_id,
            created_at,
        ],
    )?;
    Ok(())
}

/// 插入事务行（已存在则忽略）
///
/// # 返回
/// - `Ok(true)`: 新插入
/// - `Ok(false)`: 已存在, 未改动
pub fn insert_transaction_if_absent(
    conn: &Connection,
    tx: &Transaction,
    batch_id: &str,
    created_at: DateTime<Utc>,
) -> RepositoryResult<bool> {
    let rows = conn.execute(
        r#"
        INSERT OR IGNORE INTO transactions (
            transaction_id, transaction_type, amount, direction, description,
            reference_id, article_id, account_id, target_account_id,
            batch_id, created_at
        ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)
        "#,
        params![
            tx.id,
            tx.transaction_type.as_str(),
            // 非法金额（NaN 等）按 0 落库, 原值已体现在失败原因中
            if tx.amount.is_finite() { tx.amount } else { 0.0 },
            tx.direction.as_str(),
            tx.description,
            tx.reference_id,
            tx.article_id,
            tx.account_id,
            tx.target_account_id,
            batch_id,
            created_at,
        ],
    )?;
    Ok(rows > 0)
}

/// 读取事务最新状态
pub fn latest_state(conn: &Connection, transaction_id: &str) -> RepositoryResult<Option<TransactionState>> {
    let raw: Option<String> = conn
        .query_row(
            r#"
            SELECT status FROM transaction_status
            WHERE transaction_id = ?1
            ORDER BY status_id DESC
            LIMIT 1
            "#,
            [transaction_id],
            |row| row.get(0),
        )
        .optional()?;

    match raw {
        None => Ok(None),
        Some(s) => TransactionState::parse(&s)
            .map(Some)
            .ok_or_else(|| RepositoryError::FieldValueError {
                field: "transaction_status.status".to_string(),
                message: format!("无法识别的状态值: {}", s),
            }),
    }
}

/// 失败明细（落库字段）
#[derive(Debug, Clone, Copy)]
pub struct FailureDetail<'a> {
    pub kind: &'a str,
    pub message: &'a str,
    pub trigger_id: Option<&'a str>,
}

/// 追加状态审计记录
///
/// 约束:
/// - 无历史状态时任意初始状态均可写入
/// - 有历史状态时必须满足单调流转, 否则返回 InvalidStateTransition
/// - error_message 仅在 failed 时写入
pub fn append_status(
    conn: &Connection,
    transaction_id: &str,
    next: TransactionState,
    error_message: Option<&str>,
    ts: DateTime<Utc>,
) -> RepositoryResult<()> {
    let failure = match next {
        TransactionState::Failed => error_message.map(|message| FailureDetail {
            kind: "unclassified",
            message,
            trigger_id: None,
        }),
        _ => None,
    };
    insert_status(conn, transaction_id, next, failure, ts)
}

/// 追加 failed 记录（错误类别、稳定消息与触发事务分列存储）
pub fn append_failure(
    conn: &Connection,
    transaction_id: &str,
    failure: FailureDetail<'_>,
    ts: DateTime<Utc>,
) -> RepositoryResult<()> {
    insert_status(conn, transaction_id, TransactionState::Failed, Some(failure), ts)
}

fn insert_status(
    conn: &Connection,
    transaction_id: &str,
    next: TransactionState,
    failure: Option<FailureDetail<'_>>,
    ts: DateTime<Utc>,
) -> RepositoryResult<()> {
    if let Some(current) = latest_state(conn, transaction_id)? {
        if !current.can_transition_to(next) {
            return Err(RepositoryError::InvalidStateTransition {
                from: current.to_string(),
                to: next.to_string(),
            });
        }
    }

    let completed_at = if next.is_terminal() { Some(ts) } else { None };

    conn.execute(
        r#"
        INSERT INTO transaction_status (
            transaction_id, status, error_message, error_kind, trigger_id, status_ts, completed_at
        ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
        "#,
        params![
            transaction_id,
            next.as_str(),
            failure.map(|f| f.message),
            failure.map(|f| f.kind),
            failure.and_then(|f| f.trigger_id),
            ts,
            completed_at,
        ],
    )?;
    Ok(())
}

// ==========================================
// 行映射
// ==========================================

fn map_transaction_row(row: &Row<'_>) -> rusqlite::Result<Transaction> {
    let type_raw: String = row.get(1)?;
    let direction_raw: String = row.get(3)?;
    Ok(Transaction {
        id: row.get(0)?,
        transaction_type: TransactionType::parse(&type_raw),
        amount: row.get(2)?,
        // 写入时只会落 in/out
        direction: Direction::parse(&direction_raw).unwrap_or(Direction::In),
        description: row.get(4)?,
        reference_id: row.get(5)?,
        article_id: row.get(6)?,
        account_id: row.get(7)?,
        target_account_id: row.get(8)?,
    })
}

type StatusRow = (
    String,
    String,
    Option<String>,
    Option<String>,
    Option<String>,
    DateTime<Utc>,
    Option<DateTime<Utc>>,
);

fn map_status_row(row: &Row<'_>) -> rusqlite::Result<StatusRow> {
    Ok((
        row.get(0)?,
        row.get(1)?,
        row.get(2)?,
        row.get(3)?,
        row.get(4)?,
        row.get(5)?,
        row.get(6)?,
    ))
}

pub fn find_transaction(conn: &Connection, transaction_id: &str) -> RepositoryResult<Option<Transaction>> {
    let tx = conn
        .query_row(
            r#"
            SELECT transaction_id, transaction_type, amount, direction, description,
                   reference_id, article_id, account_id, target_account_id
            FROM transactions
            WHERE transaction_id = ?1
            "#,
            [transaction_id],
            map_transaction_row,
        )
        .optional()?;
    Ok(tx)
}

pub fn status_history(conn: &Connection, transaction_id: &str) -> RepositoryResult<Vec<TransactionStatusRecord>> {
    let mut stmt = conn.prepare(
        r#"
        SELECT transaction_id, status, error_message, error_kind, trigger_id, status_ts, completed_at
        FROM transaction_status
        WHERE transaction_id = ?1
        ORDER BY status_id ASC
        "#,
    )?;

    let rows = stmt.query_map([transaction_id], map_status_row)?;

    let mut history = Vec::new();
    for row in rows {
        let (transaction_id, status_raw, error_message, error_kind, trigger_id, timestamp, completed_at) = row?;
        let status = TransactionState::parse(&status_raw).ok_or_else(|| RepositoryError::FieldValueError {
            field: "transaction_status.status".to_string(),
            message: format!("无法识别的状态值: {}", status_raw),
        })?;
        history.push(TransactionStatusRecord {
            transaction_id,
            status,
            error_message,
            error_kind,
            trigger_id,
            timestamp,
            completed_at,
        });
    }
    Ok(history)
}

// ==========================================
// TransactionRepository - 事务查询仓储
// ==========================================
// 用途: API 层按ID查询事务及其状态轨迹
pub struct TransactionRepository {
    conn: Arc<Mutex<Connection>>,
}

impl TransactionRepository {
    pub fn new(conn: Arc<Mutex<Connection>>) -> Self {
        Self { conn }
    }

    fn get_conn(&self) -> RepositoryResult<std::sync::MutexGuard<'_, Connection>> {
        self.conn
            .lock()
            .map_err(|e| RepositoryError::LockError(e.to_string()))
    }

    /// 查询事务（不存在返回 NotFound）
    pub fn get(&self, transaction_id: &str) -> RepositoryResult<Transaction> {
        let conn = self.get_conn()?;
        find_transaction(&conn, transaction_id)?.ok_or_else(|| RepositoryError::NotFound {
            entity: "Transaction".to_string(),
            id: transaction_id.to_string(),
        })
    }

    /// 查询事务状态轨迹（按写入顺序）
    pub fn history(&self, transaction_id: &str) -> RepositoryResult<Vec<TransactionStatusRecord>> {
        let conn = self.get_conn()?;
        status_history(&conn, transaction_id)
    }
}
