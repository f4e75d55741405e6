// ==========================================
// 分块事务批处理引擎 - 账户/分录数据仓储
// ==========================================
// 对齐: account / ledger_entry 表
// 红线: ledger_entry 不可变, 只插入
// ==========================================

use crate::repository::error::RepositoryResult;
use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension};
use serde::{Deserialize, Serialize};

// ==========================================
// LedgerEntryEntity - 账务分录
// ==========================================
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LedgerEntryEntity {
    pub account_id: String,
    pub transaction_id: String,
    pub reference_id: Option<String>,
    pub direction: String,
    pub amount: f64,
    pub balance_after: f64,
    pub created_at: DateTime<Utc>,
}

/// 开户（已存在则覆盖余额）
pub fn open_account(conn: &Connection, account_id: &str, balance: f64) -> RepositoryResult<()> {
    conn.execute(
        r#"
        INSERT INTO account (account_id, balance, updated_at)
        VALUES (?1, ?2, datetime('now'))
        ON CONFLICT(account_id) DO UPDATE SET
            balance = excluded.balance,
            updated_at = excluded.updated_at
        "#,
        params![account_id, balance],
    )?;
    Ok(())
}

/// 读取余额（账户不存在返回 None）
pub fn balance_of(conn: &Connection, account_id: &str) -> RepositoryResult<Option<f64>> {
    let balance = conn
        .query_row(
            "SELECT balance FROM account WHERE account_id = ?1",
            [account_id],
            |row| row.get(0),
        )
        .optional()?;
    Ok(balance)
}

/// 按增量调整余额
///
/// # 返回
/// - `Some(balance)`: 调整后的余额
/// - `None`: 账户不存在, 未做任何改动
pub fn apply_delta(conn: &Connection, account_id: &str, delta: f64) -> RepositoryResult<Option<f64>> {
    let rows = conn.execute(
        "UPDATE account SET balance = balance + ?2, updated_at = datetime('now') WHERE account_id = ?1",
        params![account_id, delta],
    )?;
    if rows == 0 {
        return Ok(None);
    }
    balance_of(conn, account_id)
}

/// 追加分录
pub fn insert_ledger_entry(conn: &Connection, entry: &LedgerEntryEntity) -> RepositoryResult<()> {
    conn.execute(
        r#"
        INSERT INTO ledger_entry (
            account_id, transaction_id, reference_id, direction,
            amount, balance_after, created_at
        ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
        "#,
        params![
            entry.account_id,
            entry.transaction_id,
            entry.reference_id,
            entry.direction,
            entry.amount,
            entry.balance_after,
            entry.created_at,
        ],
    )?;
    Ok(())
}

/// 按账户查询分录（按写入顺序）
pub fn ledger_entries(conn: &Connection, account_id: &str) -> RepositoryResult<Vec<LedgerEntryEntity>> {
    let mut stmt = conn.prepare(
        r#"
        SELECT account_id, transaction_id, reference_id, direction,
               amount, balance_after, created_at
        FROM ledger_entry
        WHERE account_id = ?1
        ORDER BY entry_id ASC
        "#,
    )?;

    let rows = stmt.query_map([account_id], |row| {
        Ok(LedgerEntryEntity {
            account_id: row.get(0)?,
            transaction_id: row.get(1)?,
            reference_id: row.get(2)?,
            direction: row.get(3)?,
            amount: row.get(4)?,
            balance_after: row.get(5)?,
            created_at: row.get(6)?,
        })
    })?;

    let mut entries = Vec::new();
    for row in rows {
        entries.push(row?);
    }
    Ok(entries)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::init_schema;

    #[test]
    fn test_apply_delta_missing_account() {
        let conn = Connection::open_in_memory().unwrap();
        init_schema(&conn).unwrap();

        assert_eq!(apply_delta(&conn, "NOPE", 5.0).unwrap(), None);

        open_account(&conn, "A1", 100.0).unwrap();
        assert_eq!(apply_delta(&conn, "A1", -30.0).unwrap(), Some(70.0));
        assert_eq!(balance_of(&conn, "A1").unwrap(), Some(70.0));
    }
}
