// ==========================================
// 测试辅助函数
// ==========================================
// 职责: 临时数据库初始化、基础数据、批次构造
// ==========================================

#![allow(dead_code)]

use rusqlite::Connection;
use std::error::Error;
use tempfile::NamedTempFile;
use txn_batch_engine::db;
use txn_batch_engine::domain::{Direction, Transaction};
use txn_batch_engine::repository::{account_repo, inventory_repo};

/// 创建临时测试数据库并初始化 schema
///
/// # 返回
/// - NamedTempFile: 临时数据库文件（需要保持存活）
/// - String: 数据库文件路径
pub fn create_test_db() -> Result<(NamedTempFile, String), Box<dyn Error>> {
    let temp_file = NamedTempFile::new()?;
    let db_path = temp_file.path().to_str().unwrap().to_string();
    db::bootstrap(&db_path)?;
    Ok((temp_file, db_path))
}

/// 打开测试会话（WAL + busy_timeout）
pub fn open_test_connection(db_path: &str) -> Result<Connection, Box<dyn Error>> {
    Ok(db::open_session(db_path, 5_000)?)
}

/// 预置库存
pub fn seed_stock(conn: &Connection, article_id: &str, quantity: f64) {
    inventory_repo::set_stock(conn, article_id, quantity).unwrap();
}

/// 预置账户
pub fn seed_account(conn: &Connection, account_id: &str, balance: f64) {
    account_repo::open_account(conn, account_id, balance).unwrap();
}

/// n 笔入库事务, ID 为 T1..Tn
pub fn receipts(n: usize, article_id: &str) -> Vec<Transaction> {
    (1..=n)
        .map(|i| Transaction::inventory(format!("T{}", i), article_id, 1.0, Direction::In))
        .collect()
}

/// 某事务最新状态（无记录时 None）
pub fn latest_status(conn: &Connection, transaction_id: &str) -> Option<String> {
    conn.query_row(
        "SELECT status FROM transaction_status WHERE transaction_id = ?1 ORDER BY status_id DESC LIMIT 1",
        [transaction_id],
        |row| row.get(0),
    )
    .ok()
}

pub fn count_rows(conn: &Connection, table: &str) -> i64 {
    conn.query_row(&format!("SELECT COUNT(*) FROM {}", table), [], |row| row.get(0))
        .unwrap()
}
