// ==========================================
// 分块提交集成测试
// ==========================================
// 场景: 分块隔离 / 转账原子性 / 提交失败降级 / 空批次
// ==========================================

#[path = "test_helpers.rs"]
mod test_helpers;

use test_helpers::*;
use txn_batch_engine::domain::{Direction, Transaction};
use txn_batch_engine::engine::ChunkedCommitEngine;
use txn_batch_engine::repository::{account_repo, inventory_repo};

#[test]
fn test_250_transactions_middle_chunk_fails() {
    let (_file, db_path) = create_test_db().unwrap();
    let mut conn = open_test_connection(&db_path).unwrap();

    let mut batch = receipts(250, "ART-1");
    batch[149].amount = 0.0; // T150 非法

    let engine = ChunkedCommitEngine::new(100).unwrap();
    let result = engine.process(&mut conn, "B-250", &batch);

    assert_eq!(result.total, 250);
    assert_eq!(result.successful, 150);
    assert_eq!(result.failed, 100);
    assert_eq!(result.success_rate, 60.0);
    assert!(result.commit_error.is_none());

    let expected: Vec<String> = (101..=200).map(|i| format!("T{}", i)).collect();
    let failed: Vec<String> = result.failed_ids().into_iter().map(String::from).collect();
    assert_eq!(failed, expected);

    // 触发者与同分块事务的错误消息
    let trigger = result
        .failed_transactions
        .iter()
        .find(|f| f.transaction_id == "T150")
        .unwrap();
    assert!(trigger.error.contains("校验失败"));
    let sibling = result
        .failed_transactions
        .iter()
        .find(|f| f.transaction_id == "T120")
        .unwrap();
    assert!(sibling.error.contains("同分块事务 T150 失败"));

    // 只有分块 1 与 3 的副作用落库
    assert_eq!(inventory_repo::stock_of(&conn, "ART-1").unwrap(), 150.0);
    assert_eq!(latest_status(&conn, "T1").as_deref(), Some("completed"));
    assert_eq!(latest_status(&conn, "T120").as_deref(), Some("failed"));
    assert_eq!(latest_status(&conn, "T250").as_deref(), Some("completed"));
    assert_eq!(count_rows(&conn, "transactions"), 250);
}

#[test]
fn test_transfer_failure_rolls_back_whole_chunk() {
    let (_file, db_path) = create_test_db().unwrap();
    let mut conn = open_test_connection(&db_path).unwrap();
    seed_account(&conn, "ACC-A", 50.0);
    seed_account(&conn, "ACC-B", 0.0);

    let batch = vec![
        Transaction::financial("F1", "ACC-B", 10.0, Direction::In),
        Transaction::transfer("X1", "ACC-A", "ACC-B", 80.0), // 余额不足
        Transaction::transfer("X2", "ACC-A", "ACC-B", 30.0),
    ];

    let engine = ChunkedCommitEngine::new(2).unwrap();
    let result = engine.process(&mut conn, "B-X", &batch);

    assert_eq!(result.successful, 1);
    assert_eq!(result.failed_ids(), vec!["F1", "X1"]);

    // F1 随分块回滚, 仅 X2 生效
    assert_eq!(account_repo::balance_of(&conn, "ACC-A").unwrap(), Some(20.0));
    assert_eq!(account_repo::balance_of(&conn, "ACC-B").unwrap(), Some(30.0));
    assert_eq!(account_repo::ledger_entries(&conn, "ACC-A").unwrap().len(), 1);
    assert_eq!(account_repo::ledger_entries(&conn, "ACC-B").unwrap().len(), 1);
    assert_eq!(latest_status(&conn, "F1").as_deref(), Some("failed"));
}

#[test]
fn test_insufficient_stock_isolated_to_chunk() {
    let (_file, db_path) = create_test_db().unwrap();
    let mut conn = open_test_connection(&db_path).unwrap();
    seed_stock(&conn, "ART-2", 5.0);

    let batch = vec![
        Transaction::inventory("O1", "ART-2", 3.0, Direction::Out),
        Transaction::inventory("O2", "ART-2", 3.0, Direction::Out),
    ];

    let engine = ChunkedCommitEngine::new(1).unwrap();
    let result = engine.process(&mut conn, "B-S", &batch);

    assert_eq!(result.successful, 1);
    assert_eq!(result.failed_ids(), vec!["O2"]);
    assert!(result.failed_transactions[0].error.contains("库存不足"));
    assert_eq!(inventory_repo::stock_of(&conn, "ART-2").unwrap(), 2.0);
}

#[test]
fn test_empty_batch_touches_nothing() {
    let (_file, db_path) = create_test_db().unwrap();
    let mut conn = open_test_connection(&db_path).unwrap();

    let result = ChunkedCommitEngine::default().process(&mut conn, "B-E", &[]);
    assert_eq!(result.total, 0);
    assert_eq!(result.success_rate, 100.0);
    assert_eq!(count_rows(&conn, "transactions"), 0);
}

#[test]
fn test_commit_failure_downgrades_everything() {
    let (_file, db_path) = create_test_db().unwrap();
    let mut conn = open_test_connection(&db_path).unwrap();

    // 提交钩子返回 true 时 SQLite 将 COMMIT 转为回滚
    conn.commit_hook(Some(|| true));

    let batch = receipts(5, "ART-3");
    let result = ChunkedCommitEngine::new(2).unwrap().process(&mut conn, "B-C", &batch);

    assert_eq!(result.successful, 0);
    assert_eq!(result.failed, 5);
    assert!(result.commit_error.is_some());

    conn.commit_hook(None::<fn() -> bool>);
    assert_eq!(count_rows(&conn, "transactions"), 0);
    assert_eq!(inventory_repo::stock_of(&conn, "ART-3").unwrap(), 0.0);
}
