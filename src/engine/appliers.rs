// ==========================================
// 分块事务批处理引擎 - 副作用执行器
// ==========================================
// 职责: 按事务类型落地业务副作用（库存/账户/分录）
// 约束:
// - 在调用方的保存点内执行, 不自行提交
// - 类型到执行器的选择使用穷尽 match, 新增类型时编译期报错
// ==========================================
// 规则:
// - 库存: in 增加; out 扣减, 库存不足报错（无库存行按 0 计）
// - 财务: 按方向增减余额, 账户必须存在, 追加分录; 允许透支
// - 转账: 拆分为 {id}:debit / {id}:credit 两条腿, 嵌套保存点内同进同退;
//         出账腿要求余额充足
// ==========================================

use crate::domain::{Direction, Transaction, TransactionType};
use crate::engine::error::{ProcessingError, ProcessingResult};
use crate::engine::savepoint::SavepointScope;
use crate::repository::account_repo::{self, LedgerEntryEntity};
use crate::repository::inventory_repo;
use chrono::Utc;
use rusqlite::Connection;

/// 单一事务类型的副作用执行器
pub trait SideEffectApplier: Send + Sync {
    fn apply(&self, scope: &mut SavepointScope<'_>, tx: &Transaction) -> ProcessingResult<()>;
}

// ==========================================
// 库存
// ==========================================
#[derive(Debug, Default, Clone, Copy)]
pub struct InventoryApplier;

impl SideEffectApplier for InventoryApplier {
    fn apply(&self, scope: &mut SavepointScope<'_>, tx: &Transaction) -> ProcessingResult<()> {
        let conn = scope.conn()?;
        let article_id = required(&tx.article_id, "article_id", tx)?;

        if tx.direction == Direction::Out {
            let available = inventory_repo::stock_of(conn, article_id)?;
            if available < tx.amount {
                return Err(ProcessingError::InsufficientStock {
                    article_id: article_id.to_string(),
                    available,
                    requested: tx.amount,
                });
            }
        }

        let after = inventory_repo::adjust_stock(conn, article_id, tx.direction.signed(tx.amount))?;
        tracing::trace!(transaction_id = %tx.id, article_id, stock_after = after, "库存已调整");
        Ok(())
    }
}

// ==========================================
// 财务
// ==========================================
#[derive(Debug, Default, Clone, Copy)]
pub struct FinancialApplier;

/// 单腿记账参数
struct Posting<'a> {
    entry_id: &'a str,
    account_id: &'a str,
    reference_id: Option<&'a str>,
    direction: Direction,
    amount: f64,
    require_funds: bool,
}

fn post(conn: &Connection, posting: &Posting<'_>) -> ProcessingResult<f64> {
    let balance = account_repo::balance_of(conn, posting.account_id)?
        .ok_or_else(|| ProcessingError::AccountNotFound(posting.account_id.to_string()))?;

    if posting.require_funds && posting.direction == Direction::Out && balance < posting.amount {
        return Err(ProcessingError::InsufficientFunds {
            account_id: posting.account_id.to_string(),
            available: balance,
            requested: posting.amount,
        });
    }

    let balance_after = account_repo::apply_delta(conn, posting.account_id, posting.direction.signed(posting.amount))?
        .ok_or_else(|| ProcessingError::AccountNotFound(posting.account_id.to_string()))?;

    account_repo::insert_ledger_entry(
        conn,
        &LedgerEntryEntity {
            account_id: posting.account_id.to_string(),
            transaction_id: posting.entry_id.to_string(),
            reference_id: posting.reference_id.map(str::to_string),
            direction: posting.direction.as_str().to_string(),
            amount: posting.amount,
            balance_after,
            created_at: Utc::now(),
        },
    )?;

    Ok(balance_after)
}

impl SideEffectApplier for FinancialApplier {
    fn apply(&self, scope: &mut SavepointScope<'_>, tx: &Transaction) -> ProcessingResult<()> {
        let conn = scope.conn()?;
        let account_id = required(&tx.account_id, "account_id", tx)?;

        // target_account_id 对财务事务仅作参考, 只记一条腿
        let balance_after = post(
            conn,
            &Posting {
                entry_id: &tx.id,
                account_id,
                reference_id: tx.reference_id.as_deref(),
                direction: tx.direction,
                amount: tx.amount,
                require_funds: false,
            },
        )?;
        tracing::trace!(transaction_id = %tx.id, account_id, balance_after, "财务记账完成");
        Ok(())
    }
}

// ==========================================
// 转账
// ==========================================
#[derive(Debug, Default, Clone, Copy)]
pub struct TransferApplier;

const TRANSFER_SAVEPOINT: &str = "transfer_legs";

impl SideEffectApplier for TransferApplier {
    fn apply(&self, scope: &mut SavepointScope<'_>, tx: &Transaction) -> ProcessingResult<()> {
        let source = required(&tx.account_id, "account_id", tx)?;
        let target = required(&tx.target_account_id, "target_account_id", tx)?;
        let debit_id = format!("{}:debit", tx.id);
        let credit_id = format!("{}:credit", tx.id);
        let reference_id = tx.reference_id.as_deref();

        let legs = scope.nested(TRANSFER_SAVEPOINT)?;
        let outcome = legs.conn().and_then(|conn| {
            post(
                conn,
                &Posting {
                    entry_id: &debit_id,
                    account_id: source,
                    reference_id,
                    direction: Direction::Out,
                    amount: tx.amount,
                    require_funds: true,
                },
            )?;
            post(
                conn,
                &Posting {
                    entry_id: &credit_id,
                    account_id: target,
                    reference_id,
                    direction: Direction::In,
                    amount: tx.amount,
                    require_funds: false,
                },
            )
        });

        match outcome {
            Ok(_) => {
                legs.release()?;
                tracing::trace!(transaction_id = %tx.id, source, target, amount = tx.amount, "转账完成");
                Ok(())
            }
            Err(e) => {
                legs.rollback()?;
                tracing::debug!(transaction_id = %tx.id, error = %e, "转账失败, 两条腿均已回滚");
                Err(e)
            }
        }
    }
}

// ==========================================
// SideEffectAppliers - 按类型分派
// ==========================================
#[derive(Debug, Default, Clone, Copy)]
pub struct SideEffectAppliers {
    inventory: InventoryApplier,
    financial: FinancialApplier,
    transfer: TransferApplier,
}

impl SideEffectAppliers {
    pub fn new() -> Self {
        Self::default()
    }

    /// 选择事务类型对应的执行器
    pub fn for_type(&self, transaction_type: TransactionType) -> Option<&dyn SideEffectApplier> {
        match transaction_type {
            TransactionType::Inventory => Some(&self.inventory),
            TransactionType::Financial => Some(&self.financial),
            TransactionType::Transfer => Some(&self.transfer),
            TransactionType::Unknown => None,
        }
    }

    pub fn apply(&self, scope: &mut SavepointScope<'_>, tx: &Transaction) -> ProcessingResult<()> {
        match self.for_type(tx.transaction_type) {
            Some(applier) => applier.apply(scope, tx),
            None => Err(ProcessingError::Validation(format!(
                "未知事务类型: transaction_id={}",
                tx.id
            ))),
        }
    }
}

fn required<'a>(value: &'a Option<String>, field: &str, tx: &Transaction) -> ProcessingResult<&'a str> {
    value
        .as_deref()
        .filter(|v| !v.trim().is_empty())
        .ok_or_else(|| ProcessingError::Validation(format!("缺少 {}: transaction_id={}", field, tx.id)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::init_schema;
    use crate::repository::account_repo::{balance_of, ledger_entries, open_account};
    use crate::repository::inventory_repo::{set_stock, stock_of};

    fn setup() -> Connection {
        let conn = Connection::open_in_memory().unwrap();
        init_schema(&conn).unwrap();
        conn
    }

    fn run(conn: &mut Connection, tx: &Transaction) -> ProcessingResult<()> {
        let appliers = SideEffectAppliers::new();
        let mut outer = conn.transaction().unwrap();
        let result = {
            let mut scope = SavepointScope::open(&mut outer, "chunk_1").unwrap();
            let r = appliers.apply(&mut scope, tx);
            if r.is_ok() {
                scope.release().unwrap();
            } else {
                scope.rollback().unwrap();
            }
            r
        };
        outer.commit().unwrap();
        result
    }

    #[test]
    fn test_inventory_in_and_out() {
        let mut conn = setup();
        run(&mut conn, &Transaction::inventory("T1", "ART", 10.0, Direction::In)).unwrap();
        run(&mut conn, &Transaction::inventory("T2", "ART", 4.0, Direction::Out)).unwrap();
        assert_eq!(stock_of(&conn, "ART").unwrap(), 6.0);
    }

    #[test]
    fn test_inventory_insufficient_stock() {
        let mut conn = setup();
        set_stock(&conn, "ART", 2.0).unwrap();
        let err = run(&mut conn, &Transaction::inventory("T1", "ART", 3.0, Direction::Out)).unwrap_err();
        assert!(matches!(err, ProcessingError::InsufficientStock { .. }));
        assert_eq!(stock_of(&conn, "ART").unwrap(), 2.0);

        // 无库存行按 0 计
        let err = run(&mut conn, &Transaction::inventory("T2", "NEW", 1.0, Direction::Out)).unwrap_err();
        assert!(matches!(err, ProcessingError::InsufficientStock { available, .. } if available == 0.0));
    }

    #[test]
    fn test_financial_posting_writes_ledger() {
        let mut conn = setup();
        open_account(&conn, "A1", 100.0).unwrap();
        let tx = Transaction::financial("F1", "A1", 150.0, Direction::Out).with_reference("REF-1");
        run(&mut conn, &tx).unwrap();

        // 财务记账允许透支
        assert_eq!(balance_of(&conn, "A1").unwrap(), Some(-50.0));
        let entries = ledger_entries(&conn, "A1").unwrap();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].transaction_id, "F1");
        assert_eq!(entries[0].reference_id.as_deref(), Some("REF-1"));
        assert_eq!(entries[0].balance_after, -50.0);
    }

    #[test]
    fn test_financial_unknown_account() {
        let mut conn = setup();
        let err = run(&mut conn, &Transaction::financial("F1", "NOPE", 1.0, Direction::In)).unwrap_err();
        assert_eq!(err, ProcessingError::AccountNotFound("NOPE".into()));
    }

    #[test]
    fn test_transfer_moves_balance_with_shared_reference() {
        let mut conn = setup();
        open_account(&conn, "A1", 100.0).unwrap();
        open_account(&conn, "A2", 0.0).unwrap();
        let tx = Transaction::transfer("TR1", "A1", "A2", 40.0).with_reference("REF-9");
        run(&mut conn, &tx).unwrap();

        assert_eq!(balance_of(&conn, "A1").unwrap(), Some(60.0));
        assert_eq!(balance_of(&conn, "A2").unwrap(), Some(40.0));
        let debit = ledger_entries(&conn, "A1").unwrap();
        let credit = ledger_entries(&conn, "A2").unwrap();
        assert_eq!(debit[0].transaction_id, "TR1:debit");
        assert_eq!(credit[0].transaction_id, "TR1:credit");
        assert_eq!(debit[0].reference_id, credit[0].reference_id);
    }

    #[test]
    fn test_transfer_credit_failure_rolls_back_debit() {
        let mut conn = setup();
        open_account(&conn, "A1", 100.0).unwrap();
        let tx = Transaction::transfer("TR1", "A1", "MISSING", 40.0);
        let err = run(&mut conn, &tx).unwrap_err();
        assert_eq!(err, ProcessingError::AccountNotFound("MISSING".into()));

        assert_eq!(balance_of(&conn, "A1").unwrap(), Some(100.0));
        assert!(ledger_entries(&conn, "A1").unwrap().is_empty());
    }

    #[test]
    fn test_transfer_requires_funds() {
        let mut conn = setup();
        open_account(&conn, "A1", 10.0).unwrap();
        open_account(&conn, "A2", 0.0).unwrap();
        let err = run(&mut conn, &Transaction::transfer("TR1", "A1", "A2", 40.0)).unwrap_err();
        assert!(matches!(err, ProcessingError::InsufficientFunds { .. }));
        assert_eq!(balance_of(&conn, "A2").unwrap(), Some(0.0));
    }

    #[test]
    fn test_unknown_type_has_no_applier() {
        let appliers = SideEffectAppliers::new();
        assert!(appliers.for_type(TransactionType::Unknown).is_none());
        assert!(appliers.for_type(TransactionType::Transfer).is_some());
    }
}
