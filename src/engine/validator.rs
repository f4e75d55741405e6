// ==========================================
// 分块事务批处理引擎 - 事务校验器
// ==========================================
// 职责: 单笔事务的无状态规则校验
// 红线: 纯函数, 无副作用, 结果确定
// ==========================================
// 校验顺序:
// 1. id 非空
// 2. 类型可识别
// 3. 金额为有限正数
// 4. 类型相关必填字段
// ==========================================

use crate::domain::{Transaction, TransactionType};
use crate::engine::error::{ProcessingError, ProcessingResult};

fn is_blank(v: &Option<String>) -> bool {
    v.as_deref().map(|s| s.trim().is_empty()).unwrap_or(true)
}

// ==========================================
// TransactionValidator - 事务校验器
// ==========================================
#[derive(Debug, Default, Clone, Copy)]
pub struct TransactionValidator;

impl TransactionValidator {
    pub fn new() -> Self {
        Self
    }

    /// 校验单笔事务
    ///
    /// # 返回
    /// - `Ok(())`: 通过
    /// - `Err(ProcessingError::Validation)`: 失败原因（可读文本）
    pub fn validate(&self, tx: &Transaction) -> ProcessingResult<()> {
        if tx.id.trim().is_empty() {
            return Err(ProcessingError::Validation("事务ID不能为空".to_string()));
        }

        if tx.transaction_type == TransactionType::Unknown {
            return Err(unknown_type(tx));
        }

        if !tx.amount.is_finite() || tx.amount <= 0.0 {
            return Err(ProcessingError::Validation(format!(
                "金额必须大于0: transaction_id={}, amount={}",
                tx.id, tx.amount
            )));
        }

        match tx.transaction_type {
            TransactionType::Inventory => {
                if is_blank(&tx.article_id) {
                    return Err(ProcessingError::Validation(format!(
                        "库存事务缺少 article_id: transaction_id={}",
                        tx.id
                    )));
                }
            }
            TransactionType::Financial => {
                if is_blank(&tx.account_id) {
                    return Err(ProcessingError::Validation(format!(
                        "财务事务缺少 account_id: transaction_id={}",
                        tx.id
                    )));
                }
            }
            TransactionType::Transfer => {
                if is_blank(&tx.account_id) {
                    return Err(ProcessingError::Validation(format!(
                        "转账事务缺少 account_id: transaction_id={}",
                        tx.id
                    )));
                }
                if is_blank(&tx.target_account_id) {
                    return Err(ProcessingError::Validation(format!(
                        "转账事务缺少 target_account_id: transaction_id={}",
                        tx.id
                    )));
                }
                if tx.account_id == tx.target_account_id {
                    return Err(ProcessingError::Validation(format!(
                        "转账源账户与目标账户不能相同: transaction_id={}",
                        tx.id
                    )));
                }
            }
            // 已在上方拦截
            TransactionType::Unknown => return Err(unknown_type(tx)),
        }

        Ok(())
    }

    /// 校验一个分块, 遇到第一条失败即停止
    ///
    /// # 返回
    /// - `Err((index, error))`: 第一条失败事务在分块中的位置及原因
    pub fn validate_chunk(&self, chunk: &[Transaction]) -> Result<(), (usize, ProcessingError)> {
        for (idx, tx) in chunk.iter().enumerate() {
            self.validate(tx).map_err(|e| (idx, e))?;
        }
        Ok(())
    }
}

fn unknown_type(tx: &Transaction) -> ProcessingError {
    ProcessingError::Validation(format!("未知事务类型: transaction_id={}", tx.id))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::Direction;

    #[test]
    fn test_valid_transactions() {
        let v = TransactionValidator::new();
        assert!(v.validate(&Transaction::inventory("T1", "ART", 1.0, Direction::In)).is_ok());
        assert!(v.validate(&Transaction::financial("T2", "A1", 9.5, Direction::Out)).is_ok());
        assert!(v.validate(&Transaction::transfer("T3", "A1", "A2", 3.0)).is_ok());
    }

    #[test]
    fn test_blank_id() {
        let v = TransactionValidator::new();
        let tx = Transaction::inventory("  ", "ART", 1.0, Direction::In);
        assert!(v.validate(&tx).unwrap_err().is_validation());
    }

    #[test]
    fn test_amount_must_be_positive() {
        let v = TransactionValidator::new();
        for amount in [0.0, -1.0, f64::NAN, f64::INFINITY] {
            let tx = Transaction::inventory("T1", "ART", amount, Direction::In);
            let err = v.validate(&tx).unwrap_err();
            assert!(err.to_string().contains("金额必须大于0"), "amount={}", amount);
        }
    }

    #[test]
    fn test_unknown_type() {
        let v = TransactionValidator::new();
        let mut tx = Transaction::inventory("T1", "ART", 1.0, Direction::In);
        tx.transaction_type = TransactionType::Unknown;
        assert!(v.validate(&tx).unwrap_err().to_string().contains("未知事务类型"));

        // 类型与金额同时非法时, 先报类型
        tx.amount = -3.0;
        assert!(v.validate(&tx).unwrap_err().to_string().contains("未知事务类型"));
    }

    #[test]
    fn test_type_specific_fields() {
        let v = TransactionValidator::new();

        let mut inv = Transaction::inventory("T1", "ART", 1.0, Direction::In);
        inv.article_id = None;
        assert!(v.validate(&inv).is_err());

        let mut fin = Transaction::financial("T2", "A1", 1.0, Direction::In);
        fin.account_id = Some(String::new());
        assert!(v.validate(&fin).is_err());

        let mut tr = Transaction::transfer("T3", "A1", "A2", 1.0);
        tr.target_account_id = None;
        assert!(v.validate(&tr).is_err());

        let same = Transaction::transfer("T4", "A1", "A1", 1.0);
        assert!(v.validate(&same).unwrap_err().to_string().contains("不能相同"));
    }

    #[test]
    fn test_validate_chunk_reports_first_failure() {
        let v = TransactionValidator::new();
        let chunk = vec![
            Transaction::inventory("T1", "ART", 1.0, Direction::In),
            Transaction::inventory("T2", "ART", -1.0, Direction::In),
            Transaction::inventory("", "ART", 1.0, Direction::In),
        ];
        let (idx, err) = v.validate_chunk(&chunk).unwrap_err();
        assert_eq!(idx, 1);
        assert!(err.to_string().contains("T2"));
    }
}
