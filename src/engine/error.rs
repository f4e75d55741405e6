// ==========================================
// 分块事务批处理引擎 - 引擎层错误类型
// ==========================================
// 分类:
// - Validation: 输入不合法, 调用方可修正
// - Application: 业务规则违反（库存不足/余额不足/账户不存在/重复事务）
// - Database: 连接/传输层失败
// 传播: Validation/Application 在分块内被捕获并回滚保存点, 不影响兄弟分块
// ==========================================

use crate::repository::error::RepositoryError;
use thiserror::Error;

/// 单笔事务处理错误
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ProcessingError {
    // ===== 校验错误 =====
    #[error("校验失败: {0}")]
    Validation(String),

    // ===== 业务规则错误 =====
    #[error("库存不足: article_id={article_id}, 当前库存={available}, 需求={requested}")]
    InsufficientStock {
        article_id: String,
        available: f64,
        requested: f64,
    },

    #[error("余额不足: account_id={account_id}, 当前余额={available}, 需求={requested}")]
    InsufficientFunds {
        account_id: String,
        available: f64,
        requested: f64,
    },

    #[error("账户不存在: account_id={0}")]
    AccountNotFound(String),

    #[error("事务ID重复: transaction_id={0}")]
    DuplicateTransaction(String),

    // ===== 数据库错误 =====
    #[error("数据库错误: {0}")]
    Database(String),
}

impl ProcessingError {
    pub fn is_validation(&self) -> bool {
        matches!(self, ProcessingError::Validation(_))
    }

    pub fn is_database(&self) -> bool {
        matches!(self, ProcessingError::Database(_))
    }

    /// 是否属于业务规则错误
    pub fn is_application(&self) -> bool {
        !self.is_validation() && !self.is_database()
    }

    /// 错误类别（落库与监控聚合使用, 不含具体ID与数值）
    pub fn kind(&self) -> &'static str {
        match self {
            ProcessingError::Validation(_) => "validation",
            ProcessingError::InsufficientStock { .. } => "insufficient_stock",
            ProcessingError::InsufficientFunds { .. } => "insufficient_funds",
            ProcessingError::AccountNotFound(_) => "account_not_found",
            ProcessingError::DuplicateTransaction(_) => "duplicate_transaction",
            ProcessingError::Database(_) => "database",
        }
    }
}

impl From<RepositoryError> for ProcessingError {
    fn from(err: RepositoryError) -> Self {
        ProcessingError::Database(err.to_string())
    }
}

impl From<rusqlite::Error> for ProcessingError {
    fn from(err: rusqlite::Error) -> Self {
        ProcessingError::Database(err.to_string())
    }
}

/// Result 类型别名
pub type ProcessingResult<T> = Result<T, ProcessingError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_classification() {
        assert!(ProcessingError::Validation("x".into()).is_validation());
        assert!(ProcessingError::Database("x".into()).is_database());
        assert!(ProcessingError::AccountNotFound("A".into()).is_application());
        assert!(ProcessingError::InsufficientStock {
            article_id: "ART".into(),
            available: 1.0,
            requested: 2.0,
        }
        .is_application());
    }

    #[test]
    fn test_repository_error_maps_to_database() {
        let err: ProcessingError = RepositoryError::LockError("poisoned".into()).into();
        assert!(err.is_database());
        assert!(err.to_string().contains("poisoned"));
    }
}
