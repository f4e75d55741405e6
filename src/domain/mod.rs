// ==========================================
// 分块事务批处理引擎 - 领域模型层
// ==========================================
// 职责: 定义领域实体、封闭类型枚举
// 红线: 不含数据访问逻辑,不含引擎逻辑
// ==========================================

pub mod batch;
pub mod transaction;
pub mod types;

// 重导出核心类型
pub use batch::BatchRecord;
pub use transaction::{
    compute_success_rate, FailedTransaction, Transaction, TransactionResult,
    TransactionStatusRecord,
};
pub use types::{BatchStatus, Direction, TransactionState, TransactionType};
