// ==========================================
// 分块事务批处理引擎 - 引擎层
// ==========================================
// 职责: 校验、副作用执行、分块提交
// 红线: 引擎只通过仓储函数访问数据, 不直接拼业务 SQL
// ==========================================

pub mod appliers;
pub mod chunked;
pub mod error;
pub mod savepoint;
pub mod validator;

// 重导出核心引擎
pub use appliers::{FinancialApplier, InventoryApplier, SideEffectApplier, SideEffectAppliers, TransferApplier};
pub use chunked::{ChunkedCommitEngine, DEFAULT_CHUNK_SIZE};
pub use error::{ProcessingError, ProcessingResult};
pub use savepoint::SavepointScope;
pub use validator::TransactionValidator;
