// ==========================================
// 分块事务批处理引擎 - 数据仓储层
// ==========================================
// 红线: Repository 不含业务逻辑
// ==========================================
// 职责: 提供数据访问接口,屏蔽数据库细节
// 约束: 所有查询使用参数化,防止 SQL 注入
// ==========================================

pub mod account_repo;
pub mod error;
pub mod inventory_repo;
pub mod monitoring_repo;
pub mod transaction_repo;

// 重导出核心仓储
pub use account_repo::LedgerEntryEntity;
pub use error::{RepositoryError, RepositoryResult};
pub use monitoring_repo::{ErrorCount, MonitoringRepository, WindowAggregates};
pub use transaction_repo::TransactionRepository;
