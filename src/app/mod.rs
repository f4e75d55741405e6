// ==========================================
// 分块事务批处理引擎 - 应用层
// ==========================================
// 职责: 进程级上下文（显式 init / shutdown）
// ==========================================

pub mod state;

pub use state::{get_default_db_path, AppContext, AppError, ENV_DB_PATH};
