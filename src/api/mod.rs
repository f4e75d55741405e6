// ==========================================
// 分块事务批处理引擎 - API 层
// ==========================================
// 职责: 对外接口门面 + 边界错误
// ==========================================

pub mod dto;
pub mod error;
pub mod transaction_api;

pub use dto::{EngineSettings, ReconfigureRequest, SubmitBatchResponse, TransactionDetail};
pub use error::{ApiError, ApiResult, ErrorResponse};
pub use transaction_api::TransactionApi;
