// ==========================================
// 分块事务批处理引擎 - API层错误类型
// ==========================================
// 职责: 将各层错误转换为边界错误, 并给出状态码/错误码
// 状态码: 400 输入非法/状态不允许; 404 未知资源;
//        409 冲突; 503 暂不可用; 500 内部/数据库
// ==========================================

use crate::config::ConfigError;
use crate::engine::ProcessingError;
use crate::repository::error::RepositoryError;
use crate::services::{MonitoringError, OrchestrationError};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// API层错误类型
#[derive(Error, Debug)]
pub enum ApiError {
    // ===== 调用方错误 =====
    #[error("无效输入: {0}")]
    InvalidInput(String),

    #[error("资源未找到: {0}")]
    NotFound(String),

    #[error("无效的状态转换: from={from} to={to}")]
    InvalidStateTransition { from: String, to: String },

    #[error("操作冲突: {0}")]
    Conflict(String),

    #[error("服务暂不可用: {0}")]
    ServiceUnavailable(String),

    // ===== 服务端错误 =====
    #[error("数据库错误: {0}")]
    DatabaseError(String),

    #[error("内部错误: {0}")]
    InternalError(String),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl ApiError {
    /// HTTP 语义状态码
    pub fn status_code(&self) -> u16 {
        match self {
            ApiError::InvalidInput(_) | ApiError::InvalidStateTransition { .. } => 400,
            ApiError::NotFound(_) => 404,
            ApiError::Conflict(_) => 409,
            ApiError::ServiceUnavailable(_) => 503,
            ApiError::DatabaseError(_) | ApiError::InternalError(_) | ApiError::Other(_) => 500,
        }
    }

    /// 错误码
    pub fn code(&self) -> &'static str {
        match self {
            ApiError::InvalidInput(_) => "INVALID_INPUT",
            ApiError::NotFound(_) => "NOT_FOUND",
            ApiError::InvalidStateTransition { .. } => "INVALID_STATE_TRANSITION",
            ApiError::Conflict(_) => "CONFLICT",
            ApiError::ServiceUnavailable(_) => "SERVICE_UNAVAILABLE",
            ApiError::DatabaseError(_) => "DATABASE_ERROR",
            ApiError::InternalError(_) => "INTERNAL_ERROR",
            ApiError::Other(_) => "OTHER_ERROR",
        }
    }

    pub fn to_response(&self) -> ErrorResponse {
        ErrorResponse {
            status: self.status_code(),
            code: self.code().to_string(),
            message: self.to_string(),
        }
    }
}

/// 错误响应体
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub status: u16,
    pub code: String,
    pub message: String,
}

// ==========================================
// 各层错误转换
// ==========================================
impl From<RepositoryError> for ApiError {
    fn from(err: RepositoryError) -> Self {
        match err {
            RepositoryError::NotFound { entity, id } => ApiError::NotFound(format!("{}(id={})不存在", entity, id)),
            RepositoryError::InvalidStateTransition { from, to } => ApiError::InvalidStateTransition { from, to },
            RepositoryError::FieldValueError { field, message } => {
                ApiError::InternalError(format!("字段{}错误: {}", field, message))
            }
            RepositoryError::InternalError(msg) => ApiError::InternalError(msg),
            RepositoryError::Other(err) => ApiError::Other(err),
            other => ApiError::DatabaseError(other.to_string()),
        }
    }
}

impl From<OrchestrationError> for ApiError {
    fn from(err: OrchestrationError) -> Self {
        match err {
            OrchestrationError::BatchNotFound(id) => ApiError::NotFound(format!("批次(id={})不存在", id)),
            OrchestrationError::CannotCancel { status, .. } => ApiError::InvalidStateTransition {
                from: status.to_string(),
                to: "cancelled".to_string(),
            },
            OrchestrationError::BatchTooLarge { .. } | OrchestrationError::InvalidConfig(_) => {
                ApiError::InvalidInput(err.to_string())
            }
            OrchestrationError::QueueFull(_) | OrchestrationError::ShuttingDown => {
                ApiError::ServiceUnavailable(err.to_string())
            }
            OrchestrationError::Busy { .. } => ApiError::Conflict(err.to_string()),
            OrchestrationError::SessionOpen(_) => ApiError::DatabaseError(err.to_string()),
            OrchestrationError::WorkerCrashed(_) | OrchestrationError::LockError(_) => {
                ApiError::InternalError(err.to_string())
            }
        }
    }
}

impl From<ProcessingError> for ApiError {
    fn from(err: ProcessingError) -> Self {
        match err {
            ProcessingError::Database(msg) => ApiError::DatabaseError(msg),
            other => ApiError::InvalidInput(other.to_string()),
        }
    }
}

impl From<MonitoringError> for ApiError {
    fn from(err: MonitoringError) -> Self {
        match err {
            MonitoringError::InvalidConfig(msg) => ApiError::InvalidInput(msg),
            MonitoringError::Repository(e) => e.into(),
            MonitoringError::Connection(msg) => ApiError::DatabaseError(msg),
            other => ApiError::InternalError(other.to_string()),
        }
    }
}

impl From<ConfigError> for ApiError {
    fn from(err: ConfigError) -> Self {
        match err {
            ConfigError::Invalid { .. } => ApiError::InvalidInput(err.to_string()),
            ConfigError::Storage(e) => e.into(),
            ConfigError::Snapshot(e) => ApiError::InternalError(e.to_string()),
        }
    }
}

/// Result 类型别名
pub type ApiResult<T> = Result<T, ApiError>;

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::BatchStatus;

    #[test]
    fn test_status_classes() {
        let not_found: ApiError = OrchestrationError::BatchNotFound("B1".into()).into();
        assert_eq!(not_found.status_code(), 404);

        let cancel: ApiError = OrchestrationError::CannotCancel {
            batch_id: "B1".into(),
            status: BatchStatus::Processing,
        }
        .into();
        assert_eq!(cancel.status_code(), 400);
        assert!(cancel.to_string().contains("processing"));

        let db: ApiError = RepositoryError::DatabaseQueryError("disk I/O error".into()).into();
        assert_eq!(db.status_code(), 500);

        let invalid: ApiError = ProcessingError::Validation("金额必须大于0".into()).into();
        assert_eq!(invalid.status_code(), 400);

        let full: ApiError = OrchestrationError::QueueFull(8).into();
        assert_eq!(full.to_response().code, "SERVICE_UNAVAILABLE");
    }
}
