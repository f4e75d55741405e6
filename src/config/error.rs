// ==========================================
// 分块事务批处理引擎 - 配置层错误类型
// ==========================================

use crate::repository::error::RepositoryError;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("配置存储失败: {0}")]
    Storage(#[from] RepositoryError),

    #[error("配置值非法 (key={key}): {message}")]
    Invalid { key: String, message: String },

    #[error("配置快照格式错误: {0}")]
    Snapshot(#[from] serde_json::Error),
}

impl From<rusqlite::Error> for ConfigError {
    fn from(err: rusqlite::Error) -> Self {
        ConfigError::Storage(err.into())
    }
}

pub type ConfigResult<T> = Result<T, ConfigError>;
