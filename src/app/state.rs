// ==========================================
// 分块事务批处理引擎 - 应用上下文
// ==========================================
// 职责: 进程级共享资源的显式初始化与关闭
// - init: 建库 -> 加载配置 -> 启动调度器/监控 -> 组装 API
// - shutdown: 排空批次 -> 停止监控
// ==========================================

use std::sync::{Arc, Mutex};

use rusqlite::Connection;
use thiserror::Error;

use crate::api::TransactionApi;
use crate::config::{ConfigError, ConfigManager, EngineConfig, MonitoringConfig};
use crate::db::bootstrap;
use crate::repository::TransactionRepository;
use crate::services::{BatchOrchestrator, MonitoringError, MonitoringService, OrchestrationError};

/// 数据库路径环境变量
pub const ENV_DB_PATH: &str = "TXN_ENGINE_DB_PATH";

#[derive(Error, Debug)]
pub enum AppError {
    #[error("数据库初始化失败: {0}")]
    Database(#[from] rusqlite::Error),

    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Orchestration(#[from] OrchestrationError),

    #[error(transparent)]
    Monitoring(#[from] MonitoringError),
}

/// 应用上下文
///
/// 持有调度器、监控服务与 API 实例, 无全局单例
pub struct AppContext {
    /// 数据库路径
    pub db_path: String,

    pub config: Arc<ConfigManager>,

    pub engine_config: EngineConfig,

    pub monitoring_config: MonitoringConfig,

    pub orchestrator: Arc<BatchOrchestrator>,

    pub monitoring: Arc<MonitoringService>,

    /// 事务 API
    pub transaction_api: Arc<TransactionApi>,
}

impl AppContext {
    /// 初始化应用上下文（需在 tokio 运行时内调用）
    ///
    /// # 参数
    /// - db_path: 数据库文件路径
    ///
    /// # 说明
    /// 1. 打开数据库并确保 schema
    /// 2. 从 config_kv 加载配置（缺省回落默认值）
    /// 3. 启动批次调度器与监控服务
    /// 4. 组装 TransactionApi
    pub fn init(db_path: impl Into<String>) -> Result<Self, AppError> {
        let db_path = db_path.into();
        tracing::info!(db_path = %db_path, "初始化应用上下文");

        // 共享管理连接（配置 + 事务查询）
        let conn: Arc<Mutex<Connection>> = Arc::new(Mutex::new(bootstrap(&db_path)?));
        let config = Arc::new(ConfigManager::from_connection(Arc::clone(&conn)));
        let transactions = Arc::new(TransactionRepository::new(Arc::clone(&conn)));

        let engine_config = config.load_engine_config()?;
        let monitoring_config = config.load_monitoring_config()?;

        let orchestrator = Arc::new(BatchOrchestrator::start_sqlite(&db_path, &engine_config)?);
        let monitoring = Arc::new(MonitoringService::new(db_path.clone(), monitoring_config.clone())?);
        monitoring.start()?;

        let transaction_api = Arc::new(TransactionApi::new(
            Arc::clone(&orchestrator),
            Arc::clone(&monitoring),
            transactions,
            Arc::clone(&config),
        ));

        tracing::info!("应用上下文初始化完成");
        Ok(Self {
            db_path,
            config,
            engine_config,
            monitoring_config,
            orchestrator,
            monitoring,
            transaction_api,
        })
    }

    /// 关闭: 等待所有待处理/处理中批次完成后停止监控
    pub async fn shutdown(&self) -> Result<(), AppError> {
        tracing::info!("开始关闭应用上下文");
        self.orchestrator.shutdown(true).await?;
        self.monitoring.stop().await?;
        tracing::info!("应用上下文已关闭");
        Ok(())
    }
}

// ==========================================
// 默认数据库路径
// ==========================================

/// 获取默认数据库路径
///
/// # 返回
/// - 环境变量 TXN_ENGINE_DB_PATH（非空时优先）
/// - 开发环境: 用户数据目录/txn-batch-engine-dev/txn_batch_engine.db
/// - 生产环境: 用户数据目录/txn-batch-engine/txn_batch_engine.db
pub fn get_default_db_path() -> String {
    use std::path::PathBuf;

    if let Ok(path) = std::env::var(ENV_DB_PATH) {
        let trimmed = path.trim();
        if !trimmed.is_empty() {
            return trimmed.to_string();
        }
    }

    let mut path = PathBuf::from("./txn_batch_engine.db");

    if let Some(data_dir) = dirs::data_dir() {
        #[cfg(debug_assertions)]
        {
            path = data_dir.join("txn-batch-engine-dev");
        }

        #[cfg(not(debug_assertions))]
        {
            path = data_dir.join("txn-batch-engine");
        }

        std::fs::create_dir_all(&path).ok();
        path = path.join("txn_batch_engine.db");
    }

    path.to_string_lossy().to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_get_default_db_path() {
        let path = get_default_db_path();
        assert!(!path.is_empty());
        assert!(path.ends_with(".db"));
    }

    #[tokio::test]
    async fn test_init_and_shutdown() {
        let file = tempfile::NamedTempFile::new().unwrap();
        let ctx = AppContext::init(file.path().to_string_lossy().to_string()).unwrap();

        assert!(ctx.monitoring.is_running());
        assert_eq!(ctx.engine_config, EngineConfig::default());
        let settings = ctx.transaction_api.settings().unwrap();
        assert!(settings.accepting);

        ctx.shutdown().await.unwrap();
        assert!(!ctx.orchestrator.is_accepting());
        assert!(!ctx.monitoring.is_running());
    }
}
