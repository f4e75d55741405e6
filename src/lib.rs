// ==========================================
// 分块事务批处理引擎 - 核心库
// ==========================================
// 技术栈: Rust + SQLite (rusqlite) + tokio
// 定位: 分块提交的事务批处理, 保存点级别的分块原子性
// ==========================================

// ==========================================
// 模块声明
// ==========================================

// 领域层 - 实体与类型
pub mod domain;

// 数据仓储层 - 数据访问
pub mod repository;

// 引擎层 - 校验/副作用/分块提交
pub mod engine;

// 服务层 - 批次调度与监控
pub mod services;

// 导入层 - 批次文件
pub mod importer;

// 配置层 - 系统配置
pub mod config;

// 数据库基础设施（连接初始化/PRAGMA 统一）
pub mod db;

// 日志系统
pub mod logging;

// 性能埋点
pub mod perf;

// API 层 - 业务接口
pub mod api;

// 应用层 - 进程上下文
pub mod app;

// ==========================================
// 重导出核心类型
// ==========================================

pub use domain::{
    BatchRecord, BatchStatus, Direction, Transaction, TransactionResult, TransactionState,
    TransactionType,
};

pub use engine::{ChunkedCommitEngine, ProcessingError, TransactionValidator};

pub use services::{BatchOrchestrator, MonitoringService};

pub use api::{ApiError, TransactionApi};

pub use app::AppContext;

// ==========================================
// 常量定义
// ==========================================

// 系统版本
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

// 系统名称
pub const APP_NAME: &str = "分块事务批处理引擎";
