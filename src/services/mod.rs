// ==========================================
// 分块事务批处理引擎 - 服务层
// ==========================================
// 职责: 批次调度（工作池/登记表）与监控告警
// ==========================================

pub mod batch_orchestrator;
pub mod batch_registry;
pub mod error;
pub mod monitoring;

pub use batch_orchestrator::{BatchExecutor, BatchOrchestrator, SqliteBatchExecutor};
pub use batch_registry::BatchRegistry;
pub use error::{MonitoringError, MonitoringResult, OrchestrationError, OrchestrationResult};
pub use monitoring::{
    Alert, AlertKind, AlertNotifier, DetailedMetrics, LogAlertNotifier, MetricsSnapshot, MonitoringService,
};
