// ==========================================
// 分块事务批处理引擎 - 调度层错误类型
// ==========================================
// 工作线程内的错误在边界处被捕获, 转换为 failed 批次记录;
// 其余错误原样返回给调用方
// ==========================================

use crate::domain::BatchStatus;
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum OrchestrationError {
    #[error("批次不存在: batch_id={0}")]
    BatchNotFound(String),

    #[error("批次无法取消: batch_id={batch_id}, 当前状态={status}")]
    CannotCancel { batch_id: String, status: BatchStatus },

    #[error("提交队列已满: capacity={0}")]
    QueueFull(usize),

    #[error("批次过大: size={size}, 上限={max}")]
    BatchTooLarge { size: usize, max: usize },

    #[error("调度器正在关闭, 不再接受新批次")]
    ShuttingDown,

    #[error("仍有 {active} 个批次待处理/处理中, 拒绝关闭")]
    Busy { active: usize },

    #[error("工作线程异常: {0}")]
    WorkerCrashed(String),

    #[error("配置非法: {0}")]
    InvalidConfig(String),

    #[error("打开数据库会话失败: {0}")]
    SessionOpen(String),

    #[error("批次登记表锁获取失败: {0}")]
    LockError(String),
}

pub type OrchestrationResult<T> = Result<T, OrchestrationError>;

/// 监控错误（只记录日志, 不影响调度）
#[derive(Error, Debug)]
pub enum MonitoringError {
    #[error("监控查询失败: {0}")]
    Repository(#[from] crate::repository::error::RepositoryError),

    #[error("打开只读连接失败: {0}")]
    Connection(String),

    #[error("监控任务异常: {0}")]
    Task(String),

    #[error("监控状态锁获取失败: {0}")]
    LockError(String),

    #[error("监控配置非法: {0}")]
    InvalidConfig(String),
}

pub type MonitoringResult<T> = Result<T, MonitoringError>;
