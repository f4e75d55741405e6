// ==========================================
// 分块事务批处理引擎 - API 数据传输对象
// ==========================================

use crate::domain::{BatchRecord, BatchStatus, Transaction, TransactionStatusRecord};
use serde::{Deserialize, Serialize};

/// 提交批次的响应
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SubmitBatchResponse {
    pub batch_id: String,
    pub status: BatchStatus,
    pub total: usize,
}

impl From<&BatchRecord> for SubmitBatchResponse {
    fn from(record: &BatchRecord) -> Self {
        Self {
            batch_id: record.batch_id.clone(),
            status: record.status,
            total: record.total,
        }
    }
}

/// 事务详情: 落库事务 + 状态轨迹
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TransactionDetail {
    pub transaction: Transaction,
    pub history: Vec<TransactionStatusRecord>,
}

/// 运行时调整请求
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ReconfigureRequest {
    pub max_workers: Option<usize>,
    pub chunk_size: Option<usize>,
}

/// 调度器概况
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EngineSettings {
    pub max_workers: usize,
    pub chunk_size: usize,
    pub accepting: bool,
    pub active_batches: usize,
}
