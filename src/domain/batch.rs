// ==========================================
// 分块事务批处理引擎 - 批次领域模型
// ==========================================
// 职责: 异步批次的生命周期记录
// 存储: 仅存在于内存批次登记表, 与持久化事务行解耦
// ==========================================

use crate::domain::transaction::TransactionResult;
use crate::domain::types::BatchStatus;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

// ==========================================
// BatchRecord - 批次记录
// ==========================================
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BatchRecord {
    pub batch_id: String,
    pub status: BatchStatus,
    pub total: usize,
    pub submitted_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub result: Option<TransactionResult>,
    pub error: Option<String>,
}

impl BatchRecord {
    pub fn new(batch_id: impl Into<String>, total: usize) -> Self {
        Self {
            batch_id: batch_id.into(),
            status: BatchStatus::Pending,
            total,
            submitted_at: Utc::now(),
            started_at: None,
            completed_at: None,
            result: None,
            error: None,
        }
    }

    /// 记录进入终态的参考时间（completed_at 缺失时回退到 submitted_at）
    pub fn finished_at(&self) -> DateTime<Utc> {
        self.completed_at.unwrap_or(self.submitted_at)
    }
}
