// ==========================================
// 分块事务批处理引擎 - 监控指标快照
// ==========================================

use crate::domain::compute_success_rate;
use crate::repository::{ErrorCount, WindowAggregates};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// 一次采集的窗口指标
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MetricsSnapshot {
    pub collected_at: DateTime<Utc>,
    pub window_secs: u64,
    pub total: u64,
    pub completed: u64,
    pub failed: u64,
    /// 百分比: completed / (completed + failed), 无终态事务时为 100
    pub success_rate: f64,
    pub avg_latency_ms: Option<f64>,
    pub top_errors: Vec<ErrorCount>,
}

impl MetricsSnapshot {
    pub fn from_aggregates(
        aggregates: WindowAggregates,
        top_errors: Vec<ErrorCount>,
        window_secs: u64,
        collected_at: DateTime<Utc>,
    ) -> Self {
        let finished = aggregates.completed + aggregates.failed;
        Self {
            collected_at,
            window_secs,
            total: aggregates.total,
            completed: aggregates.completed,
            failed: aggregates.failed,
            success_rate: compute_success_rate(aggregates.completed as usize, finished as usize),
            avg_latency_ms: aggregates.avg_latency_ms,
            top_errors,
        }
    }
}
