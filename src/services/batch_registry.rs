// ==========================================
// 分块事务批处理引擎 - 批次登记表
// ==========================================
// 职责: 内存中的批次生命周期记录
// 状态机: pending → processing → completed|failed
//         pending → cancelled
// 红线: 只有 pending 可取消; 清理只移除终态记录
// ==========================================

use crate::domain::{BatchRecord, BatchStatus, TransactionResult};
use crate::services::error::{OrchestrationError, OrchestrationResult};
use chrono::{DateTime, Duration, Utc};
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};

#[derive(Debug, Clone, Default)]
pub struct BatchRegistry {
    records: Arc<Mutex<HashMap<String, BatchRecord>>>,
}

impl BatchRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> OrchestrationResult<MutexGuard<'_, HashMap<String, BatchRecord>>> {
        self.records
            .lock()
            .map_err(|e| OrchestrationError::LockError(e.to_string()))
    }

    pub fn insert(&self, record: BatchRecord) -> OrchestrationResult<()> {
        self.lock()?.insert(record.batch_id.clone(), record);
        Ok(())
    }

    pub fn remove(&self, batch_id: &str) -> OrchestrationResult<Option<BatchRecord>> {
        Ok(self.lock()?.remove(batch_id))
    }

    /// 查询批次快照
    pub fn get(&self, batch_id: &str) -> OrchestrationResult<BatchRecord> {
        self.lock()?
            .get(batch_id)
            .cloned()
            .ok_or_else(|| OrchestrationError::BatchNotFound(batch_id.to_string()))
    }

    /// 取消批次（仅 pending）
    pub fn cancel(&self, batch_id: &str) -> OrchestrationResult<BatchRecord> {
        let mut records = self.lock()?;
        let record = records
            .get_mut(batch_id)
            .ok_or_else(|| OrchestrationError::BatchNotFound(batch_id.to_string()))?;

        if !record.status.can_transition_to(BatchStatus::Cancelled) {
            return Err(OrchestrationError::CannotCancel {
                batch_id: batch_id.to_string(),
                status: record.status,
            });
        }

        record.status = BatchStatus::Cancelled;
        record.completed_at = Some(Utc::now());
        Ok(record.clone())
    }

    /// 工作线程领取批次
    ///
    /// # 返回
    /// - `Ok(true)`: 已进入 processing
    /// - `Ok(false)`: 批次已取消或不存在, 应跳过
    pub fn mark_processing(&self, batch_id: &str) -> OrchestrationResult<bool> {
        let mut records = self.lock()?;
        let Some(record) = records.get_mut(batch_id) else {
            return Ok(false);
        };
        if record.status != BatchStatus::Pending {
            return Ok(false);
        }
        record.status = BatchStatus::Processing;
        record.started_at = Some(Utc::now());
        Ok(true)
    }

    /// 写入终态
    pub fn finish(
        &self,
        batch_id: &str,
        status: BatchStatus,
        result: Option<TransactionResult>,
        error: Option<String>,
    ) -> OrchestrationResult<()> {
        let mut records = self.lock()?;
        let Some(record) = records.get_mut(batch_id) else {
            tracing::warn!(batch_id, "批次记录已不存在, 忽略终态写入");
            return Ok(());
        };
        if !record.status.can_transition_to(status) {
            tracing::warn!(batch_id, from = %record.status, to = %status, "非法批次状态流转, 忽略");
            return Ok(());
        }
        record.status = status;
        record.completed_at = Some(Utc::now());
        record.result = result;
        record.error = error;
        Ok(())
    }

    /// 列出批次（按提交时间倒序）
    pub fn list(&self, status: Option<BatchStatus>) -> OrchestrationResult<Vec<BatchRecord>> {
        let records = self.lock()?;
        let mut list: Vec<BatchRecord> = records
            .values()
            .filter(|r| status.map_or(true, |s| r.status == s))
            .cloned()
            .collect();
        list.sort_by(|a, b| {
            b.submitted_at
                .cmp(&a.submitted_at)
                .then_with(|| a.batch_id.cmp(&b.batch_id))
        });
        Ok(list)
    }

    /// pending + processing 数量
    pub fn active_count(&self) -> OrchestrationResult<usize> {
        Ok(self.lock()?.values().filter(|r| !r.status.is_terminal()).count())
    }

    /// 移除早于 max_age 的终态记录
    pub fn cleanup(&self, max_age: Duration, now: DateTime<Utc>) -> OrchestrationResult<usize> {
        let mut records = self.lock()?;
        let before = records.len();
        records.retain(|_, r| !(r.status.is_terminal() && now - r.finished_at() > max_age));
        Ok(before - records.len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn registry_with(ids: &[&str]) -> BatchRegistry {
        let registry = BatchRegistry::new();
        for id in ids {
            registry.insert(BatchRecord::new(*id, 1)).unwrap();
        }
        registry
    }

    #[test]
    fn test_cancel_only_pending() {
        let registry = registry_with(&["B1", "B2"]);
        let cancelled = registry.cancel("B1").unwrap();
        assert_eq!(cancelled.status, BatchStatus::Cancelled);

        assert!(registry.mark_processing("B2").unwrap());
        let err = registry.cancel("B2").unwrap_err();
        assert!(matches!(err, OrchestrationError::CannotCancel { status: BatchStatus::Processing, .. }));
        assert_eq!(registry.get("B2").unwrap().status, BatchStatus::Processing);

        assert!(matches!(registry.cancel("NOPE"), Err(OrchestrationError::BatchNotFound(_))));
    }

    #[test]
    fn test_cancelled_batch_is_skipped() {
        let registry = registry_with(&["B1"]);
        registry.cancel("B1").unwrap();
        assert!(!registry.mark_processing("B1").unwrap());
        assert_eq!(registry.get("B1").unwrap().status, BatchStatus::Cancelled);
    }

    #[test]
    fn test_get_status_is_idempotent() {
        let registry = registry_with(&["B1"]);
        assert_eq!(registry.get("B1").unwrap(), registry.get("B1").unwrap());
    }

    #[test]
    fn test_finish_and_list_filter() {
        let registry = registry_with(&["B1", "B2", "B3"]);
        registry.mark_processing("B1").unwrap();
        registry
            .finish("B1", BatchStatus::Completed, Some(TransactionResult::begin(0).finish()), None)
            .unwrap();

        let completed = registry.list(Some(BatchStatus::Completed)).unwrap();
        assert_eq!(completed.len(), 1);
        assert!(completed[0].result.is_some());
        assert_eq!(registry.list(None).unwrap().len(), 3);
        assert_eq!(registry.active_count().unwrap(), 2);

        // pending 不能直接进入 completed
        registry.finish("B2", BatchStatus::Completed, None, None).unwrap();
        assert_eq!(registry.get("B2").unwrap().status, BatchStatus::Pending);
    }

    #[test]
    fn test_cleanup_only_old_terminal() {
        let registry = registry_with(&["OLD_DONE", "PENDING", "RUNNING"]);
        registry.mark_processing("OLD_DONE").unwrap();
        registry.finish("OLD_DONE", BatchStatus::Failed, None, Some("x".into())).unwrap();
        registry.mark_processing("RUNNING").unwrap();

        // 尚未超过保留期
        assert_eq!(registry.cleanup(Duration::hours(1), Utc::now()).unwrap(), 0);

        let later = Utc::now() + Duration::hours(2);
        assert_eq!(registry.cleanup(Duration::hours(1), later).unwrap(), 1);
        assert!(registry.get("OLD_DONE").is_err());
        assert!(registry.get("PENDING").is_ok());
        assert!(registry.get("RUNNING").is_ok());
    }
}
