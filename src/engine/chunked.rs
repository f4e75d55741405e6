// ==========================================
// 分块事务批处理引擎 - 分块提交引擎
// ==========================================
// 流程（每个分块串行）:
// 1. 外层事务内开启保存点 chunk_{i}
// 2. 逐条校验, 遇到第一条非法即停止
// 3. 全部合法则按顺序执行副作用, 遇到第一个错误即停止
// 4. 成功: 保存点内写事务行 + processing→completed 轨迹, 释放保存点
// 5. 失败: 回滚保存点, 分块内全部事务记为失败, 在外层事务写 failed 轨迹
// 6. 无论成败继续下一个分块
// 全部分块结束后提交外层事务; 开启或提交失败时整批降级为全部失败
// ==========================================
// 红线: 保存点不跨分块持有
// ==========================================

use crate::domain::{Transaction, TransactionResult, TransactionState};
use crate::engine::appliers::SideEffectAppliers;
use crate::engine::error::{ProcessingError, ProcessingResult};
use crate::engine::savepoint::SavepointScope;
use crate::engine::validator::TransactionValidator;
use crate::perf::PerfGuard;
use crate::repository::error::RepositoryError;
use crate::repository::transaction_repo::{self, FailureDetail};
use chrono::{DateTime, Utc};
use rusqlite::{Connection, Transaction as SqlTransaction, TransactionBehavior};

/// 默认分块大小
pub const DEFAULT_CHUNK_SIZE: usize = 100;

/// 分块失败原因
#[derive(Debug, Clone)]
struct ChunkFailure {
    /// 触发失败的事务（空ID时为批内序号）
    trigger: String,
    error: ProcessingError,
    persisted_message: String,
}

impl ChunkFailure {
    fn at(tx: &Transaction, position: usize, error: ProcessingError) -> Self {
        let trigger = if tx.id.trim().is_empty() {
            format!("#{}", position + 1)
        } else {
            tx.id.clone()
        };
        Self::new(trigger, error)
    }

    fn scope(error: ProcessingError) -> Self {
        Self::new(String::new(), error)
    }

    fn new(trigger: String, error: ProcessingError) -> Self {
        let persisted_message = error.to_string();
        Self {
            trigger,
            error,
            persisted_message,
        }
    }

    /// 落库失败明细: 消息不含触发事务, 触发者单独成列
    fn detail(&self) -> FailureDetail<'_> {
        FailureDetail {
            kind: self.error.kind(),
            message: &self.persisted_message,
            trigger_id: Some(self.trigger.as_str()).filter(|t| !t.is_empty()),
        }
    }

    /// 记录到某条事务上的失败原因
    fn message_for(&self, tx: &Transaction) -> String {
        if self.trigger.is_empty() || self.trigger == tx.id {
            self.error.to_string()
        } else {
            format!("同分块事务 {} 失败: {}", self.trigger, self.error)
        }
    }
}

// ==========================================
// ChunkedCommitEngine
// ==========================================
#[derive(Debug, Clone)]
pub struct ChunkedCommitEngine {
    chunk_size: usize,
    validator: TransactionValidator,
    appliers: SideEffectAppliers,
}

impl Default for ChunkedCommitEngine {
    fn default() -> Self {
        Self {
            chunk_size: DEFAULT_CHUNK_SIZE,
            validator: TransactionValidator::new(),
            appliers: SideEffectAppliers::new(),
        }
    }
}

impl ChunkedCommitEngine {
    /// 创建引擎
    ///
    /// # 参数
    /// - chunk_size: 分块大小, 必须 >= 1
    pub fn new(chunk_size: usize) -> ProcessingResult<Self> {
        if chunk_size == 0 {
            return Err(ProcessingError::Validation("chunk_size 必须 >= 1".to_string()));
        }
        Ok(Self {
            chunk_size,
            ..Self::default()
        })
    }

    pub fn chunk_size(&self) -> usize {
        self.chunk_size
    }

    /// 分块处理一批事务
    ///
    /// # 参数
    /// - conn: 当前会话（独占, 不与其他批次共享）
    /// - batch_id: 写入事务行的批次ID
    /// - transactions: 按输入顺序处理
    ///
    /// # 返回
    /// 聚合结果; successful + failed == transactions.len()
    pub fn process(&self, conn: &mut Connection, batch_id: &str, transactions: &[Transaction]) -> TransactionResult {
        let mut result = TransactionResult::begin(transactions.len());
        if transactions.is_empty() {
            return result.finish();
        }

        let _perf = PerfGuard::new("chunked_commit").with_label(batch_id);
        let all_ids = || transactions.iter().map(|tx| tx.id.as_str());

        let mut outer = match conn.transaction_with_behavior(TransactionBehavior::Immediate) {
            Ok(outer) => outer,
            Err(e) => {
                let message = ProcessingError::from(e).to_string();
                tracing::error!(batch_id, error = %message, "开启外层事务失败, 整批标记失败");
                result.downgrade_all(all_ids(), &message);
                return result.finish();
            }
        };

        let chunk_count = transactions.len().div_ceil(self.chunk_size);
        for (chunk_idx, chunk) in transactions.chunks(self.chunk_size).enumerate() {
            let chunk_no = chunk_idx + 1;
            let offset = chunk_idx * self.chunk_size;
            tracing::debug!(
                batch_id,
                chunk = chunk_no,
                chunk_count,
                range = %format!("{}..{}", offset, offset + chunk.len()),
                "处理分块"
            );

            match self.process_chunk(&mut outer, batch_id, chunk_no, offset, chunk) {
                Ok(()) => result.record_success(chunk.len()),
                Err(failure) => {
                    tracing::warn!(
                        batch_id,
                        chunk = chunk_no,
                        range = %format!("{}..{}", offset, offset + chunk.len()),
                        trigger = %failure.trigger,
                        error = %failure.error,
                        "分块失败, 已回滚"
                    );
                    for tx in chunk {
                        result.record_failure(tx.id.clone(), failure.message_for(tx));
                    }
                    record_failed_chunk(&outer, batch_id, chunk, &failure, Utc::now());
                }
            }
        }

        if let Err(e) = outer.commit() {
            let message = ProcessingError::from(e).to_string();
            tracing::error!(batch_id, error = %message, "外层事务提交失败, 整批降级为失败");
            result.downgrade_all(all_ids(), &message);
            return result.finish();
        }

        let result = result.finish();
        tracing::info!(
            batch_id,
            total = result.total,
            successful = result.successful,
            failed = result.failed,
            elapsed_ms = result.processing_time_ms,
            "批次处理完成"
        );
        result
    }

    fn process_chunk(
        &self,
        outer: &mut SqlTransaction<'_>,
        batch_id: &str,
        chunk_no: usize,
        offset: usize,
        chunk: &[Transaction],
    ) -> Result<(), ChunkFailure> {
        let mut scope =
            SavepointScope::open(outer, format!("chunk_{}", chunk_no)).map_err(ChunkFailure::scope)?;

        if let Err((idx, error)) = self.validator.validate_chunk(chunk) {
            discard(scope);
            return Err(ChunkFailure::at(&chunk[idx], offset + idx, error));
        }

        let now = Utc::now();
        for (idx, tx) in chunk.iter().enumerate() {
            if let Err(error) = self.apply_one(&mut scope, batch_id, tx, now) {
                discard(scope);
                return Err(ChunkFailure::at(tx, offset + idx, error));
            }
        }

        scope.release().map_err(ChunkFailure::scope)
    }

    /// 单条事务: 写事务行 → processing → 副作用 → completed
    fn apply_one(
        &self,
        scope: &mut SavepointScope<'_>,
        batch_id: &str,
        tx: &Transaction,
        created_at: DateTime<Utc>,
    ) -> ProcessingResult<()> {
        {
            let conn = scope.conn()?;
            transaction_repo::insert_transaction(conn, tx, batch_id, created_at).map_err(|e| match e {
                RepositoryError::UniqueConstraintViolation(_) => {
                    ProcessingError::DuplicateTransaction(tx.id.clone())
                }
                other => other.into(),
            })?;
            transaction_repo::append_status(conn, &tx.id, TransactionState::Processing, None, created_at)?;
        }

        self.appliers.apply(scope, tx)?;

        transaction_repo::append_status(scope.conn()?, &tx.id, TransactionState::Completed, None, Utc::now())?;
        Ok(())
    }
}

fn discard(scope: SavepointScope<'_>) {
    let name = scope.name().to_string();
    if let Err(e) = scope.rollback() {
        tracing::error!(savepoint = %name, error = %e, "保存点回滚失败");
    }
}

/// 在外层事务中写入失败分块的事务行与 failed 轨迹
///
/// 已有终态的事务（如与已完成事务重复的ID）不再追加
fn record_failed_chunk(
    conn: &Connection,
    batch_id: &str,
    chunk: &[Transaction],
    failure: &ChunkFailure,
    now: DateTime<Utc>,
) {
    for tx in chunk {
        if tx.id.trim().is_empty() {
            continue;
        }

        if let Err(e) = transaction_repo::insert_transaction_if_absent(conn, tx, batch_id, now) {
            tracing::warn!(transaction_id = %tx.id, error = %e, "失败事务行写入失败");
            continue;
        }

        match transaction_repo::append_failure(conn, &tx.id, failure.detail(), now) {
            Ok(()) => {}
            Err(RepositoryError::InvalidStateTransition { from, .. }) => {
                tracing::debug!(transaction_id = %tx.id, current = %from, "事务已处于终态, 跳过 failed 轨迹");
            }
            Err(e) => tracing::warn!(transaction_id = %tx.id, error = %e, "failed 轨迹写入失败"),
        }
    }
}
