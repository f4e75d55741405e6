// ==========================================
// 分块事务批处理引擎 - 批次调度器
// ==========================================
// 职责: 异步提交、有界工作池、批次生命周期
// 结构:
// - 有界 mpsc 队列（FIFO）→ 分发任务 → Semaphore 限制并发
// - 每个批次在 spawn_blocking 中独占一个数据库会话执行
// - 工作线程的错误/panic 在边界处转换为 failed 记录
// - 后台保留期清理任务
// ==========================================

use crate::config::EngineConfig;
use crate::db;
use crate::domain::{BatchRecord, BatchStatus, Transaction, TransactionResult};
use crate::engine::ChunkedCommitEngine;
use crate::perf;
use crate::services::batch_registry::BatchRegistry;
use crate::services::error::{OrchestrationError, OrchestrationResult};
use chrono::Utc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::mpsc::error::TrySendError;
use tokio::sync::{mpsc, watch, Semaphore};
use tokio::task::{JoinError, JoinHandle, JoinSet};
use uuid::Uuid;

// ==========================================
// BatchExecutor - 批次执行器
// ==========================================
/// 在阻塞线程中执行一个批次
pub trait BatchExecutor: Send + Sync + 'static {
    fn execute(
        &self,
        batch_id: &str,
        transactions: &[Transaction],
        chunk_size: usize,
    ) -> OrchestrationResult<TransactionResult>;
}

/// SQLite 执行器: 每个批次打开独立会话
pub struct SqliteBatchExecutor {
    db_path: String,
    busy_timeout_ms: u64,
}

impl SqliteBatchExecutor {
    pub fn new(db_path: impl Into<String>, busy_timeout_ms: u64) -> Self {
        Self {
            db_path: db_path.into(),
            busy_timeout_ms,
        }
    }
}

impl BatchExecutor for SqliteBatchExecutor {
    fn execute(
        &self,
        batch_id: &str,
        transactions: &[Transaction],
        chunk_size: usize,
    ) -> OrchestrationResult<TransactionResult> {
        let engine =
            ChunkedCommitEngine::new(chunk_size).map_err(|e| OrchestrationError::InvalidConfig(e.to_string()))?;
        if transactions.is_empty() {
            // 空批次不打开会话
            return Ok(TransactionResult::begin(0).finish());
        }

        let mut conn = db::open_session(&self.db_path, self.busy_timeout_ms)
            .map_err(|e| OrchestrationError::SessionOpen(e.to_string()))?;
        perf::install_sqlite_tracing(&mut conn);
        Ok(engine.process(&mut conn, batch_id, transactions))
    }
}

// ==========================================
// 内部任务
// ==========================================
struct BatchJob {
    batch_id: String,
    transactions: Vec<Transaction>,
}

#[derive(Clone)]
struct WorkerContext {
    registry: BatchRegistry,
    executor: Arc<dyn BatchExecutor>,
    chunk_size: Arc<AtomicUsize>,
}

fn describe_join_error(err: JoinError) -> String {
    if !err.is_panic() {
        return err.to_string();
    }
    let payload = err.into_panic();
    if let Some(msg) = payload.downcast_ref::<&str>() {
        msg.to_string()
    } else if let Some(msg) = payload.downcast_ref::<String>() {
        msg.clone()
    } else {
        "未知 panic".to_string()
    }
}

async fn run_blocking(
    executor: Arc<dyn BatchExecutor>,
    batch_id: String,
    transactions: Vec<Transaction>,
    chunk_size: usize,
) -> OrchestrationResult<TransactionResult> {
    let joined =
        tokio::task::spawn_blocking(move || executor.execute(&batch_id, &transactions, chunk_size)).await;
    match joined {
        Ok(outcome) => outcome,
        Err(e) => Err(OrchestrationError::WorkerCrashed(describe_join_error(e))),
    }
}

/// 单个批次: 领取 → 执行 → 写终态
async fn run_batch(ctx: &WorkerContext, job: BatchJob) {
    let batch_id = job.batch_id.clone();
    match ctx.registry.mark_processing(&batch_id) {
        Ok(true) => {}
        Ok(false) => {
            tracing::info!(batch_id = %batch_id, "批次已取消, 跳过");
            return;
        }
        Err(e) => {
            tracing::error!(batch_id = %batch_id, error = %e, "领取批次失败");
            return;
        }
    }

    let chunk_size = ctx.chunk_size.load(Ordering::Relaxed);
    tracing::info!(batch_id = %batch_id, total = job.transactions.len(), chunk_size, "批次开始处理");

    let outcome = run_blocking(Arc::clone(&ctx.executor), job.batch_id, job.transactions, chunk_size).await;
    let (status, result, error) = match outcome {
        Ok(result) => match result.commit_error.clone() {
            Some(err) => (BatchStatus::Failed, Some(result), Some(err)),
            None => (BatchStatus::Completed, Some(result), None),
        },
        Err(e) => (BatchStatus::Failed, None, Some(e.to_string())),
    };

    match &error {
        None => tracing::info!(batch_id = %batch_id, status = %status, "批次处理结束"),
        Some(err) => tracing::error!(batch_id = %batch_id, status = %status, error = %err, "批次处理失败"),
    }

    if let Err(e) = ctx.registry.finish(&batch_id, status, result, error) {
        tracing::error!(batch_id = %batch_id, error = %e, "写入批次终态失败");
    }
}

/// 分发循环: FIFO 出队, 获得许可后派发; 队列关闭后等待在途批次
async fn dispatch_loop(mut rx: mpsc::Receiver<BatchJob>, semaphore: Arc<Semaphore>, ctx: WorkerContext) {
    let mut running = JoinSet::new();

    loop {
        tokio::select! {
            job = rx.recv() => {
                let Some(job) = job else { break };
                let permit = match Arc::clone(&semaphore).acquire_owned().await {
                    Ok(permit) => permit,
                    Err(e) => {
                        tracing::error!(error = %e, "工作池信号量已关闭");
                        let _ = ctx.registry.finish(&job.batch_id, BatchStatus::Failed, None, Some(e.to_string()));
                        break;
                    }
                };
                let ctx = ctx.clone();
                running.spawn(async move {
                    let _permit = permit;
                    run_batch(&ctx, job).await;
                });
            }
            Some(joined) = running.join_next(), if !running.is_empty() => {
                if let Err(e) = joined {
                    tracing::error!(error = %e, "批次任务异常退出");
                }
            }
        }
    }

    while let Some(joined) = running.join_next().await {
        if let Err(e) = joined {
            tracing::error!(error = %e, "批次任务异常退出");
        }
    }
    tracing::info!("分发循环已退出");
}

/// 保留期清理循环
async fn sweep_loop(
    registry: BatchRegistry,
    retention: chrono::Duration,
    every: Duration,
    mut stop: watch::Receiver<bool>,
) {
    let mut ticker = tokio::time::interval(every);
    ticker.tick().await;

    loop {
        tokio::select! {
            _ = ticker.tick() => {
                match registry.cleanup(retention, Utc::now()) {
                    Ok(0) => {}
                    Ok(removed) => tracing::info!(removed, "已清理过期批次记录"),
                    Err(e) => tracing::warn!(error = %e, "批次记录清理失败"),
                }
            }
            changed = stop.changed() => {
                if changed.is_err() || *stop.borrow() {
                    break;
                }
            }
        }
    }
}

// ==========================================
// BatchOrchestrator
// ==========================================
pub struct BatchOrchestrator {
    registry: BatchRegistry,
    executor: Arc<dyn BatchExecutor>,
    sender: Mutex<Option<mpsc::Sender<BatchJob>>>,
    semaphore: Arc<Semaphore>,
    max_workers: AtomicUsize,
    chunk_size: Arc<AtomicUsize>,
    queue_capacity: usize,
    max_batch_size: usize,
    retention: chrono::Duration,
    accepting: AtomicBool,
    stop_tx: watch::Sender<bool>,
    dispatcher: Mutex<Option<JoinHandle<()>>>,
    sweeper: Mutex<Option<JoinHandle<()>>>,
}

impl BatchOrchestrator {
    /// 启动调度器（需在 tokio 运行时内调用）
    ///
    /// # 参数
    /// - config: 引擎配置（工作数/分块/队列容量/保留期）
    /// - executor: 批次执行器
    pub fn start(config: &EngineConfig, executor: Arc<dyn BatchExecutor>) -> OrchestrationResult<Self> {
        config
            .validate()
            .map_err(|e| OrchestrationError::InvalidConfig(e.to_string()))?;

        let registry = BatchRegistry::new();
        let semaphore = Arc::new(Semaphore::new(config.max_workers));
        let chunk_size = Arc::new(AtomicUsize::new(config.chunk_size));
        let (sender, receiver) = mpsc::channel(config.queue_capacity);
        let (stop_tx, stop_rx) = watch::channel(false);
        let retention = chrono::Duration::seconds(config.batch_retention_secs.min(i64::MAX as u64) as i64);

        let ctx = WorkerContext {
            registry: registry.clone(),
            executor: Arc::clone(&executor),
            chunk_size: Arc::clone(&chunk_size),
        };
        let dispatcher = tokio::spawn(dispatch_loop(receiver, Arc::clone(&semaphore), ctx));
        let sweeper = tokio::spawn(sweep_loop(
            registry.clone(),
            retention,
            Duration::from_secs(config.cleanup_interval_secs),
            stop_rx,
        ));

        tracing::info!(
            max_workers = config.max_workers,
            chunk_size = config.chunk_size,
            queue_capacity = config.queue_capacity,
            "批次调度器已启动"
        );

        Ok(Self {
            registry,
            executor,
            sender: Mutex::new(Some(sender)),
            semaphore,
            max_workers: AtomicUsize::new(config.max_workers),
            chunk_size,
            queue_capacity: config.queue_capacity,
            max_batch_size: config.max_batch_size,
            retention,
            accepting: AtomicBool::new(true),
            stop_tx,
            dispatcher: Mutex::new(Some(dispatcher)),
            sweeper: Mutex::new(Some(sweeper)),
        })
    }

    /// 使用 SQLite 执行器启动
    pub fn start_sqlite(db_path: &str, config: &EngineConfig) -> OrchestrationResult<Self> {
        let executor = Arc::new(SqliteBatchExecutor::new(db_path, config.busy_timeout_ms));
        Self::start(config, executor)
    }

    fn lock_err<E: std::fmt::Display>(e: E) -> OrchestrationError {
        OrchestrationError::LockError(e.to_string())
    }

    fn check_accepting(&self, size: usize) -> OrchestrationResult<()> {
        if !self.accepting.load(Ordering::SeqCst) {
            return Err(OrchestrationError::ShuttingDown);
        }
        if size > self.max_batch_size {
            return Err(OrchestrationError::BatchTooLarge {
                size,
                max: self.max_batch_size,
            });
        }
        Ok(())
    }

    // ===== 提交与查询 =====

    /// 提交批次（不阻塞）
    ///
    /// # 返回
    /// - `Ok(batch_id)`: 已登记为 pending 并入队
    /// - `Err(QueueFull)`: 队列已满, 登记已撤销
    pub fn submit(&self, transactions: Vec<Transaction>) -> OrchestrationResult<String> {
        self.check_accepting(transactions.len())?;

        let batch_id = Uuid::new_v4().to_string();
        let total = transactions.len();
        self.registry.insert(BatchRecord::new(batch_id.clone(), total))?;

        let sender = self.sender.lock().map_err(Self::lock_err)?.clone();
        let Some(sender) = sender else {
            self.registry.remove(&batch_id)?;
            return Err(OrchestrationError::ShuttingDown);
        };

        let job = BatchJob {
            batch_id: batch_id.clone(),
            transactions,
        };
        match sender.try_send(job) {
            Ok(()) => {
                tracing::info!(batch_id = %batch_id, total, "批次已提交");
                Ok(batch_id)
            }
            Err(TrySendError::Full(_)) => {
                self.registry.remove(&batch_id)?;
                tracing::warn!(capacity = self.queue_capacity, "提交队列已满, 拒绝批次");
                Err(OrchestrationError::QueueFull(self.queue_capacity))
            }
            Err(TrySendError::Closed(_)) => {
                self.registry.remove(&batch_id)?;
                Err(OrchestrationError::ShuttingDown)
            }
        }
    }

    /// 同步处理（不登记批次, 仍受工作池并发上限约束）
    pub async fn process_now(&self, transactions: Vec<Transaction>) -> OrchestrationResult<TransactionResult> {
        self.check_accepting(transactions.len())?;

        let _permit = Arc::clone(&self.semaphore)
            .acquire_owned()
            .await
            .map_err(|e| OrchestrationError::WorkerCrashed(e.to_string()))?;
        let batch_id = format!("sync-{}", Uuid::new_v4());
        let chunk_size = self.chunk_size.load(Ordering::Relaxed);
        run_blocking(Arc::clone(&self.executor), batch_id, transactions, chunk_size).await
    }

    pub fn get_status(&self, batch_id: &str) -> OrchestrationResult<BatchRecord> {
        self.registry.get(batch_id)
    }

    pub fn cancel(&self, batch_id: &str) -> OrchestrationResult<BatchRecord> {
        let record = self.registry.cancel(batch_id)?;
        tracing::info!(batch_id, "批次已取消");
        Ok(record)
    }

    pub fn list(&self, status: Option<BatchStatus>) -> OrchestrationResult<Vec<BatchRecord>> {
        self.registry.list(status)
    }

    /// 移除早于 max_age 的终态记录（不影响已落库的事务行）
    pub fn cleanup(&self, max_age: chrono::Duration) -> OrchestrationResult<usize> {
        let removed = self.registry.cleanup(max_age, Utc::now())?;
        tracing::debug!(removed, "手动清理批次记录");
        Ok(removed)
    }

    pub fn retention(&self) -> chrono::Duration {
        self.retention
    }

    pub fn active_count(&self) -> OrchestrationResult<usize> {
        self.registry.active_count()
    }

    pub fn max_workers(&self) -> usize {
        self.max_workers.load(Ordering::SeqCst)
    }

    pub fn chunk_size(&self) -> usize {
        self.chunk_size.load(Ordering::Relaxed)
    }

    pub fn is_accepting(&self) -> bool {
        self.accepting.load(Ordering::SeqCst)
    }

    // ===== 运行时调整 =====

    /// 调整工作数/分块大小
    ///
    /// - 扩容立即生效
    /// - 缩容在在途批次释放许可后生效
    /// - 分块大小对之后开始的批次生效
    pub async fn reconfigure(&self, max_workers: Option<usize>, chunk_size: Option<usize>) -> OrchestrationResult<()> {
        if max_workers == Some(0) {
            return Err(OrchestrationError::InvalidConfig("max_workers 必须 >= 1".to_string()));
        }
        if chunk_size == Some(0) {
            return Err(OrchestrationError::InvalidConfig("chunk_size 必须 >= 1".to_string()));
        }

        if let Some(n) = chunk_size {
            self.chunk_size.store(n, Ordering::Relaxed);
        }

        if let Some(n) = max_workers {
            let previous = self.max_workers.swap(n, Ordering::SeqCst);
            if n > previous {
                self.semaphore.add_permits(n - previous);
            } else if n < previous {
                let surplus = u32::try_from(previous - n)
                    .map_err(|e| OrchestrationError::InvalidConfig(e.to_string()))?;
                let semaphore = Arc::clone(&self.semaphore);
                tokio::spawn(async move {
                    if let Ok(permits) = semaphore.acquire_many_owned(surplus).await {
                        permits.forget();
                    }
                });
            }
        }

        tracing::info!(
            max_workers = self.max_workers(),
            chunk_size = self.chunk_size(),
            "调度参数已调整"
        );
        Ok(())
    }

    // ===== 关闭 =====

    /// 关闭调度器
    ///
    /// - force_drain=false: 存在 pending/processing 批次时拒绝
    /// - force_drain=true: 停止接收, 处理完已排队批次并等待在途批次
    pub async fn shutdown(&self, force_drain: bool) -> OrchestrationResult<()> {
        let active = self.registry.active_count()?;
        if active > 0 && !force_drain {
            return Err(OrchestrationError::Busy { active });
        }

        self.accepting.store(false, Ordering::SeqCst);
        drop(self.sender.lock().map_err(Self::lock_err)?.take());
        let _ = self.stop_tx.send(true);
        tracing::info!(active, force_drain, "调度器开始关闭");

        let dispatcher = self.dispatcher.lock().map_err(Self::lock_err)?.take();
        if let Some(handle) = dispatcher {
            if let Err(e) = handle.await {
                tracing::error!(error = %e, "分发任务异常结束");
            }
        }
        let sweeper = self.sweeper.lock().map_err(Self::lock_err)?.take();
        if let Some(handle) = sweeper {
            if let Err(e) = handle.await {
                tracing::warn!(error = %e, "清理任务异常结束");
            }
        }

        tracing::info!("调度器已关闭");
        Ok(())
    }
}
