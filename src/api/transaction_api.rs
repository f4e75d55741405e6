// ==========================================
// 分块事务批处理引擎 - 事务 API
// ==========================================
// 职责: 对外的类型化接口门面（HTTP 层可直接包装）
// - 同步处理: process_single / process_batch
// - 异步批次: submit / status / cancel / list
// - 管理: reconfigure / request_shutdown（先落库再生效）
// - 监控: current / detailed / start / stop / configure_alerts
// 约束: 依赖通过构造函数注入, 无全局单例
// ==========================================

use crate::api::dto::{EngineSettings, ReconfigureRequest, SubmitBatchResponse, TransactionDetail};
use crate::api::error::{ApiError, ApiResult};
use crate::config::{AlertThresholds, ConfigManager, ConfigResult};
use crate::domain::{BatchRecord, BatchStatus, Transaction, TransactionResult};
use crate::engine::TransactionValidator;
use crate::repository::TransactionRepository;
use crate::services::{BatchOrchestrator, DetailedMetrics, MetricsSnapshot, MonitoringService};
use std::sync::Arc;

pub struct TransactionApi {
    orchestrator: Arc<BatchOrchestrator>,
    monitoring: Arc<MonitoringService>,
    transactions: Arc<TransactionRepository>,
    config: Arc<ConfigManager>,
    validator: TransactionValidator,
}

fn require_id(value: &str, what: &str) -> ApiResult<()> {
    if value.trim().is_empty() {
        return Err(ApiError::InvalidInput(format!("{}不能为空", what)));
    }
    Ok(())
}

impl TransactionApi {
    pub fn new(
        orchestrator: Arc<BatchOrchestrator>,
        monitoring: Arc<MonitoringService>,
        transactions: Arc<TransactionRepository>,
        config: Arc<ConfigManager>,
    ) -> Self {
        Self {
            orchestrator,
            monitoring,
            transactions,
            config,
            validator: TransactionValidator::new(),
        }
    }

    // ==========================================
    // 同步处理
    // ==========================================

    /// 同步处理单笔事务
    ///
    /// 校验失败直接返回 InvalidInput, 不落库
    pub async fn process_single(&self, tx: Transaction) -> ApiResult<TransactionResult> {
        self.validator.validate(&tx)?;
        Ok(self.orchestrator.process_now(vec![tx]).await?)
    }

    /// 同步处理一批事务（非法事务按分块失败计入结果）
    pub async fn process_batch(&self, transactions: Vec<Transaction>) -> ApiResult<TransactionResult> {
        Ok(self.orchestrator.process_now(transactions).await?)
    }

    // ==========================================
    // 异步批次
    // ==========================================

    pub fn submit_batch(&self, transactions: Vec<Transaction>) -> ApiResult<SubmitBatchResponse> {
        let batch_id = self.orchestrator.submit(transactions)?;
        let record = self.orchestrator.get_status(&batch_id)?;
        Ok(SubmitBatchResponse::from(&record))
    }

    pub fn get_batch_status(&self, batch_id: &str) -> ApiResult<BatchRecord> {
        require_id(batch_id, "批次ID")?;
        Ok(self.orchestrator.get_status(batch_id)?)
    }

    pub fn cancel_batch(&self, batch_id: &str) -> ApiResult<BatchRecord> {
        require_id(batch_id, "批次ID")?;
        Ok(self.orchestrator.cancel(batch_id)?)
    }

    /// 列出批次（可按状态过滤）
    pub fn list_batches(&self, status: Option<&str>) -> ApiResult<Vec<BatchRecord>> {
        let filter = match status.map(str::trim).filter(|s| !s.is_empty()) {
            None => None,
            Some(raw) => Some(
                BatchStatus::parse(raw).ok_or_else(|| ApiError::InvalidInput(format!("未知批次状态: {}", raw)))?,
            ),
        };
        Ok(self.orchestrator.list(filter)?)
    }

    /// 查询落库事务及其状态轨迹
    pub fn get_transaction(&self, transaction_id: &str) -> ApiResult<TransactionDetail> {
        require_id(transaction_id, "事务ID")?;
        let transaction = self.transactions.get(transaction_id)?;
        let history = self.transactions.history(transaction_id)?;
        Ok(TransactionDetail { transaction, history })
    }

    // ==========================================
    // 管理
    // ==========================================

    pub fn settings(&self) -> ApiResult<EngineSettings> {
        Ok(EngineSettings {
            max_workers: self.orchestrator.max_workers(),
            chunk_size: self.orchestrator.chunk_size(),
            accepting: self.orchestrator.is_accepting(),
            active_batches: self.orchestrator.active_count()?,
        })
    }

    /// 运行时调整并持久化到 config_kv
    ///
    /// 先落库再生效: 落库失败时调度器保持原参数
    pub async fn reconfigure(&self, request: ReconfigureRequest) -> ApiResult<EngineSettings> {
        let ReconfigureRequest {
            max_workers,
            chunk_size,
        } = request;
        if max_workers.is_none() && chunk_size.is_none() {
            return Err(ApiError::InvalidInput("max_workers 与 chunk_size 至少指定一个".to_string()));
        }
        for (key, value) in [("max_workers", max_workers), ("chunk_size", chunk_size)] {
            if value == Some(0) {
                return Err(ApiError::InvalidInput(format!("{} 必须 >= 1", key)));
            }
        }

        let config = Arc::clone(&self.config);
        persist(move || config.save_worker_settings(max_workers, chunk_size)).await?;
        self.orchestrator.reconfigure(max_workers, chunk_size).await?;
        self.settings()
    }

    /// 请求关闭（存在待处理/处理中批次时拒绝）
    pub async fn request_shutdown(&self) -> ApiResult<()> {
        self.orchestrator.shutdown(false).await?;
        if let Err(e) = self.monitoring.stop().await {
            tracing::warn!(error = %e, "停止监控失败");
        }
        Ok(())
    }

    // ==========================================
    // 监控
    // ==========================================

    /// 立即采集当前窗口指标
    pub async fn current_metrics(&self) -> ApiResult<MetricsSnapshot> {
        Ok(self.monitoring.collect_now().await?)
    }

    pub fn detailed_metrics(&self) -> ApiResult<DetailedMetrics> {
        Ok(self.monitoring.detailed()?)
    }

    pub fn start_monitoring(&self) -> ApiResult<bool> {
        Ok(self.monitoring.start()?)
    }

    pub async fn stop_monitoring(&self) -> ApiResult<bool> {
        Ok(self.monitoring.stop().await?)
    }

    /// 调整告警阈值并持久化（先落库再生效）
    pub async fn configure_alerts(&self, thresholds: AlertThresholds) -> ApiResult<AlertThresholds> {
        thresholds.validate()?;
        let config = Arc::clone(&self.config);
        let to_save = thresholds.clone();
        persist(move || config.save_alert_thresholds(&to_save)).await?;
        self.monitoring.update_thresholds(thresholds.clone())?;
        Ok(thresholds)
    }
}

/// 在阻塞线程池中执行配置写入（管理连接可能因写锁等待 busy_timeout）
async fn persist<F>(write: F) -> ApiResult<()>
where
    F: FnOnce() -> ConfigResult<()> + Send + 'static,
{
    tokio::task::spawn_blocking(write)
        .await
        .map_err(|e| ApiError::InternalError(format!("配置持久化任务异常: {}", e)))??;
    Ok(())
}
