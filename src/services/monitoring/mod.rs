// ==========================================
// 分块事务批处理引擎 - 监控服务
// ==========================================
// 职责: 周期性采集窗口指标并按阈值告警
// 约束:
// - 独立定时任务, 与调度器状态无耦合
// - 只读连接（SQLITE_OPEN_READ_ONLY）读取已落库数据
// - 告警只通知, 采集失败只记录日志
// ==========================================

pub mod alert;
pub mod metrics;

pub use alert::{evaluate_alerts, Alert, AlertKind, AlertNotifier, LogAlertNotifier};
pub use metrics::MetricsSnapshot;

use crate::config::{AlertThresholds, MonitoringConfig};
use crate::db;
use crate::repository::MonitoringRepository;
use crate::services::error::{MonitoringError, MonitoringResult};
use chrono::{Duration as ChronoDuration, Utc};
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;

/// 详细指标: 最近快照与告警历史
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DetailedMetrics {
    pub latest: Option<MetricsSnapshot>,
    pub history: Vec<MetricsSnapshot>,
    pub recent_alerts: Vec<Alert>,
    pub thresholds: AlertThresholds,
    pub running: bool,
}

struct MonitorState {
    db_path: String,
    config: Mutex<MonitoringConfig>,
    history: Mutex<VecDeque<MetricsSnapshot>>,
    alerts: Mutex<VecDeque<Alert>>,
    notifier: Arc<dyn AlertNotifier>,
}

fn lock<T>(m: &Mutex<T>) -> MonitoringResult<MutexGuard<'_, T>> {
    m.lock().map_err(|e| MonitoringError::LockError(e.to_string()))
}

fn push_bounded<T>(buf: &mut VecDeque<T>, item: T, cap: usize) {
    buf.push_back(item);
    while buf.len() > cap {
        buf.pop_front();
    }
}

impl MonitorState {
    async fn collect(&self) -> MonitoringResult<MetricsSnapshot> {
        let config = lock(&self.config)?.clone();
        let db_path = self.db_path.clone();

        let snapshot = tokio::task::spawn_blocking(move || -> MonitoringResult<MetricsSnapshot> {
            let conn = db::open_readonly_connection(&db_path)
                .map_err(|e| MonitoringError::Connection(e.to_string()))?;
            let repo = MonitoringRepository::new(Arc::new(Mutex::new(conn)));

            let now = Utc::now();
            let window = ChronoDuration::seconds(config.window_secs.min(i64::MAX as u64) as i64);
            let since = now - window;
            let aggregates = repo.window_aggregates(since)?;
            let top_errors = repo.top_errors(since, config.top_errors)?;
            Ok(MetricsSnapshot::from_aggregates(aggregates, top_errors, config.window_secs, now))
        })
        .await
        .map_err(|e| MonitoringError::Task(e.to_string()))??;

        tracing::debug!(
            total = snapshot.total,
            completed = snapshot.completed,
            failed = snapshot.failed,
            success_rate = snapshot.success_rate,
            avg_latency_ms = ?snapshot.avg_latency_ms,
            "监控指标已采集"
        );

        let alerts = evaluate_alerts(&snapshot, &config.thresholds);
        for alert in &alerts {
            self.notifier.notify(alert).await;
        }

        {
            let mut history = lock(&self.history)?;
            push_bounded(&mut history, snapshot.clone(), config.history_len);
        }
        {
            let mut recent = lock(&self.alerts)?;
            for alert in alerts {
                push_bounded(&mut recent, alert, config.history_len);
            }
        }

        Ok(snapshot)
    }
}

async fn monitor_loop(state: Arc<MonitorState>, every: Duration, mut stop: watch::Receiver<bool>) {
    let mut ticker = tokio::time::interval(every);
    loop {
        tokio::select! {
            _ = ticker.tick() => {
                if let Err(e) = state.collect().await {
                    tracing::warn!(error = %e, "监控采集失败");
                }
            }
            changed = stop.changed() => {
                if changed.is_err() || *stop.borrow() {
                    break;
                }
            }
        }
    }
    tracing::info!("监控任务已停止");
}

// ==========================================
// MonitoringService
// ==========================================
pub struct MonitoringService {
    state: Arc<MonitorState>,
    task: Mutex<Option<(JoinHandle<()>, watch::Sender<bool>)>>,
}

impl MonitoringService {
    pub fn new(db_path: impl Into<String>, config: MonitoringConfig) -> MonitoringResult<Self> {
        Self::with_notifier(db_path, config, Arc::new(LogAlertNotifier))
    }

    pub fn with_notifier(
        db_path: impl Into<String>,
        config: MonitoringConfig,
        notifier: Arc<dyn AlertNotifier>,
    ) -> MonitoringResult<Self> {
        config
            .validate()
            .map_err(|e| MonitoringError::InvalidConfig(e.to_string()))?;
        Ok(Self {
            state: Arc::new(MonitorState {
                db_path: db_path.into(),
                config: Mutex::new(config),
                history: Mutex::new(VecDeque::new()),
                alerts: Mutex::new(VecDeque::new()),
                notifier,
            }),
            task: Mutex::new(None),
        })
    }

    /// 启动周期采集（需在 tokio 运行时内调用）
    ///
    /// # 返回
    /// - `Ok(false)`: 已在运行
    pub fn start(&self) -> MonitoringResult<bool> {
        let mut task = lock(&self.task)?;
        if task.is_some() {
            return Ok(false);
        }
        let interval_secs = lock(&self.state.config)?.interval_secs;
        let (stop_tx, stop_rx) = watch::channel(false);
        let handle = tokio::spawn(monitor_loop(
            Arc::clone(&self.state),
            Duration::from_secs(interval_secs),
            stop_rx,
        ));
        *task = Some((handle, stop_tx));
        tracing::info!(interval_secs, "监控任务已启动");
        Ok(true)
    }

    /// 停止周期采集
    ///
    /// # 返回
    /// - `Ok(false)`: 本来就未运行
    pub async fn stop(&self) -> MonitoringResult<bool> {
        let running = lock(&self.task)?.take();
        let Some((handle, stop_tx)) = running else {
            return Ok(false);
        };
        let _ = stop_tx.send(true);
        handle.await.map_err(|e| MonitoringError::Task(e.to_string()))?;
        Ok(true)
    }

    pub fn is_running(&self) -> bool {
        lock(&self.task).map(|t| t.is_some()).unwrap_or(false)
    }

    /// 立即采集一次
    pub async fn collect_now(&self) -> MonitoringResult<MetricsSnapshot> {
        self.state.collect().await
    }

    /// 最近一次快照
    pub fn latest(&self) -> MonitoringResult<Option<MetricsSnapshot>> {
        Ok(lock(&self.state.history)?.back().cloned())
    }

    pub fn detailed(&self) -> MonitoringResult<DetailedMetrics> {
        let history: Vec<MetricsSnapshot> = lock(&self.state.history)?.iter().cloned().collect();
        let recent_alerts = lock(&self.state.alerts)?.iter().cloned().collect();
        let thresholds = lock(&self.state.config)?.thresholds.clone();
        Ok(DetailedMetrics {
            latest: history.last().cloned(),
            history,
            recent_alerts,
            thresholds,
            running: self.is_running(),
        })
    }

    pub fn thresholds(&self) -> MonitoringResult<AlertThresholds> {
        Ok(lock(&self.state.config)?.thresholds.clone())
    }

    /// 运行时调整告警阈值（下次采集生效）
    pub fn update_thresholds(&self, thresholds: AlertThresholds) -> MonitoringResult<()> {
        thresholds
            .validate()
            .map_err(|e| MonitoringError::InvalidConfig(e.to_string()))?;
        tracing::info!(
            min_success_rate = thresholds.min_success_rate,
            max_avg_latency_ms = thresholds.max_avg_latency_ms,
            min_sample_size = thresholds.min_sample_size,
            "告警阈值已更新"
        );
        lock(&self.state.config)?.thresholds = thresholds;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{Direction, Transaction, TransactionState};
    use crate::repository::transaction_repo::{append_status, insert_transaction};
    use tempfile::NamedTempFile;

    #[derive(Default)]
    struct CollectingNotifier {
        seen: Mutex<Vec<AlertKind>>,
    }

    #[async_trait::async_trait]
    impl AlertNotifier for CollectingNotifier {
        async fn notify(&self, alert: &Alert) {
            self.seen.lock().unwrap().push(alert.kind);
        }
    }

    // 保持写连接存活, 与运行时形态一致
    fn seeded_db(completed: usize, failed: usize) -> (NamedTempFile, rusqlite::Connection) {
        let file = NamedTempFile::new().unwrap();
        let path = file.path().to_str().unwrap().to_string();
        let conn = db::bootstrap(&path).unwrap();
        let now = Utc::now();
        for i in 0..completed {
            let id = format!("OK{}", i);
            insert_transaction(&conn, &Transaction::inventory(&id, "A", 1.0, Direction::In), "B", now).unwrap();
            append_status(&conn, &id, TransactionState::Processing, None, now).unwrap();
            append_status(&conn, &id, TransactionState::Completed, None, now).unwrap();
        }
        for i in 0..failed {
            let id = format!("BAD{}", i);
            insert_transaction(&conn, &Transaction::inventory(&id, "A", 1.0, Direction::Out), "B", now).unwrap();
            append_status(&conn, &id, TransactionState::Failed, Some("库存不足"), now).unwrap();
        }
        (file, conn)
    }

    #[tokio::test]
    async fn test_collect_raises_alert_below_threshold() {
        let (file, _conn) = seeded_db(6, 4);
        let notifier = Arc::new(CollectingNotifier::default());
        let service = MonitoringService::with_notifier(
            file.path().to_str().unwrap(),
            MonitoringConfig::default(),
            notifier.clone(),
        )
        .unwrap();

        let snap = service.collect_now().await.unwrap();
        assert_eq!(snap.total, 10);
        assert_eq!(snap.success_rate, 60.0);
        assert_eq!(snap.top_errors[0].error_message, "库存不足");
        assert_eq!(notifier.seen.lock().unwrap().as_slice(), &[AlertKind::LowSuccessRate]);

        let detailed = service.detailed().unwrap();
        assert_eq!(detailed.history.len(), 1);
        assert_eq!(detailed.recent_alerts.len(), 1);
        assert_eq!(service.latest().unwrap(), Some(snap));
    }

    #[tokio::test]
    async fn test_thresholds_update_and_history_bound() {
        let (file, _conn) = seeded_db(6, 4);
        let config = MonitoringConfig {
            history_len: 2,
            ..MonitoringConfig::default()
        };
        let notifier = Arc::new(CollectingNotifier::default());
        let service =
            MonitoringService::with_notifier(file.path().to_str().unwrap(), config, notifier.clone()).unwrap();

        service
            .update_thresholds(AlertThresholds {
                min_success_rate: 50.0,
                ..AlertThresholds::default()
            })
            .unwrap();
        for _ in 0..3 {
            service.collect_now().await.unwrap();
        }
        assert!(notifier.seen.lock().unwrap().is_empty());
        assert_eq!(service.detailed().unwrap().history.len(), 2);

        assert!(service
            .update_thresholds(AlertThresholds {
                min_success_rate: -1.0,
                ..AlertThresholds::default()
            })
            .is_err());
    }

    #[tokio::test]
    async fn test_start_stop() {
        let (file, _conn) = seeded_db(1, 0);
        let service = MonitoringService::new(file.path().to_str().unwrap(), MonitoringConfig::default()).unwrap();
        assert!(service.start().unwrap());
        assert!(!service.start().unwrap());
        assert!(service.is_running());

        // interval 首次 tick 立即触发
        for _ in 0..100 {
            if service.latest().unwrap().is_some() {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        assert!(service.latest().unwrap().is_some());

        assert!(service.stop().await.unwrap());
        assert!(!service.stop().await.unwrap());
        assert!(!service.is_running());
    }
}
