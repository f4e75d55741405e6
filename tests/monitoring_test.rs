// ==========================================
// 监控服务集成测试
// ==========================================
// 场景: 引擎落库 -> 窗口聚合 -> 阈值告警 -> 通知
// ==========================================

#[path = "test_helpers.rs"]
mod test_helpers;

use async_trait::async_trait;
use std::sync::{Arc, Mutex};
use test_helpers::*;
use txn_batch_engine::config::{AlertThresholds, MonitoringConfig};
use txn_batch_engine::engine::ChunkedCommitEngine;
use txn_batch_engine::repository::transaction_repo::status_history;
use txn_batch_engine::services::{Alert, AlertKind, AlertNotifier, MonitoringService};

#[derive(Default)]
struct CapturingNotifier {
    alerts: Mutex<Vec<Alert>>,
}

#[async_trait]
impl AlertNotifier for CapturingNotifier {
    async fn notify(&self, alert: &Alert) {
        self.alerts.lock().unwrap().push(alert.clone());
    }
}

#[tokio::test]
async fn test_low_success_rate_raises_alert() {
    let (_file, db_path) = create_test_db().unwrap();
    let mut conn = open_test_connection(&db_path).unwrap();

    // 20 笔中第 2 个分块失败: 成功率 50%
    let mut batch = receipts(20, "ART-M");
    batch[15].amount = 0.0;
    let result = ChunkedCommitEngine::new(10).unwrap().process(&mut conn, "B-M", &batch);
    assert_eq!(result.failed, 10);

    let notifier = Arc::new(CapturingNotifier::default());
    let config = MonitoringConfig {
        thresholds: AlertThresholds {
            min_success_rate: 90.0,
            max_avg_latency_ms: 60_000.0,
            min_sample_size: 10,
        },
        ..MonitoringConfig::default()
    };
    let service = MonitoringService::with_notifier(db_path.clone(), config, notifier.clone()).unwrap();

    let snapshot = service.collect_now().await.unwrap();
    assert_eq!(snapshot.total, 20);
    assert_eq!(snapshot.success_rate, 50.0);
    assert_eq!(snapshot.top_errors.len(), 1);
    assert_eq!(snapshot.top_errors[0].error_kind, "validation");
    assert_eq!(snapshot.top_errors[0].count, 10);

    let captured = notifier.alerts.lock().unwrap().clone();
    assert_eq!(captured.len(), 1);
    assert_eq!(captured[0].kind, AlertKind::LowSuccessRate);

    let detailed = service.detailed().unwrap();
    assert_eq!(detailed.recent_alerts.len(), 1);
    assert_eq!(detailed.latest, Some(snapshot));
}

#[tokio::test]
async fn test_small_sample_suppresses_rate_alert() {
    let (_file, db_path) = create_test_db().unwrap();
    let mut conn = open_test_connection(&db_path).unwrap();

    let mut batch = receipts(4, "ART-M");
    batch[0].amount = 0.0;
    ChunkedCommitEngine::new(2).unwrap().process(&mut conn, "B-S", &batch);

    let notifier = Arc::new(CapturingNotifier::default());
    let service =
        MonitoringService::with_notifier(db_path.clone(), MonitoringConfig::default(), notifier.clone()).unwrap();

    let snapshot = service.collect_now().await.unwrap();
    assert_eq!(snapshot.success_rate, 50.0);
    assert!(notifier.alerts.lock().unwrap().is_empty());
}

#[tokio::test]
async fn test_chunks_with_different_triggers_share_one_error_entry() {
    let (_file, db_path) = create_test_db().unwrap();
    let mut conn = open_test_connection(&db_path).unwrap();

    // 第 1、3 个分块各有一笔非法事务, 触发者不同
    let mut batch = receipts(30, "ART-G");
    batch[2].amount = 0.0;
    batch[24].amount = -3.0;
    let result = ChunkedCommitEngine::new(10).unwrap().process(&mut conn, "B-G", &batch);
    assert_eq!(result.failed, 20);

    let service = MonitoringService::with_notifier(
        db_path.clone(),
        MonitoringConfig::default(),
        Arc::new(CapturingNotifier::default()),
    )
    .unwrap();

    let snapshot = service.collect_now().await.unwrap();
    assert_eq!(snapshot.top_errors.len(), 1);
    assert_eq!(snapshot.top_errors[0].error_kind, "validation");
    assert_eq!(snapshot.top_errors[0].count, 20);

    let sibling = status_history(&conn, "T1").unwrap().pop().unwrap();
    let trigger = status_history(&conn, "T3").unwrap().pop().unwrap();
    assert_eq!(sibling.trigger_id.as_deref(), Some("T3"));
    assert_eq!(sibling.error_message, trigger.error_message);
}
