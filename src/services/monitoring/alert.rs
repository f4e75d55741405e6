// ==========================================
// 分块事务批处理引擎 - 监控告警
// ==========================================
// 规则:
// - 成功率 < min_success_rate 且样本数 >= min_sample_size → LOW_SUCCESS_RATE
// - 平均完成延迟 > max_avg_latency_ms → HIGH_LATENCY
// 告警只通知, 不中断任何处理
// ==========================================

use crate::config::AlertThresholds;
use crate::services::monitoring::metrics::MetricsSnapshot;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// 告警类型
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AlertKind {
    LowSuccessRate,
    HighLatency,
}

impl AlertKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            AlertKind::LowSuccessRate => "LOW_SUCCESS_RATE",
            AlertKind::HighLatency => "HIGH_LATENCY",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Alert {
    pub kind: AlertKind,
    pub message: String,
    /// 观测值
    pub value: f64,
    /// 阈值
    pub threshold: f64,
    pub raised_at: DateTime<Utc>,
}

/// 按阈值评估一次快照
pub fn evaluate_alerts(snapshot: &MetricsSnapshot, thresholds: &AlertThresholds) -> Vec<Alert> {
    let mut alerts = Vec::new();

    if snapshot.total >= thresholds.min_sample_size && snapshot.success_rate < thresholds.min_success_rate {
        alerts.push(Alert {
            kind: AlertKind::LowSuccessRate,
            message: format!(
                "成功率 {:.2}% 低于阈值 {:.2}%（窗口 {}s, 样本 {}）",
                snapshot.success_rate, thresholds.min_success_rate, snapshot.window_secs, snapshot.total
            ),
            value: snapshot.success_rate,
            threshold: thresholds.min_success_rate,
            raised_at: snapshot.collected_at,
        });
    }

    if let Some(latency) = snapshot.avg_latency_ms {
        if latency > thresholds.max_avg_latency_ms {
            alerts.push(Alert {
                kind: AlertKind::HighLatency,
                message: format!(
                    "平均完成延迟 {:.1}ms 超过阈值 {:.1}ms",
                    latency, thresholds.max_avg_latency_ms
                ),
                value: latency,
                threshold: thresholds.max_avg_latency_ms,
                raised_at: snapshot.collected_at,
            });
        }
    }

    alerts
}

// ==========================================
// AlertNotifier - 告警通知
// ==========================================
#[async_trait]
pub trait AlertNotifier: Send + Sync {
    async fn notify(&self, alert: &Alert);
}

/// 默认通知: 写 warn 日志
#[derive(Debug, Default, Clone, Copy)]
pub struct LogAlertNotifier;

#[async_trait]
impl AlertNotifier for LogAlertNotifier {
    async fn notify(&self, alert: &Alert) {
        tracing::warn!(
            target: "alert",
            kind = alert.kind.as_str(),
            value = alert.value,
            threshold = alert.threshold,
            "{}",
            alert.message
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn snapshot(total: u64, success_rate: f64, latency: Option<f64>) -> MetricsSnapshot {
        MetricsSnapshot {
            collected_at: Utc::now(),
            window_secs: 3600,
            total,
            completed: 0,
            failed: 0,
            success_rate,
            avg_latency_ms: latency,
            top_errors: Vec::new(),
        }
    }

    #[test]
    fn test_low_success_rate_needs_samples() {
        let thresholds = AlertThresholds::default();
        assert!(evaluate_alerts(&snapshot(5, 10.0, None), &thresholds).is_empty());

        let alerts = evaluate_alerts(&snapshot(50, 80.0, None), &thresholds);
        assert_eq!(alerts.len(), 1);
        assert_eq!(alerts[0].kind, AlertKind::LowSuccessRate);
        assert_eq!(alerts[0].threshold, 95.0);
    }

    #[test]
    fn test_high_latency() {
        let thresholds = AlertThresholds::default();
        let alerts = evaluate_alerts(&snapshot(1, 100.0, Some(9_000.0)), &thresholds);
        assert_eq!(alerts.len(), 1);
        assert_eq!(alerts[0].kind, AlertKind::HighLatency);
        assert!(evaluate_alerts(&snapshot(1, 100.0, Some(10.0)), &thresholds).is_empty());
    }
}
