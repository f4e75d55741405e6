// ==========================================
// 分块事务批处理引擎 - 类型化配置
// ==========================================
// EngineConfig: 引擎/调度/保留策略
// MonitoringConfig: 监控周期/窗口/告警阈值
// 来源: config_kv（缺失或无法解析时回落默认值）
// ==========================================

use crate::config::error::{ConfigError, ConfigResult};
use serde::{Deserialize, Serialize};

// ==========================================
// EngineConfig
// ==========================================
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EngineConfig {
    pub chunk_size: usize,
    pub max_workers: usize,
    pub queue_capacity: usize,
    pub max_batch_size: usize,
    pub busy_timeout_ms: u64,
    pub batch_retention_secs: u64,
    pub cleanup_interval_secs: u64,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            chunk_size: 100,
            max_workers: 4,
            queue_capacity: 256,
            max_batch_size: 10_000,
            busy_timeout_ms: 30_000,
            batch_retention_secs: 3_600,
            cleanup_interval_secs: 300,
        }
    }
}

impl EngineConfig {
    pub fn validate(&self) -> ConfigResult<()> {
        at_least_one("engine/chunk_size", self.chunk_size as u64)?;
        at_least_one("engine/max_workers", self.max_workers as u64)?;
        at_least_one("engine/queue_capacity", self.queue_capacity as u64)?;
        at_least_one("engine/max_batch_size", self.max_batch_size as u64)?;
        at_least_one("batch/cleanup_interval_secs", self.cleanup_interval_secs)?;
        Ok(())
    }
}

// ==========================================
// AlertThresholds - 告警阈值
// ==========================================
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AlertThresholds {
    /// 成功率下限（百分比）
    pub min_success_rate: f64,
    /// 平均完成延迟上限（毫秒）
    pub max_avg_latency_ms: f64,
    /// 成功率告警所需的最少样本数
    pub min_sample_size: u64,
}

impl Default for AlertThresholds {
    fn default() -> Self {
        Self {
            min_success_rate: 95.0,
            max_avg_latency_ms: 5_000.0,
            min_sample_size: 10,
        }
    }
}

impl AlertThresholds {
    pub fn validate(&self) -> ConfigResult<()> {
        if !self.min_success_rate.is_finite() || !(0.0..=100.0).contains(&self.min_success_rate) {
            return Err(ConfigError::Invalid {
                key: "monitoring/min_success_rate".to_string(),
                message: format!("必须在 0~100 之间, 实际={}", self.min_success_rate),
            });
        }
        if !self.max_avg_latency_ms.is_finite() || self.max_avg_latency_ms <= 0.0 {
            return Err(ConfigError::Invalid {
                key: "monitoring/max_avg_latency_ms".to_string(),
                message: format!("必须大于0, 实际={}", self.max_avg_latency_ms),
            });
        }
        Ok(())
    }
}

// ==========================================
// MonitoringConfig
// ==========================================
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MonitoringConfig {
    pub interval_secs: u64,
    pub window_secs: u64,
    pub top_errors: usize,
    pub history_len: usize,
    pub thresholds: AlertThresholds,
}

impl Default for MonitoringConfig {
    fn default() -> Self {
        Self {
            interval_secs: 60,
            window_secs: 3_600,
            top_errors: 5,
            history_len: 60,
            thresholds: AlertThresholds::default(),
        }
    }
}

impl MonitoringConfig {
    pub fn validate(&self) -> ConfigResult<()> {
        at_least_one("monitoring/interval_secs", self.interval_secs)?;
        at_least_one("monitoring/window_secs", self.window_secs)?;
        at_least_one("monitoring/history_len", self.history_len as u64)?;
        self.thresholds.validate()
    }
}

fn at_least_one(key: &str, value: u64) -> ConfigResult<()> {
    if value == 0 {
        return Err(ConfigError::Invalid {
            key: key.to_string(),
            message: "必须 >= 1".to_string(),
        });
    }
    Ok(())
}
