// ==========================================
// 分块事务批处理引擎 - 配置管理器
// ==========================================
// 职责: 配置加载、查询、覆写
// 存储: config_kv 表 (scope_id='global')
// ==========================================

use crate::config::error::{ConfigError, ConfigResult};
use crate::config::settings::{AlertThresholds, EngineConfig, MonitoringConfig};
use crate::db::open_sqlite_connection;
use crate::repository::error::RepositoryError;
use rusqlite::{params, Connection, OptionalExtension};
use std::collections::BTreeMap;
use std::fmt::Display;
use std::str::FromStr;
use std::sync::{Arc, Mutex};

const GLOBAL_SCOPE: &str = "global";

// ==========================================
// ConfigManager - 配置管理器
// ==========================================
pub struct ConfigManager {
    conn: Arc<Mutex<Connection>>,
}

impl ConfigManager {
    /// 按数据库路径创建
    pub fn new(db_path: &str) -> ConfigResult<Self> {
        let conn = open_sqlite_connection(db_path)?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    /// 复用已有连接
    pub fn from_connection(conn: Arc<Mutex<Connection>>) -> Self {
        Self { conn }
    }

    fn get_conn(&self) -> ConfigResult<std::sync::MutexGuard<'_, Connection>> {
        self.conn
            .lock()
            .map_err(|e| ConfigError::Storage(RepositoryError::LockError(e.to_string())))
    }

    /// 读取 global 配置值
    pub fn get_global_config_value(&self, key: &str) -> ConfigResult<Option<String>> {
        let conn = self.get_conn()?;
        let value = conn
            .query_row(
                "SELECT value FROM config_kv WHERE scope_id = ?1 AND key = ?2",
                params![GLOBAL_SCOPE, key],
                |row| row.get::<_, String>(0),
            )
            .optional()?;
        Ok(value)
    }

    /// 写入 global 配置值（UPSERT）
    pub fn set_global_config_value(&self, key: &str, value: &str) -> ConfigResult<()> {
        self.set_global_config_values(&[(key, value.to_string())])
    }

    /// 在同一事务内写入多个 global 配置值, 任一失败则全部不生效
    pub fn set_global_config_values(&self, entries: &[(&str, String)]) -> ConfigResult<()> {
        let mut conn = self.get_conn()?;
        let tx = conn.transaction()?;
        for (key, value) in entries {
            tx.execute(
                r#"
                INSERT INTO config_kv (scope_id, key, value, updated_at)
                VALUES (?1, ?2, ?3, datetime('now'))
                ON CONFLICT(scope_id, key) DO UPDATE SET
                    value = excluded.value,
                    updated_at = excluded.updated_at
                "#,
                params![GLOBAL_SCOPE, key, value],
            )?;
        }
        tx.commit()?;
        for (key, value) in entries {
            tracing::debug!(key = %key, value = %value, "配置已写入");
        }
        Ok(())
    }

    /// 读取并解析配置, 缺失或无法解析时回落默认值
    fn get_parsed<T>(&self, key: &str, default: T) -> ConfigResult<T>
    where
        T: FromStr + Display,
    {
        match self.get_global_config_value(key)? {
            None => Ok(default),
            Some(raw) => match raw.trim().parse::<T>() {
                Ok(v) => Ok(v),
                Err(_) => {
                    tracing::warn!(key, value = %raw, default = %default, "配置值无法解析, 使用默认值");
                    Ok(default)
                }
            },
        }
    }

    /// 全部 global 配置快照（JSON 对象, 按键排序）
    pub fn get_config_snapshot(&self) -> ConfigResult<String> {
        let conn = self.get_conn()?;
        let mut stmt = conn.prepare("SELECT key, value FROM config_kv WHERE scope_id = ?1 ORDER BY key")?;
        let rows = stmt.query_map([GLOBAL_SCOPE], |row| {
            Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?))
        })?;

        let mut map = BTreeMap::new();
        for row in rows {
            let (key, value) = row?;
            map.insert(key, value);
        }
        Ok(serde_json::to_string(&map)?)
    }

    // ===== 类型化配置 =====

    pub fn load_engine_config(&self) -> ConfigResult<EngineConfig> {
        let d = EngineConfig::default();
        let cfg = EngineConfig {
            chunk_size: self.get_parsed(config_keys::CHUNK_SIZE, d.chunk_size)?,
            max_workers: self.get_parsed(config_keys::MAX_WORKERS, d.max_workers)?,
            queue_capacity: self.get_parsed(config_keys::QUEUE_CAPACITY, d.queue_capacity)?,
            max_batch_size: self.get_parsed(config_keys::MAX_BATCH_SIZE, d.max_batch_size)?,
            busy_timeout_ms: self.get_parsed(config_keys::BUSY_TIMEOUT_MS, d.busy_timeout_ms)?,
            batch_retention_secs: self.get_parsed(config_keys::BATCH_RETENTION_SECS, d.batch_retention_secs)?,
            cleanup_interval_secs: self.get_parsed(config_keys::CLEANUP_INTERVAL_SECS, d.cleanup_interval_secs)?,
        };
        cfg.validate()?;
        Ok(cfg)
    }

    pub fn load_monitoring_config(&self) -> ConfigResult<MonitoringConfig> {
        let d = MonitoringConfig::default();
        let cfg = MonitoringConfig {
            interval_secs: self.get_parsed(config_keys::MONITORING_INTERVAL_SECS, d.interval_secs)?,
            window_secs: self.get_parsed(config_keys::MONITORING_WINDOW_SECS, d.window_secs)?,
            top_errors: self.get_parsed(config_keys::MONITORING_TOP_ERRORS, d.top_errors)?,
            history_len: self.get_parsed(config_keys::MONITORING_HISTORY_LEN, d.history_len)?,
            thresholds: AlertThresholds {
                min_success_rate: self.get_parsed(config_keys::MIN_SUCCESS_RATE, d.thresholds.min_success_rate)?,
                max_avg_latency_ms: self
                    .get_parsed(config_keys::MAX_AVG_LATENCY_MS, d.thresholds.max_avg_latency_ms)?,
                min_sample_size: self.get_parsed(config_keys::MIN_SAMPLE_SIZE, d.thresholds.min_sample_size)?,
            },
        };
        cfg.validate()?;
        Ok(cfg)
    }

    /// 持久化运行时调整的工作线程数/分块大小
    pub fn save_worker_settings(&self, max_workers: Option<usize>, chunk_size: Option<usize>) -> ConfigResult<()> {
        let mut entries = Vec::with_capacity(2);
        if let Some(n) = max_workers {
            entries.push((config_keys::MAX_WORKERS, n.to_string()));
        }
        if let Some(n) = chunk_size {
            entries.push((config_keys::CHUNK_SIZE, n.to_string()));
        }
        if entries.is_empty() {
            return Ok(());
        }
        self.set_global_config_values(&entries)
    }

    /// 持久化告警阈值
    pub fn save_alert_thresholds(&self, thresholds: &AlertThresholds) -> ConfigResult<()> {
        thresholds.validate()?;
        self.set_global_config_values(&[
            (config_keys::MIN_SUCCESS_RATE, thresholds.min_success_rate.to_string()),
            (config_keys::MAX_AVG_LATENCY_MS, thresholds.max_avg_latency_ms.to_string()),
            (config_keys::MIN_SAMPLE_SIZE, thresholds.min_sample_size.to_string()),
        ])
    }
}

// ==========================================
// 配置键常量
// ==========================================
pub mod config_keys {
    // 引擎
    pub const CHUNK_SIZE: &str = "engine/chunk_size";
    pub const MAX_WORKERS: &str = "engine/max_workers";
    pub const QUEUE_CAPACITY: &str = "engine/queue_capacity";
    pub const MAX_BATCH_SIZE: &str = "engine/max_batch_size";
    pub const BUSY_TIMEOUT_MS: &str = "engine/busy_timeout_ms";

    // 批次保留
    pub const BATCH_RETENTION_SECS: &str = "batch/retention_secs";
    pub const CLEANUP_INTERVAL_SECS: &str = "batch/cleanup_interval_secs";

    // 监控
    pub const MONITORING_INTERVAL_SECS: &str = "monitoring/interval_secs";
    pub const MONITORING_WINDOW_SECS: &str = "monitoring/window_secs";
    pub const MONITORING_TOP_ERRORS: &str = "monitoring/top_errors";
    pub const MONITORING_HISTORY_LEN: &str = "monitoring/history_len";

    // 告警阈值
    pub const MIN_SUCCESS_RATE: &str = "monitoring/min_success_rate";
    pub const MAX_AVG_LATENCY_MS: &str = "monitoring/max_avg_latency_ms";
    pub const MIN_SAMPLE_SIZE: &str = "monitoring/min_sample_size";
}
