// ==========================================
// 分块事务批处理引擎 - 事务领域模型
// ==========================================
// 职责: 事务实体、状态审计记录、批处理结果聚合
// 红线: 事务创建后不可变; 状态审计只追加不修改
// ==========================================

use crate::domain::types::{Direction, TransactionState, TransactionType};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

// ==========================================
// Transaction - 业务事务
// ==========================================
// 对齐: transactions 表
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Transaction {
    // ===== 主键 =====
    pub id: String,

    // ===== 通用字段 =====
    #[serde(rename = "type")]
    pub transaction_type: TransactionType,
    pub amount: f64,
    pub direction: Direction,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub reference_id: Option<String>,

    // ===== 类型相关外键 =====
    #[serde(default)]
    pub article_id: Option<String>, // inventory 必填
    #[serde(default)]
    pub account_id: Option<String>, // financial / transfer 必填
    #[serde(default)]
    pub target_account_id: Option<String>, // transfer 必填
}

impl Transaction {
    /// 库存事务
    pub fn inventory(
        id: impl Into<String>,
        article_id: impl Into<String>,
        amount: f64,
        direction: Direction,
    ) -> Self {
        Self {
            id: id.into(),
            transaction_type: TransactionType::Inventory,
            amount,
            direction,
            description: String::new(),
            reference_id: None,
            article_id: Some(article_id.into()),
            account_id: None,
            target_account_id: None,
        }
    }

    /// 财务记账事务
    pub fn financial(
        id: impl Into<String>,
        account_id: impl Into<String>,
        amount: f64,
        direction: Direction,
    ) -> Self {
        Self {
            id: id.into(),
            transaction_type: TransactionType::Financial,
            amount,
            direction,
            description: String::new(),
            reference_id: None,
            article_id: None,
            account_id: Some(account_id.into()),
            target_account_id: None,
        }
    }

    /// 转账事务（从 source 借记，向 target 贷记）
    pub fn transfer(
        id: impl Into<String>,
        source_account_id: impl Into<String>,
        target_account_id: impl Into<String>,
        amount: f64,
    ) -> Self {
        Self {
            id: id.into(),
            transaction_type: TransactionType::Transfer,
            amount,
            direction: Direction::Out,
            description: String::new(),
            reference_id: None,
            article_id: None,
            account_id: Some(source_account_id.into()),
            target_account_id: Some(target_account_id.into()),
        }
    }

    pub fn with_reference(mut self, reference_id: impl Into<String>) -> Self {
        self.reference_id = Some(reference_id.into());
        self
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }
}

// ==========================================
// TransactionStatusRecord - 状态审计记录
// ==========================================
// 对齐: transaction_status 表 (只追加)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TransactionStatusRecord {
    pub transaction_id: String,
    pub status: TransactionState,
    pub error_message: Option<String>, // 仅 failed 时有值
    #[serde(default)]
    pub error_kind: Option<String>,
    /// 分块内首个失败事务（本身即触发者时等于 transaction_id）
    #[serde(default)]
    pub trigger_id: Option<String>,
    pub timestamp: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
}

// ==========================================
// FailedTransaction - 失败明细
// ==========================================
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FailedTransaction {
    pub transaction_id: String,
    pub error: String,
}

// ==========================================
// TransactionResult - 批处理结果聚合（不落库）
// ==========================================
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TransactionResult {
    pub total: usize,
    pub successful: usize,
    pub failed: usize,
    pub failed_transactions: Vec<FailedTransaction>,
    pub start_time: DateTime<Utc>,
    pub end_time: DateTime<Utc>,
    pub processing_time_ms: u64,
    pub success_rate: f64, // 百分比, total=0 时为 100
    /// 外层事务开启/提交失败时的数据库错误（此时整批已降级为失败）
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub commit_error: Option<String>,
}

impl TransactionResult {
    /// 开始一次聚合
    pub fn begin(total: usize) -> Self {
        let now = Utc::now();
        Self {
            total,
            successful: 0,
            failed: 0,
            failed_transactions: Vec::new(),
            start_time: now,
            end_time: now,
            processing_time_ms: 0,
            success_rate: 100.0,
            commit_error: None,
        }
    }

    pub fn record_success(&mut self, count: usize) {
        self.successful += count;
    }

    pub fn record_failure(&mut self, transaction_id: impl Into<String>, error: impl Into<String>) {
        self.failed += 1;
        self.failed_transactions.push(FailedTransaction {
            transaction_id: transaction_id.into(),
            error: error.into(),
        });
    }

    /// 整批降级为全部失败
    ///
    /// 用于外层事务提交失败: 批次真实状态不确定, 按全部失败保守处理
    pub fn downgrade_all<'a, I>(&mut self, transaction_ids: I, error: &str)
    where
        I: IntoIterator<Item = &'a str>,
    {
        self.successful = 0;
        self.failed = 0;
        self.failed_transactions.clear();
        for id in transaction_ids {
            self.record_failure(id, error);
        }
        self.commit_error = Some(error.to_string());
    }

    /// 结束聚合: 计算耗时与成功率
    pub fn finish(mut self) -> Self {
        self.end_time = Utc::now();
        self.processing_time_ms = (self.end_time - self.start_time)
            .num_milliseconds()
            .max(0) as u64;
        self.success_rate = compute_success_rate(self.successful, self.total);
        self
    }

    pub fn failed_ids(&self) -> Vec<&str> {
        self.failed_transactions
            .iter()
            .map(|f| f.transaction_id.as_str())
            .collect()
    }
}

/// 成功率（百分比）; total=0 视为 100%
pub fn compute_success_rate(successful: usize, total: usize) -> f64 {
    if total == 0 {
        100.0
    } else {
        successful as f64 / total as f64 * 100.0
    }
}
