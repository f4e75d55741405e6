// ==========================================
// 分块事务批处理引擎 - 领域类型定义
// ==========================================
// 约束: 类型分派一律使用封闭枚举 + 穷举 match, 不做字符串分派
// 序列化格式: snake_case (与数据库存储值一致)
// ==========================================

use serde::{Deserialize, Serialize};
use std::fmt;

// ==========================================
// 事务类型 (Transaction Type)
// ==========================================
// Unknown 仅用于承接无法识别的输入, 由校验器拒绝
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransactionType {
    Inventory, // 库存出入
    Financial, // 财务记账
    Transfer,  // 账户间转账
    #[serde(other)]
    Unknown,
}

impl TransactionType {
    pub fn as_str(&self) -> &'static str {
        match self {
            TransactionType::Inventory => "inventory",
            TransactionType::Financial => "financial",
            TransactionType::Transfer => "transfer",
            TransactionType::Unknown => "unknown",
        }
    }

    /// 从存储值解析（大小写不敏感，无法识别时返回 Unknown）
    pub fn parse(s: &str) -> Self {
        match s.trim().to_ascii_lowercase().as_str() {
            "inventory" => TransactionType::Inventory,
            "financial" => TransactionType::Financial,
            "transfer" => TransactionType::Transfer,
            _ => TransactionType::Unknown,
        }
    }
}

impl fmt::Display for TransactionType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

// ==========================================
// 方向 (Direction)
// ==========================================
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Direction {
    In,  // 入库 / 贷记
    Out, // 出库 / 借记
}

impl Direction {
    pub fn as_str(&self) -> &'static str {
        match self {
            Direction::In => "in",
            Direction::Out => "out",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "in" => Some(Direction::In),
            "out" => Some(Direction::Out),
            _ => None,
        }
    }

    /// 带符号金额: in 为正, out 为负
    pub fn signed(&self, amount: f64) -> f64 {
        match self {
            Direction::In => amount,
            Direction::Out => -amount,
        }
    }
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

// ==========================================
// 事务处理状态 (Transaction State)
// ==========================================
// 状态流转: pending → processing → completed | failed
//          pending → failed
// 终态不可再流转
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransactionState {
    Pending,
    Processing,
    Completed,
    Failed,
}

impl TransactionState {
    pub fn as_str(&self) -> &'static str {
        match self {
            TransactionState::Pending => "pending",
            TransactionState::Processing => "processing",
            TransactionState::Completed => "completed",
            TransactionState::Failed => "failed",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "pending" => Some(TransactionState::Pending),
            "processing" => Some(TransactionState::Processing),
            "completed" => Some(TransactionState::Completed),
            "failed" => Some(TransactionState::Failed),
            _ => None,
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, TransactionState::Completed | TransactionState::Failed)
    }

    /// 是否允许从当前状态流转到 `next`（只允许单调前进）
    pub fn can_transition_to(&self, next: TransactionState) -> bool {
        match (self, next) {
            (TransactionState::Pending, TransactionState::Processing)
            | (TransactionState::Pending, TransactionState::Failed)
            | (TransactionState::Processing, TransactionState::Completed)
            | (TransactionState::Processing, TransactionState::Failed) => true,
            _ => false,
        }
    }
}

impl fmt::Display for TransactionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

// ==========================================
// 批次状态 (Batch Status)
// ==========================================
// 状态流转: pending → processing → completed | failed
//          pending → cancelled (仅此一条路径)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BatchStatus {
    Pending,
    Processing,
    Completed,
    Failed,
    Cancelled,
}

impl BatchStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            BatchStatus::Pending => "pending",
            BatchStatus::Processing => "processing",
            BatchStatus::Completed => "completed",
            BatchStatus::Failed => "failed",
            BatchStatus::Cancelled => "cancelled",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "pending" => Some(BatchStatus::Pending),
            "processing" => Some(BatchStatus::Processing),
            "completed" => Some(BatchStatus::Completed),
            "failed" => Some(BatchStatus::Failed),
            "cancelled" => Some(BatchStatus::Cancelled),
            _ => None,
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            BatchStatus::Completed | BatchStatus::Failed | BatchStatus::Cancelled
        )
    }

    pub fn can_transition_to(&self, next: BatchStatus) -> bool {
        match (self, next) {
            (BatchStatus::Pending, BatchStatus::Processing)
            | (BatchStatus::Pending, BatchStatus::Cancelled)
            | (BatchStatus::Pending, BatchStatus::Failed)
            | (BatchStatus::Processing, BatchStatus::Completed)
            | (BatchStatus::Processing, BatchStatus::Failed) => true,
            _ => false,
        }
    }
}

impl fmt::Display for BatchStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}
