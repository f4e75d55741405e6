// ==========================================
// 分块事务批处理引擎 - 导入层
// ==========================================
// 职责: 批次文件 -> Vec<Transaction>
// 支持: CSV, JSON
// ==========================================

pub mod error;
pub mod file_parser;

pub use error::{ImportError, ImportResult};
pub use file_parser::{load_batch_file, CsvParser, JsonParser, RawRecord};
