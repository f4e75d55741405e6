// ==========================================
// 分块事务批处理引擎 - 批次文件解析
// ==========================================
// 支持: CSV (.csv, 带表头) / JSON (.json, 事务数组)
// CSV 列: id,type,amount,direction,description,reference_id,
//         article_id,account_id,target_account_id
// 错误定位: 行号为文件物理行号（表头为第 1 行, 含空白行）
// ==========================================

use crate::domain::{Direction, Transaction, TransactionType};
use crate::importer::error::{ImportError, ImportResult};
use csv::ReaderBuilder;
use std::collections::HashMap;
use std::fs::File;
use std::io::BufReader;
use std::path::Path;

// ==========================================
// CSV Parser
// ==========================================
pub struct CsvParser;

/// CSV 原始行
#[derive(Debug, Clone)]
pub struct RawRecord {
    /// 文件中的行号（从 1 开始）
    pub line: usize,
    /// 表头 -> 单元格, 已去首尾空白
    pub fields: HashMap<String, String>,
}

impl CsvParser {
    /// 读取为原始行（跳过完全空白的行, 保留其物理行号）
    pub fn parse_to_raw_records(&self, path: &Path) -> ImportResult<Vec<RawRecord>> {
        let file = File::open(path)?;
        let mut reader = ReaderBuilder::new()
            .has_headers(true)
            .flexible(true) // 允许行长度不一致
            .from_reader(file);

        let headers: Vec<String> = reader
            .headers()?
            .iter()
            .map(|h| h.trim().to_ascii_lowercase())
            .collect();

        let mut records = Vec::new();
        for (idx, result) in reader.records().enumerate() {
            let record = result?;
            // 无位置信息时按表头后的记录序号估算
            let line = record
                .position()
                .map(|p| p.line() as usize)
                .unwrap_or(idx + 2);
            let mut row_map = HashMap::new();
            for (col_idx, value) in record.iter().enumerate() {
                if let Some(header) = headers.get(col_idx) {
                    row_map.insert(header.clone(), value.trim().to_string());
                }
            }

            // 跳过完全空白的行
            if row_map.values().all(|v| v.is_empty()) {
                continue;
            }
            records.push(RawRecord {
                line,
                fields: row_map,
            });
        }
        Ok(records)
    }

    pub fn parse(&self, path: &Path) -> ImportResult<Vec<Transaction>> {
        self.parse_to_raw_records(path)?
            .iter()
            .map(|record| map_row(record.line, &record.fields))
            .collect()
    }
}

fn optional(row: &HashMap<String, String>, field: &str) -> Option<String> {
    row.get(field).filter(|v| !v.is_empty()).cloned()
}

fn required<'a>(row: &'a HashMap<String, String>, row_no: usize, field: &str) -> ImportResult<&'a str> {
    row.get(field)
        .map(String::as_str)
        .filter(|v| !v.is_empty())
        .ok_or_else(|| ImportError::MissingField {
            row: row_no,
            field: field.to_string(),
        })
}

/// 原始行 -> Transaction
///
/// 未知 type 保留为 Unknown, 交由校验器按分块失败处理;
/// amount/direction 无法解析视为文件错误
fn map_row(row_no: usize, row: &HashMap<String, String>) -> ImportResult<Transaction> {
    let amount_raw = required(row, row_no, "amount")?;
    let amount = amount_raw
        .parse::<f64>()
        .map_err(|e| ImportError::TypeConversionError {
            row: row_no,
            field: "amount".to_string(),
            message: format!("{} ({})", e, amount_raw),
        })?;

    let direction_raw = required(row, row_no, "direction")?;
    let direction = Direction::parse(direction_raw).ok_or_else(|| ImportError::TypeConversionError {
        row: row_no,
        field: "direction".to_string(),
        message: format!("期望 in/out, 实际 {}", direction_raw),
    })?;

    Ok(Transaction {
        id: optional(row, "id").unwrap_or_default(),
        transaction_type: TransactionType::parse(required(row, row_no, "type")?),
        amount,
        direction,
        description: optional(row, "description").unwrap_or_default(),
        reference_id: optional(row, "reference_id"),
        article_id: optional(row, "article_id"),
        account_id: optional(row, "account_id"),
        target_account_id: optional(row, "target_account_id"),
    })
}

// ==========================================
// JSON Parser
// ==========================================
pub struct JsonParser;

impl JsonParser {
    pub fn parse(&self, path: &Path) -> ImportResult<Vec<Transaction>> {
        let reader = BufReader::new(File::open(path)?);
        Ok(serde_json::from_reader(reader)?)
    }
}

// ==========================================
// 通用入口（根据扩展名自动选择）
// ==========================================

/// 加载批次文件
///
/// # 参数
/// - path: .csv 或 .json 文件路径
///
/// # 返回
/// - 文件中的事务（保持文件顺序）
pub fn load_batch_file<P: AsRef<Path>>(path: P) -> ImportResult<Vec<Transaction>> {
    let path = path.as_ref();
    if !path.exists() {
        return Err(ImportError::FileNotFound(path.display().to_string()));
    }

    let ext = path
        .extension()
        .and_then(|e| e.to_str())
        .unwrap_or("")
        .to_lowercase();

    let transactions = match ext.as_str() {
        "csv" => CsvParser.parse(path)?,
        "json" => JsonParser.parse(path)?,
        _ => return Err(ImportError::UnsupportedFormat(ext)),
    };

    tracing::info!(path = %path.display(), count = transactions.len(), "批次文件已加载");
    Ok(transactions)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::Builder;

    fn temp_with(suffix: &str, content: &str) -> tempfile::NamedTempFile {
        let mut file = Builder::new().suffix(suffix).tempfile().unwrap();
        write!(file, "{}", content).unwrap();
        file
    }

    #[test]
    fn test_csv_maps_columns() {
        let file = temp_with(
            ".csv",
            "id,type,amount,direction,article_id,account_id,target_account_id\n\
             T1,inventory,5,in,A1,,\n\
             ,,,,,,\n\
             T2,TRANSFER,12.5,out,,ACC1,ACC2\n",
        );

        let txs = load_batch_file(file.path()).unwrap();
        assert_eq!(txs.len(), 2);
        assert_eq!(txs[0].article_id.as_deref(), Some("A1"));
        assert_eq!(txs[0].account_id, None);
        assert_eq!(txs[1].transaction_type, TransactionType::Transfer);
        assert_eq!(txs[1].amount, 12.5);
        assert_eq!(txs[1].target_account_id.as_deref(), Some("ACC2"));
    }

    #[test]
    fn test_csv_unknown_type_kept() {
        let file = temp_with(".csv", "id,type,amount,direction\nT1,barter,1,in\n");
        let txs = load_batch_file(file.path()).unwrap();
        assert_eq!(txs[0].transaction_type, TransactionType::Unknown);
    }

    #[test]
    fn test_csv_bad_amount() {
        let file = temp_with(".csv", "id,type,amount,direction\nT1,inventory,abc,in\n");
        let err = load_batch_file(file.path()).unwrap_err();
        assert!(matches!(err, ImportError::TypeConversionError { row: 2, .. }));
    }

    #[test]
    fn test_csv_error_row_counts_skipped_lines() {
        let file = temp_with(
            ".csv",
            "id,type,amount,direction
             T1,inventory,1,in
             ,,,
             
             T2,inventory,oops,in
",
        );
        let err = load_batch_file(file.path()).unwrap_err();
        assert!(
            matches!(err, ImportError::TypeConversionError { row: 5, ref field, .. } if field == "amount"),
            "{:?}",
            err
        );

        let records = CsvParser.parse_to_raw_records(file.path()).unwrap();
        let lines: Vec<usize> = records.iter().map(|r| r.line).collect();
        assert_eq!(lines, vec![2, 5]);
    }

    #[test]
    fn test_csv_missing_direction() {
        let file = temp_with(".csv", "id,type,amount\nT1,inventory,3\n");
        let err = load_batch_file(file.path()).unwrap_err();
        assert!(matches!(err, ImportError::MissingField { row: 2, ref field } if field == "direction"));
    }

    #[test]
    fn test_json_array() {
        let file = temp_with(
            ".json",
            r#"[{"id":"T1","type":"financial","amount":10,"direction":"out","account_id":"ACC1"}]"#,
        );
        let txs = load_batch_file(file.path()).unwrap();
        assert_eq!(txs.len(), 1);
        assert_eq!(txs[0].transaction_type, TransactionType::Financial);
        assert_eq!(txs[0].description, "");
    }

    #[test]
    fn test_unsupported_and_missing() {
        let file = temp_with(".xlsx", "x");
        assert!(matches!(load_batch_file(file.path()), Err(ImportError::UnsupportedFormat(_))));
        assert!(matches!(
            load_batch_file("/nonexistent/batch.csv"),
            Err(ImportError::FileNotFound(_))
        ));
    }
}
