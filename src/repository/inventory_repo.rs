// ==========================================
// 分块事务批处理引擎 - 库存数据仓储
// ==========================================
// 对齐: inventory_stock 表
// 红线: Repository 不做业务逻辑（库存不足判定在引擎侧）
// ==========================================

use crate::repository::error::RepositoryResult;
use rusqlite::{params, Connection, OptionalExtension};

/// 读取物料当前库存（不存在视为 0）
pub fn stock_of(conn: &Connection, article_id: &str) -> RepositoryResult<f64> {
    let qty: Option<f64> = conn
        .query_row(
            "SELECT quantity FROM inventory_stock WHERE article_id = ?1",
            [article_id],
            |row| row.get(0),
        )
        .optional()?;
    Ok(qty.unwrap_or(0.0))
}

/// 按增量调整库存（行不存在时创建）
///
/// # 返回
/// - 调整后的库存数量
pub fn adjust_stock(conn: &Connection, article_id: &str, delta: f64) -> RepositoryResult<f64> {
    conn.execute(
        r#"
        INSERT INTO inventory_stock (article_id, quantity, updated_at)
        VALUES (?1, ?2, datetime('now'))
        ON CONFLICT(article_id) DO UPDATE SET
            quantity = quantity + excluded.quantity,
            updated_at = excluded.updated_at
        "#,
        params![article_id, delta],
    )?;
    stock_of(conn, article_id)
}

/// 直接设置库存（初始化/盘点用）
pub fn set_stock(conn: &Connection, article_id: &str, quantity: f64) -> RepositoryResult<()> {
    conn.execute(
        r#"
        INSERT INTO inventory_stock (article_id, quantity, updated_at)
        VALUES (?1, ?2, datetime('now'))
        ON CONFLICT(article_id) DO UPDATE SET
            quantity = excluded.quantity,
            updated_at = excluded.updated_at
        "#,
        params![article_id, quantity],
    )?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::init_schema;

    #[test]
    fn test_adjust_creates_row() {
        let conn = Connection::open_in_memory().unwrap();
        init_schema(&conn).unwrap();

        assert_eq!(stock_of(&conn, "ART-1").unwrap(), 0.0);
        assert_eq!(adjust_stock(&conn, "ART-1", 10.0).unwrap(), 10.0);
        assert_eq!(adjust_stock(&conn, "ART-1", -4.0).unwrap(), 6.0);

        set_stock(&conn, "ART-1", 1.5).unwrap();
        assert_eq!(stock_of(&conn, "ART-1").unwrap(), 1.5);
    }
}
