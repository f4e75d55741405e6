// ==========================================
// 分块事务批处理引擎 - 保存点作用域
// ==========================================
// 职责: 以作用域方式持有 SQLite 保存点
// 约束:
// - 显式 release() 才会保留改动
// - rollback() 执行 ROLLBACK TO + RELEASE, 保存点出栈
// - 未显式结束即离开作用域（错误提前返回/panic 展开）时自动回滚并出栈
// ==========================================
// 注: 保存点名称按分块序号复用（chunk_1, chunk_2 ...）,
//     仅在同一会话内分块严格串行时成立
// ==========================================

use crate::engine::error::ProcessingResult;
use rusqlite::{Connection, Savepoint, Transaction};

pub struct SavepointScope<'conn> {
    name: String,
    savepoint: Option<Savepoint<'conn>>,
}

impl<'conn> SavepointScope<'conn> {
    /// 在外层事务内开启保存点
    pub fn open(outer: &'conn mut Transaction<'_>, name: impl Into<String>) -> ProcessingResult<Self> {
        let name = name.into();
        let savepoint = outer.savepoint_with_name(name.clone())?;
        tracing::trace!(savepoint = %name, "开启保存点");
        Ok(Self {
            name,
            savepoint: Some(savepoint),
        })
    }

    /// 在当前保存点内开启嵌套保存点
    pub fn nested(&mut self, name: impl Into<String>) -> ProcessingResult<SavepointScope<'_>> {
        let name = name.into();
        let parent = self.savepoint_mut()?;
        let savepoint = parent.savepoint_with_name(name.clone())?;
        tracing::trace!(savepoint = %name, "开启嵌套保存点");
        Ok(SavepointScope {
            name,
            savepoint: Some(savepoint),
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// 当前会话（在保存点内执行 SQL）
    pub fn conn(&self) -> ProcessingResult<&Connection> {
        match self.savepoint.as_ref() {
            Some(sp) => Ok(&**sp),
            None => Err(crate::engine::error::ProcessingError::Database(format!(
                "保存点已结束: {}",
                self.name
            ))),
        }
    }

    fn savepoint_mut(&mut self) -> ProcessingResult<&mut Savepoint<'conn>> {
        let name = &self.name;
        self.savepoint.as_mut().ok_or_else(|| {
            crate::engine::error::ProcessingError::Database(format!("保存点已结束: {}", name))
        })
    }

    /// 释放保存点（保留改动）
    pub fn release(mut self) -> ProcessingResult<()> {
        if let Some(sp) = self.savepoint.take() {
            sp.commit()?;
            tracing::trace!(savepoint = %self.name, "释放保存点");
        }
        Ok(())
    }

    /// 回滚到保存点并出栈（撤销本作用域内全部改动）
    pub fn rollback(mut self) -> ProcessingResult<()> {
        if let Some(mut sp) = self.savepoint.take() {
            sp.rollback()?;
            sp.commit()?;
            tracing::trace!(savepoint = %self.name, "回滚保存点");
        }
        Ok(())
    }
}

impl Drop for SavepointScope<'_> {
    fn drop(&mut self) {
        if let Some(mut sp) = self.savepoint.take() {
            let outcome = sp.rollback().and_then(|_| sp.commit());
            match outcome {
                Ok(()) => tracing::debug!(savepoint = %self.name, "保存点未显式结束, 已自动回滚"),
                Err(e) => tracing::error!(savepoint = %self.name, error = %e, "保存点自动回滚失败"),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::init_schema;
    use crate::repository::inventory_repo::{adjust_stock, stock_of};

    fn setup() -> Connection {
        let conn = Connection::open_in_memory().unwrap();
        init_schema(&conn).unwrap();
        conn
    }

    #[test]
    fn test_release_keeps_changes() {
        let mut conn = setup();
        let mut tx = conn.transaction().unwrap();
        {
            let scope = SavepointScope::open(&mut tx, "chunk_1").unwrap();
            adjust_stock(scope.conn().unwrap(), "ART", 5.0).unwrap();
            scope.release().unwrap();
        }
        tx.commit().unwrap();
        assert_eq!(stock_of(&conn, "ART").unwrap(), 5.0);
    }

    #[test]
    fn test_rollback_discards_only_scope() {
        let mut conn = setup();
        let mut tx = conn.transaction().unwrap();
        adjust_stock(&tx, "ART", 1.0).unwrap();
        {
            let scope = SavepointScope::open(&mut tx, "chunk_1").unwrap();
            adjust_stock(scope.conn().unwrap(), "ART", 5.0).unwrap();
            scope.rollback().unwrap();
        }
        // 回滚后保存点已出栈, 同名保存点可以再次开启
        {
            let scope = SavepointScope::open(&mut tx, "chunk_1").unwrap();
            adjust_stock(scope.conn().unwrap(), "ART", 2.0).unwrap();
            scope.release().unwrap();
        }
        tx.commit().unwrap();
        assert_eq!(stock_of(&conn, "ART").unwrap(), 3.0);
    }

    #[test]
    fn test_drop_rolls_back() {
        let mut conn = setup();
        let mut tx = conn.transaction().unwrap();
        {
            let scope = SavepointScope::open(&mut tx, "chunk_1").unwrap();
            adjust_stock(scope.conn().unwrap(), "ART", 5.0).unwrap();
            // 不调用 release / rollback
        }
        tx.commit().unwrap();
        assert_eq!(stock_of(&conn, "ART").unwrap(), 0.0);
    }

    #[test]
    fn test_nested_rollback_keeps_parent() {
        let mut conn = setup();
        let mut tx = conn.transaction().unwrap();
        {
            let mut scope = SavepointScope::open(&mut tx, "chunk_1").unwrap();
            adjust_stock(scope.conn().unwrap(), "ART", 5.0).unwrap();
            {
                let inner = scope.nested("transfer_legs").unwrap();
                adjust_stock(inner.conn().unwrap(), "ART", 100.0).unwrap();
                inner.rollback().unwrap();
            }
            scope.release().unwrap();
        }
        tx.commit().unwrap();
        assert_eq!(stock_of(&conn, "ART").unwrap(), 5.0);
    }
}
