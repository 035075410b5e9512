use anyhow::{anyhow, bail, Result};
use async_trait::async_trait;
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::RwLock;

use crate::domain::ports::RowRepository;
use crate::domain::row::{ColumnSpec, Row};
use crate::domain::value_objects::{ColumnName, PrimaryKey, Schema, TableName};

#[derive(Debug, Default)]
struct MemoryTable {
    columns: Vec<ColumnSpec>,
    rows: BTreeMap<PrimaryKey, Row>,
}

/// In-memory implementation of [`RowRepository`].
///
/// Holds one side of a migration in process: tests write rows (including
/// deliberately corrupted ones) straight into it, and library users can
/// verify data they already hold. The schema argument is ignored.
#[derive(Debug, Default)]
pub struct MemoryRowRepository {
    tables: RwLock<BTreeMap<TableName, MemoryTable>>,
    unavailable: AtomicBool,
}

impl MemoryRowRepository {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn create_table(&self, table: &TableName, columns: Vec<ColumnSpec>) {
        if let Ok(mut tables) = self.tables.write() {
            tables.insert(
                table.clone(),
                MemoryTable {
                    columns,
                    rows: BTreeMap::new(),
                },
            );
        }
    }

    /// Insert or replace a row in its table. Rows for unknown tables are
    /// dropped.
    pub fn upsert(&self, row: Row) {
        if let Ok(mut tables) = self.tables.write() {
            if let Some(t) = tables.get_mut(&row.table) {
                t.rows.insert(row.pk, row);
            }
        }
    }

    pub fn delete(&self, table: &TableName, pk: PrimaryKey) {
        if let Ok(mut tables) = self.tables.write() {
            if let Some(t) = tables.get_mut(table) {
                t.rows.remove(&pk);
            }
        }
    }

    pub fn row(&self, table: &TableName, pk: PrimaryKey) -> Option<Row> {
        self.tables
            .read()
            .ok()?
            .get(table)
            .and_then(|t| t.rows.get(&pk).cloned())
    }

    /// Make every read fail, as a lost connection would.
    pub fn set_unavailable(&self, unavailable: bool) {
        self.unavailable.store(unavailable, Ordering::SeqCst);
    }

    fn check_available(&self) -> Result<()> {
        if self.unavailable.load(Ordering::SeqCst) {
            bail!("connection refused");
        }
        Ok(())
    }
}

#[async_trait]
impl RowRepository for MemoryRowRepository {
    async fn describe_columns(&self, _schema: &Schema, table: &TableName) -> Result<Vec<ColumnSpec>> {
        self.check_available()?;
        let tables = self.tables.read().map_err(|_| anyhow!("table store poisoned"))?;
        let t = tables
            .get(table)
            .ok_or_else(|| anyhow!("table {} does not exist", table))?;
        Ok(t.columns.clone())
    }

    async fn fetch_rows(
        &self,
        _schema: &Schema,
        table: &TableName,
        _pk_col: &ColumnName,
        pks: &[PrimaryKey],
    ) -> Result<Vec<Row>> {
        self.check_available()?;
        let tables = self.tables.read().map_err(|_| anyhow!("table store poisoned"))?;
        let t = tables
            .get(table)
            .ok_or_else(|| anyhow!("table {} does not exist", table))?;
        let mut rows: Vec<Row> = pks.iter().filter_map(|pk| t.rows.get(pk).cloned()).collect();
        rows.sort_by_key(|r| r.pk);
        rows.dedup_by_key(|r| r.pk);
        Ok(rows)
    }

    async fn fetch_primary_keys(
        &self,
        _schema: &Schema,
        table: &TableName,
        _pk_col: &ColumnName,
    ) -> Result<Vec<PrimaryKey>> {
        self.check_available()?;
        let tables = self.tables.read().map_err(|_| anyhow!("table store poisoned"))?;
        let t = tables
            .get(table)
            .ok_or_else(|| anyhow!("table {} does not exist", table))?;
        Ok(t.rows.keys().copied().collect())
    }
}
