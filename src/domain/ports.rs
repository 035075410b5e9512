use crate::domain::{
    fingerprint::ColumnOrder,
    mismatch::MismatchSet,
    row::{ColumnSpec, Row},
    value_objects::{ColumnName, PrimaryKey, Schema, TableName},
    verification::VerificationRun,
};
use anyhow::Result;
use async_trait::async_trait;

/// Port: read access to one side of the migration (implemented by
/// SqlxRowRepository and MemoryRowRepository).
///
/// Every call is a single short read; implementations must not hold locks
/// on the database beyond it.
#[async_trait]
pub trait RowRepository: Send + Sync {
    /// Column metadata in ordinal position.
    async fn describe_columns(&self, schema: &Schema, table: &TableName) -> Result<Vec<ColumnSpec>>;

    /// Rows whose key is in `pks`. Keys that do not exist are simply absent
    /// from the result.
    async fn fetch_rows(
        &self,
        schema: &Schema,
        table: &TableName,
        pk_col: &ColumnName,
        pks: &[PrimaryKey],
    ) -> Result<Vec<Row>>;

    /// Every primary key currently in the table, ascending.
    async fn fetch_primary_keys(
        &self,
        schema: &Schema,
        table: &TableName,
        pk_col: &ColumnName,
    ) -> Result<Vec<PrimaryKey>>;
}

/// Port: mismatch detection (implemented by MismatchDetector)
pub trait Detector: Send + Sync {
    fn compare(&self, source: &[Row], target: &[Row], order: &ColumnOrder) -> MismatchSet;
}

/// Port: report formatting (implemented by JsonWriter)
pub trait OutputWriter: Send + Sync {
    /// Serializes the verification history to a string
    fn format(&self, runs: &[VerificationRun]) -> Result<String>;
    /// Extension of the produced file (e.g. "json")
    fn extension(&self) -> &'static str;
}
