use anyhow::{Context, Result};
use sqlx::any::AnyRow;
use sqlx::Row as _;

use crate::domain::row::{ColumnSpec, ColumnValue, Row};
use crate::domain::value_objects::{ColumnName, PrimaryKey, TableName};
use crate::infrastructure::db::sql_utils::data_columns;

/// Decode the primary key at `idx`. Keys are selected as signed 64-bit
/// integers; negative keys cannot be migrated and are rejected.
pub fn decode_key(row: &AnyRow, idx: usize) -> Result<PrimaryKey> {
    let raw: i64 = row.try_get(idx).context("decoding primary key")?;
    let key = u64::try_from(raw).with_context(|| format!("negative primary key {}", raw))?;
    Ok(PrimaryKey(key))
}

/// Convert a sqlx `AnyRow` produced by `build_fetch_rows_query` into a `Row`.
///
/// Column 0 is the key; the data columns follow in `columns` order as raw
/// bytes, each tagged with the charset `information_schema` declared for it.
pub fn row_from_any(
    row: &AnyRow,
    table: &TableName,
    pk_col: &ColumnName,
    columns: &[ColumnSpec],
) -> Result<Row> {
    let mut out = Row::new(table.clone(), decode_key(row, 0)?);
    for (i, spec) in data_columns(columns, pk_col).enumerate() {
        let raw: Option<Vec<u8>> = row
            .try_get(i + 1)
            .with_context(|| format!("decoding column {}", spec.name))?;
        out.columns.insert(
            spec.name.0.clone(),
            ColumnValue {
                raw,
                charset: spec.charset,
            },
        );
    }
    Ok(out)
}
