use crate::domain::row::ColumnSpec;
use crate::domain::value_objects::{ColumnName, Schema, TableName};
use crate::infrastructure::db::dialect::QueryDialect;

// ─────────────────────────────────────────────────────────────────────────────
// Query builders
// ─────────────────────────────────────────────────────────────────────────────

/// Build the batch read:
/// `SELECT <key>, <raw col>… FROM <schema>.<table> WHERE <pk> IN (…) ORDER BY <pk>`.
///
/// The key comes first; every other column in `columns` follows in order as
/// raw bytes. `n_keys` placeholders are emitted for the IN list.
pub fn build_fetch_rows_query(
    schema: &Schema,
    table: &TableName,
    pk_col: &ColumnName,
    columns: &[ColumnSpec],
    n_keys: usize,
    dialect: &dyn QueryDialect,
) -> String {
    let prefix = dialect.schema_prefix(&schema.0);
    let table_q = dialect.quote_ident(&table.0);
    let pk_q = dialect.quote_ident(&pk_col.0);

    let mut exprs = vec![dialect.key_expr(&pk_q)];
    exprs.extend(
        data_columns(columns, pk_col)
            .map(|c| dialect.raw_bytes_expr(&dialect.quote_ident(&c.name.0))),
    );

    let placeholders: Vec<String> = (1..=n_keys).map(|n| dialect.placeholder(n)).collect();

    format!(
        "SELECT {} FROM {}{} WHERE {} IN ({}) ORDER BY {}",
        exprs.join(", "),
        prefix,
        table_q,
        pk_q,
        placeholders.join(", "),
        pk_q
    )
}

/// Build `SELECT <key> FROM <schema>.<table> ORDER BY <pk>`.
pub fn build_primary_keys_query(
    schema: &Schema,
    table: &TableName,
    pk_col: &ColumnName,
    dialect: &dyn QueryDialect,
) -> String {
    let prefix = dialect.schema_prefix(&schema.0);
    let table_q = dialect.quote_ident(&table.0);
    let pk_q = dialect.quote_ident(&pk_col.0);
    format!(
        "SELECT {} FROM {}{} ORDER BY {}",
        dialect.key_expr(&pk_q),
        prefix,
        table_q,
        pk_q
    )
}

/// Columns other than the primary key, in the order they are selected.
pub fn data_columns<'a>(
    columns: &'a [ColumnSpec],
    pk_col: &'a ColumnName,
) -> impl Iterator<Item = &'a ColumnSpec> + 'a {
    columns.iter().filter(move |c| &c.name != pk_col)
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
