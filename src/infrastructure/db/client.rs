use anyhow::{Context, Result};
use async_trait::async_trait;
use sqlx::any::AnyPoolOptions;
use sqlx::AnyPool;
use std::sync::Arc;
use tracing::{debug, warn};

use crate::domain::encoding::{Charset, Collation};
use crate::domain::ports::RowRepository;
use crate::domain::row::{ColumnSpec, Row};
use crate::domain::value_objects::{ColumnName, PrimaryKey, Schema, TableName};
use crate::infrastructure::config::DbConfig;
use crate::infrastructure::db::dialect::{from_driver, QueryDialect};
use crate::infrastructure::db::row_mapper::{decode_key, row_from_any};
use crate::infrastructure::db::sql_utils::{build_fetch_rows_query, build_primary_keys_query};

pub struct SqlxRowRepository {
    pool: AnyPool,
    dialect: Arc<dyn QueryDialect>,
}

/// Connect to the database described in `cfg` and return a `SqlxRowRepository`.
pub async fn connect(cfg: &DbConfig) -> Result<SqlxRowRepository> {
    sqlx::any::install_default_drivers();

    let pool = AnyPoolOptions::new()
        .max_connections(5)
        .connect(&cfg.url())
        .await
        .with_context(|| {
            format!(
                "Failed to connect to {} (driver: {})",
                cfg.dbname, cfg.driver
            )
        })?;

    debug!(
        "Connected to {}/{} via {} driver",
        cfg.host, cfg.dbname, cfg.driver
    );

    Ok(SqlxRowRepository {
        pool,
        dialect: Arc::from(from_driver(&cfg.driver)),
    })
}

/// Read a nullable column from an AnyRow as String, handling MySQL's habit of
/// returning information_schema string columns as BLOB to sqlx AnyRow.
fn opt_blob_or_string(row: &sqlx::any::AnyRow, idx: usize) -> Result<Option<String>> {
    use sqlx::{Column, Row, TypeInfo};
    let type_name = row.column(idx).type_info().name();
    if type_name == "BLOB" {
        let bytes: Option<Vec<u8>> = row.try_get(idx)?;
        Ok(bytes.map(|b| String::from_utf8_lossy(&b).into_owned()))
    } else {
        Ok(row.try_get(idx)?)
    }
}

/// Map `information_schema` charset / collation names onto the domain types.
/// Unknown names fall back to byte comparison, which can only over-report.
fn column_spec(name: String, charset: Option<String>, collation: Option<String>) -> ColumnSpec {
    let charset = charset.and_then(|c| match c.parse::<Charset>() {
        Ok(cs) => Some(cs),
        Err(e) => {
            warn!(column = %name, "{}; comparing raw bytes", e);
            None
        }
    });
    let collation = collation.and_then(|c| match Collation::parse(&c) {
        Ok(coll) => Some(coll),
        Err(e) => {
            warn!(column = %name, "{}; comparing without collation folding", e);
            None
        }
    });
    ColumnSpec {
        name: ColumnName(name),
        charset,
        collation,
    }
}

#[async_trait]
impl RowRepository for SqlxRowRepository {
    async fn describe_columns(&self, schema: &Schema, table: &TableName) -> Result<Vec<ColumnSpec>> {
        let rows = sqlx::query(self.dialect.introspect_sql())
            .bind(&schema.0)
            .bind(&table.0)
            .fetch_all(&self.pool)
            .await
            .with_context(|| format!("Failed to describe columns for {}.{}", schema.0, table.0))?;

        let mut cols = Vec::with_capacity(rows.len());
        for row in &rows {
            let name = opt_blob_or_string(row, 0)?.unwrap_or_default();
            let charset = opt_blob_or_string(row, 1)?;
            let collation = opt_blob_or_string(row, 2)?;
            cols.push(column_spec(name, charset, collation));
        }
        Ok(cols)
    }

    async fn fetch_rows(
        &self,
        schema: &Schema,
        table: &TableName,
        pk_col: &ColumnName,
        pks: &[PrimaryKey],
    ) -> Result<Vec<Row>> {
        if pks.is_empty() {
            return Ok(Vec::new());
        }

        // Describe per batch: the read must reflect the table as it is now,
        // not as it was when the pass started.
        let columns = self.describe_columns(schema, table).await?;
        let query = build_fetch_rows_query(
            schema,
            table,
            pk_col,
            &columns,
            pks.len(),
            self.dialect.as_ref(),
        );

        debug!("Executing: {}", query);

        let mut q = sqlx::query(&query);
        for pk in pks {
            let key = i64::try_from(pk.0)
                .with_context(|| format!("primary key {} exceeds BIGINT range", pk))?;
            q = q.bind(key);
        }

        let rows = q
            .fetch_all(&self.pool)
            .await
            .with_context(|| format!("Failed to query {}.{}", schema.0, table.0))?;

        rows.iter()
            .map(|r| row_from_any(r, table, pk_col, &columns))
            .collect()
    }

    async fn fetch_primary_keys(
        &self,
        schema: &Schema,
        table: &TableName,
        pk_col: &ColumnName,
    ) -> Result<Vec<PrimaryKey>> {
        let query = build_primary_keys_query(schema, table, pk_col, self.dialect.as_ref());
        debug!("Executing: {}", query);

        let rows = sqlx::query(&query)
            .fetch_all(&self.pool)
            .await
            .with_context(|| format!("Failed to list keys of {}.{}", schema.0, table.0))?;

        rows.iter().map(|r| decode_key(r, 0)).collect()
    }
}
