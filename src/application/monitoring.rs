use crate::domain::fingerprint::ColumnOrder;
use crate::domain::mismatch::MismatchSet;
use crate::domain::ports::{Detector, RowRepository};
use crate::domain::row::{ColumnSpec, Row};
use crate::domain::value_objects::{ColumnName, PrimaryKey, Schema, TableName};
use anyhow::Result;
use async_trait::async_trait;
use std::sync::{Arc, Mutex};
use std::time::Instant;
use tracing::{debug, instrument};

// ─── PerfReport ──────────────────────────────────────────────────────────────

/// Timings of one operation on one table, summed over every call.
#[derive(Debug, Clone, serde::Serialize)]
pub struct OpTiming {
    /// Operation name: "fetch_rows", "fetch_primary_keys" or "compare".
    pub operation: &'static str,
    /// Table this operation was performed on.
    pub table: String,
    /// Number of calls folded into this entry.
    pub calls: usize,
    /// Elapsed wall time in milliseconds, across all calls.
    pub duration_ms: u128,
    /// Number of rows involved (fetched, listed or compared).
    pub rows: usize,
}

/// Accumulated performance timings for one migration attempt.
///
/// Shared across all decorator instances via `Arc<Mutex<_>>`. Holds one
/// entry per operation and table, so it stays small however long the
/// migration runs.
#[derive(Debug, Default, Clone, serde::Serialize)]
pub struct PerfReport {
    pub timings: Vec<OpTiming>,
    pub total_rows_fetched: usize,
    pub total_rows_compared: usize,
    pub total_ms: u128,
}

impl PerfReport {
    pub fn new() -> Arc<Mutex<Self>> {
        Arc::new(Mutex::new(Self::default()))
    }

    /// Copy of the report as it stands.
    pub fn snapshot(report: &Arc<Mutex<Self>>) -> Self {
        match report.lock() {
            Ok(r) => r.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }

    fn record(report: &Arc<Mutex<Self>>, operation: &'static str, table: &str, duration_ms: u128, rows: usize) {
        if let Ok(mut r) = report.lock() {
            r.total_ms += duration_ms;
            match operation {
                "fetch_rows" => r.total_rows_fetched += rows,
                "compare" => r.total_rows_compared += rows,
                _ => {}
            }
            match r
                .timings
                .iter_mut()
                .find(|t| t.operation == operation && t.table == table)
            {
                Some(t) => {
                    t.calls += 1;
                    t.duration_ms += duration_ms;
                    t.rows += rows;
                }
                None => r.timings.push(OpTiming {
                    operation,
                    table: table.to_string(),
                    calls: 1,
                    duration_ms,
                    rows,
                }),
            }
        }
    }
}

// ─── MonitoringRowRepository ─────────────────────────────────────────────────

/// Decorator: wraps any `RowRepository`, measures wall time per read and
/// folds the result into the shared `PerfReport`.
pub struct MonitoringRowRepository {
    inner: Arc<dyn RowRepository>,
    report: Arc<Mutex<PerfReport>>,
}

impl MonitoringRowRepository {
    pub fn new(inner: Arc<dyn RowRepository>, report: Arc<Mutex<PerfReport>>) -> Self {
        Self { inner, report }
    }
}

#[async_trait]
impl RowRepository for MonitoringRowRepository {
    async fn describe_columns(&self, schema: &Schema, table: &TableName) -> Result<Vec<ColumnSpec>> {
        self.inner.describe_columns(schema, table).await
    }

    #[instrument(
        name = "fetch_rows",
        skip(self, schema, table, pk_col, pks),
        fields(db.schema = %schema.0, db.table = %table.0, batch = pks.len()),
        level = "debug"
    )]
    async fn fetch_rows(
        &self,
        schema: &Schema,
        table: &TableName,
        pk_col: &ColumnName,
        pks: &[PrimaryKey],
    ) -> Result<Vec<Row>> {
        let start = Instant::now();
        let rows = self.inner.fetch_rows(schema, table, pk_col, pks).await?;
        let duration_ms = start.elapsed().as_millis();

        debug!(table = %table.0, rows = rows.len(), duration_ms, "fetch_rows completed");

        PerfReport::record(&self.report, "fetch_rows", &table.0, duration_ms, rows.len());

        Ok(rows)
    }

    #[instrument(
        name = "fetch_primary_keys",
        skip(self, schema, table, pk_col),
        fields(db.schema = %schema.0, db.table = %table.0),
        level = "debug"
    )]
    async fn fetch_primary_keys(
        &self,
        schema: &Schema,
        table: &TableName,
        pk_col: &ColumnName,
    ) -> Result<Vec<PrimaryKey>> {
        let start = Instant::now();
        let pks = self.inner.fetch_primary_keys(schema, table, pk_col).await?;
        let duration_ms = start.elapsed().as_millis();

        debug!(table = %table.0, keys = pks.len(), duration_ms, "fetch_primary_keys completed");

        PerfReport::record(&self.report, "fetch_primary_keys", &table.0, duration_ms, pks.len());

        Ok(pks)
    }
}

// ─── MonitoringDetector ──────────────────────────────────────────────────────

/// Decorator: wraps any `Detector`, measures wall time per `compare` call,
/// and folds the result into the shared `PerfReport`.
pub struct MonitoringDetector {
    inner: Arc<dyn Detector>,
    report: Arc<Mutex<PerfReport>>,
}

impl MonitoringDetector {
    pub fn new(inner: Arc<dyn Detector>, report: Arc<Mutex<PerfReport>>) -> Self {
        Self { inner, report }
    }
}

impl Detector for MonitoringDetector {
    #[instrument(
        name = "compare",
        skip(self, source, target, order),
        fields(
            db.table = %order.table.0,
            source.rows = source.len(),
            target.rows = target.len(),
        ),
        level = "debug"
    )]
    fn compare(&self, source: &[Row], target: &[Row], order: &ColumnOrder) -> MismatchSet {
        let start = Instant::now();
        let result = self.inner.compare(source, target, order);
        let duration_ms = start.elapsed().as_millis();

        debug!(table = %order.table.0, mismatches = result.len(), duration_ms, "compare completed");

        PerfReport::record(
            &self.report,
            "compare",
            &order.table.0,
            duration_ms,
            source.len().max(target.len()),
        );

        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::application::detector::MismatchDetector;
    use crate::domain::row::ColumnValue;
    use crate::infrastructure::db::memory::MemoryRowRepository;

    #[tokio::test]
    async fn records_fetch_and_compare_timings() {
        let table = TableName("t".into());
        let repo = MemoryRowRepository::new();
        repo.create_table(&table, vec![ColumnSpec::binary("id"), ColumnSpec::binary("data")]);
        repo.upsert(Row::new(table.clone(), PrimaryKey(1)).with("data", ColumnValue::bytes("x")));

        let report = PerfReport::new();
        let monitored = MonitoringRowRepository::new(Arc::new(repo), Arc::clone(&report));
        let rows = monitored
            .fetch_rows(&Schema("s".into()), &table, &ColumnName("id".into()), &[PrimaryKey(1)])
            .await
            .unwrap();

        let detector = MonitoringDetector::new(Arc::new(MismatchDetector::new()), Arc::clone(&report));
        let order = ColumnOrder {
            table: table.clone(),
            primary_key: ColumnName("id".into()),
            columns: vec![],
        };
        detector.compare(&rows, &rows, &order);

        let r = PerfReport::snapshot(&report);
        assert_eq!(r.timings.len(), 2);
        assert_eq!(r.total_rows_fetched, 1);
        assert_eq!(r.total_rows_compared, 1);
        assert_eq!(r.timings[0].operation, "fetch_rows");
        assert_eq!(r.timings[1].operation, "compare");
    }

    #[tokio::test]
    async fn repeated_calls_fold_into_one_entry_per_table() {
        let table = TableName("t".into());
        let repo = MemoryRowRepository::new();
        repo.create_table(&table, vec![ColumnSpec::binary("id"), ColumnSpec::binary("data")]);
        for pk in 1..=3 {
            repo.upsert(Row::new(table.clone(), PrimaryKey(pk)).with("data", ColumnValue::bytes("x")));
        }

        let report = PerfReport::new();
        let monitored = MonitoringRowRepository::new(Arc::new(repo), Arc::clone(&report));
        for pk in 1..=3 {
            monitored
                .fetch_rows(&Schema("s".into()), &table, &ColumnName("id".into()), &[PrimaryKey(pk)])
                .await
                .unwrap();
        }
        monitored
            .fetch_primary_keys(&Schema("s".into()), &table, &ColumnName("id".into()))
            .await
            .unwrap();

        let r = PerfReport::snapshot(&report);
        assert_eq!(r.timings.len(), 2);
        assert_eq!(r.timings[0].operation, "fetch_rows");
        assert_eq!(r.timings[0].calls, 3);
        assert_eq!(r.timings[0].rows, 3);
        assert_eq!(r.timings[1].operation, "fetch_primary_keys");
        assert_eq!(r.timings[1].calls, 1);
        assert_eq!(r.total_rows_fetched, 3);
    }
}
