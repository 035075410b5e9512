use std::collections::BTreeSet;
use std::sync::Arc;

use anyhow::Context;
use tracing::debug;

use crate::domain::ports::RowRepository;
use crate::domain::row::{ColumnSpec, Row};
use crate::domain::value_objects::{qualified, ColumnName, PrimaryKey, Schema, TableName};
use crate::error::{Result, VerifierError};

// ─── Dual-source fetcher ───

/// Reads the same key set from source and target.
///
/// The two reads of a batch are issued concurrently; each is a recent,
/// self-consistent read of its own side, with no attempt to synchronise the
/// two snapshots.
pub struct DualSourceFetcher {
    source_repo: Arc<dyn RowRepository>,
    target_repo: Arc<dyn RowRepository>,
    source_schema: Schema,
    target_schema: Schema,
    batch_size: usize,
}

impl DualSourceFetcher {
    pub fn new(
        source_repo: Arc<dyn RowRepository>,
        target_repo: Arc<dyn RowRepository>,
        source_schema: Schema,
        target_schema: Schema,
        batch_size: usize,
    ) -> Self {
        Self {
            source_repo,
            target_repo,
            source_schema,
            target_schema,
            batch_size: batch_size.max(1),
        }
    }

    pub fn batch_size(&self) -> usize {
        self.batch_size
    }

    /// `schema.table` on the source side, used in every report.
    pub fn qualified(&self, table: &TableName) -> String {
        qualified(&self.source_schema, table)
    }

    /// Fetch one batch of rows from both sides.
    pub async fn fetch(
        &self,
        table: &TableName,
        pk_col: &ColumnName,
        pks: &[PrimaryKey],
    ) -> Result<(Vec<Row>, Vec<Row>)> {
        debug!(table = %table, batch = pks.len(), "fetching batch from source and target");

        let (source_rows, target_rows) = tokio::join!(
            self.source_repo
                .fetch_rows(&self.source_schema, table, pk_col, pks),
            self.target_repo
                .fetch_rows(&self.target_schema, table, pk_col, pks),
        );

        let source_rows = source_rows
            .context("reading source rows")
            .map_err(|e| VerifierError::fetch(self.qualified(table), e))?;
        let target_rows = target_rows
            .context("reading target rows")
            .map_err(|e| VerifierError::fetch(self.qualified(table), e))?;

        Ok((source_rows, target_rows))
    }

    /// Union of the primary keys present on either side, ascending.
    pub async fn all_primary_keys(
        &self,
        table: &TableName,
        pk_col: &ColumnName,
    ) -> Result<Vec<PrimaryKey>> {
        let (source_pks, target_pks) = tokio::join!(
            self.source_repo
                .fetch_primary_keys(&self.source_schema, table, pk_col),
            self.target_repo
                .fetch_primary_keys(&self.target_schema, table, pk_col),
        );

        let source_pks = source_pks
            .context("listing source primary keys")
            .map_err(|e| VerifierError::fetch(self.qualified(table), e))?;
        let target_pks = target_pks
            .context("listing target primary keys")
            .map_err(|e| VerifierError::fetch(self.qualified(table), e))?;

        let all: BTreeSet<PrimaryKey> = source_pks.into_iter().chain(target_pks).collect();
        Ok(all.into_iter().collect())
    }

    /// Target column metadata: the comparison side.
    pub async fn describe_target(&self, table: &TableName) -> Result<Vec<ColumnSpec>> {
        self.target_repo
            .describe_columns(&self.target_schema, table)
            .await
            .context("describing target columns")
            .map_err(|e| VerifierError::fetch(self.qualified(table), e))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::row::ColumnValue;
    use crate::infrastructure::db::memory::MemoryRowRepository;

    fn table() -> TableName {
        TableName("t".into())
    }

    fn repo(pks: &[u64]) -> Arc<MemoryRowRepository> {
        let repo = MemoryRowRepository::new();
        repo.create_table(&table(), vec![ColumnSpec::binary("id"), ColumnSpec::binary("data")]);
        for pk in pks {
            repo.upsert(Row::new(table(), PrimaryKey(*pk)).with("data", ColumnValue::bytes("x")));
        }
        Arc::new(repo)
    }

    fn fetcher(source: &[u64], target: &[u64]) -> DualSourceFetcher {
        DualSourceFetcher::new(
            repo(source),
            repo(target),
            Schema("src".into()),
            Schema("dst".into()),
            0,
        )
    }

    #[tokio::test]
    async fn tolerates_rows_missing_on_one_side() {
        let f = fetcher(&[1, 2], &[2, 3]);
        let pks = [PrimaryKey(1), PrimaryKey(2), PrimaryKey(3), PrimaryKey(4)];
        let (src, dst) = f.fetch(&table(), &ColumnName("id".into()), &pks).await.unwrap();
        assert_eq!(src.iter().map(|r| r.pk.0).collect::<Vec<_>>(), vec![1, 2]);
        assert_eq!(dst.iter().map(|r| r.pk.0).collect::<Vec<_>>(), vec![2, 3]);
    }

    #[tokio::test]
    async fn primary_keys_are_the_sorted_union() {
        let f = fetcher(&[5, 1], &[3, 5]);
        let pks = f.all_primary_keys(&table(), &ColumnName("id".into())).await.unwrap();
        assert_eq!(pks, vec![PrimaryKey(1), PrimaryKey(3), PrimaryKey(5)]);
    }

    #[tokio::test]
    async fn unknown_table_is_a_fetch_error() {
        let f = fetcher(&[], &[]);
        let err = f
            .fetch(&TableName("nope".into()), &ColumnName("id".into()), &[PrimaryKey(1)])
            .await
            .unwrap_err();
        assert!(matches!(err, VerifierError::Fetch { ref table, .. } if table == "src.nope"));
    }

    #[test]
    fn batch_size_is_at_least_one() {
        assert_eq!(fetcher(&[], &[]).batch_size(), 1);
    }
}
