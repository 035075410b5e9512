use std::collections::{BTreeMap, BTreeSet};

use tracing::warn;

use crate::domain::fingerprint::{fingerprint, ColumnOrder, RowFingerprint, UndecodableColumn};
use crate::domain::mismatch::{MismatchReason, MismatchSet};
use crate::domain::ports::Detector;
use crate::domain::row::Row;
use crate::domain::value_objects::PrimaryKey;

// ─── Mismatch Detector (implementation of the port) ───

#[derive(Default)]
pub struct MismatchDetector;

impl MismatchDetector {
    pub fn new() -> Self {
        Self
    }
}

impl Detector for MismatchDetector {
    fn compare(&self, source: &[Row], target: &[Row], order: &ColumnOrder) -> MismatchSet {
        let source_index = index(source, order);
        let target_index = index(target, order);

        let all_keys: BTreeSet<&PrimaryKey> = source_index.keys().chain(target_index.keys()).collect();
        let mut set = MismatchSet::new(order.table.clone());

        for pk in all_keys {
            let reason = match (source_index.get(pk), target_index.get(pk)) {
                (Some(Ok(s)), Some(Ok(t))) => {
                    if s.digest == t.digest {
                        continue;
                    }
                    MismatchReason::DigestDiffers
                }
                (Some(Err(e)), _) | (_, Some(Err(e))) => {
                    warn!(
                        table = %order.table,
                        pk = %pk,
                        column = %e.column,
                        error = %e.error,
                        "row cannot be verified"
                    );
                    MismatchReason::Undecodable {
                        column: e.column.0.clone(),
                        reason: e.error.to_string(),
                    }
                }
                (Some(_), None) => MismatchReason::MissingOnTarget,
                (None, Some(_)) => MismatchReason::MissingOnSource,
                (None, None) => continue,
            };
            set.insert(*pk, reason);
        }

        set
    }
}

fn index(rows: &[Row], order: &ColumnOrder) -> BTreeMap<PrimaryKey, Result<RowFingerprint, UndecodableColumn>> {
    rows.iter().map(|r| (r.pk, fingerprint(r, order))).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::encoding::{Charset, Collation, Compression};
    use crate::domain::fingerprint::ComparedColumn;
    use crate::domain::row::ColumnValue;
    use crate::domain::value_objects::{ColumnName, TableName};

    fn order(collation: Option<&str>, compression: Option<Compression>) -> ColumnOrder {
        ColumnOrder {
            table: TableName("test_table_1".into()),
            primary_key: ColumnName("id".into()),
            columns: vec![ComparedColumn {
                name: ColumnName("data".into()),
                collation: collation.map(|c| Collation::parse(c).unwrap()),
                compression,
            }],
        }
    }

    fn row(pk: u64, value: ColumnValue) -> Row {
        Row::new(TableName("test_table_1".into()), PrimaryKey(pk)).with("data", value)
    }

    fn bytes(pk: u64, v: &[u8]) -> Row {
        row(pk, ColumnValue::bytes(v))
    }

    #[test]
    fn identical_rows_produce_empty_set() {
        let rows = vec![bytes(1, b"a"), bytes(2, b"b")];
        let set = MismatchDetector::new().compare(&rows, &rows, &order(None, None));
        assert!(set.is_empty());
    }

    #[test]
    fn corrupted_value_is_reported() {
        let source = vec![bytes(4, b"data"), bytes(5, b"data")];
        let target = vec![bytes(4, b"data"), bytes(5, b"corrupted")];
        let set = MismatchDetector::new().compare(&source, &target, &order(None, None));
        assert_eq!(set.pks(), vec![PrimaryKey(5)]);
        assert_eq!(set.mismatches[&PrimaryKey(5)], MismatchReason::DigestDiffers);
    }

    #[test]
    fn one_sided_rows_are_mismatches() {
        let source = vec![bytes(1, b"a"), bytes(2, b"b")];
        let target = vec![bytes(2, b"b"), bytes(3, b"c")];
        let set = MismatchDetector::new().compare(&source, &target, &order(None, None));
        assert_eq!(set.pks(), vec![PrimaryKey(1), PrimaryKey(3)]);
        assert_eq!(set.mismatches[&PrimaryKey(1)], MismatchReason::MissingOnTarget);
        assert_eq!(set.mismatches[&PrimaryKey(3)], MismatchReason::MissingOnSource);
    }

    #[test]
    fn output_is_ascending_by_primary_key() {
        let source = vec![bytes(30, b"x"), bytes(2, b"x"), bytes(11, b"x")];
        let target = vec![bytes(30, b"y"), bytes(2, b"y"), bytes(11, b"y")];
        let set = MismatchDetector::new().compare(&source, &target, &order(None, None));
        assert_eq!(set.pks(), vec![PrimaryKey(2), PrimaryKey(11), PrimaryKey(30)]);
    }

    #[test]
    fn charset_change_of_ascii_is_not_a_mismatch() {
        let o = order(Some("utf8mb4_unicode_ci"), None);
        let source = vec![row(1, ColumnValue::text("foobar", Charset::Utf8mb3))];
        let target = vec![row(1, ColumnValue::text("foobar", Charset::Utf8mb4))];
        assert!(MismatchDetector::new().compare(&source, &target, &o).is_empty());
    }

    #[test]
    fn lossy_charset_conversion_is_a_mismatch() {
        let o = order(Some("utf8_unicode_ci"), None);
        let source = vec![row(1, ColumnValue::text("𠜎𠜱𠝹", Charset::Utf8mb4))];
        let target = vec![row(1, ColumnValue::text("???", Charset::Utf8mb3))];
        let set = MismatchDetector::new().compare(&source, &target, &o);
        assert_eq!(set.pks(), vec![PrimaryKey(1)]);
    }

    #[test]
    fn decompression_failure_becomes_undecodable_mismatch() {
        let o = order(None, Some(Compression::Snappy));
        let source = vec![bytes(1, b"\x08\x0cabcd\x01\x02")];
        let target = vec![bytes(1, b"\x08\x0cab")];
        let set = MismatchDetector::new().compare(&source, &target, &o);
        assert!(matches!(
            set.mismatches[&PrimaryKey(1)],
            MismatchReason::Undecodable { ref column, .. } if column == "data"
        ));
    }

    #[test]
    fn comparing_twice_is_idempotent() {
        let source = vec![bytes(1, b"a"), bytes(2, b"b")];
        let target = vec![bytes(1, b"a"), bytes(2, b"B")];
        let d = MismatchDetector::new();
        let o = order(None, None);
        assert_eq!(d.compare(&source, &target, &o), d.compare(&source, &target, &o));
    }
}
