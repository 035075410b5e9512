use serde::Serialize;
use std::collections::BTreeMap;

use crate::domain::value_objects::PrimaryKey;

/// Terminal error record: a human-readable message plus the machine-readable
/// table → primary key listing it was built from.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FatalError {
    pub message: String,
    pub mismatches: BTreeMap<String, Vec<PrimaryKey>>,
}

impl FatalError {
    pub fn message(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            mismatches: BTreeMap::new(),
        }
    }

    /// `cutover verification failed for: <table> [pks: <k1> <k2> ] `
    ///
    /// Each table is followed by its keys, each key by a single space.
    /// Tooling matches on this text; keep it stable.
    pub fn cutover(mismatches: BTreeMap<String, Vec<PrimaryKey>>) -> Self {
        let mut message = String::from("cutover verification failed for: ");
        for (table, pks) in &mismatches {
            message.push_str(table);
            message.push_str(" [pks: ");
            for pk in pks {
                message.push_str(&pk.to_string());
                message.push(' ');
            }
            message.push_str("] ");
        }
        Self {
            message,
            mismatches,
        }
    }

    /// `row fingerprints for pks [<k1>,<k2>] on <table> do not match`
    pub fn incremental(table: &str, pks: Vec<PrimaryKey>) -> Self {
        let listed = pks
            .iter()
            .map(PrimaryKey::to_string)
            .collect::<Vec<_>>()
            .join(",");
        let message = format!("row fingerprints for pks [{}] on {} do not match", listed, table);
        let mut mismatches = BTreeMap::new();
        mismatches.insert(table.to_string(), pks);
        Self {
            message,
            mismatches,
        }
    }
}

impl std::fmt::Display for FatalError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.message)
    }
}

/// Lifecycle events published by the verifier.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum StatusEvent {
    /// Acknowledges that bulk copy finished and every copied batch verified.
    RowCopyCompleted,
    /// A cutover verification pass completed. `failing` is empty on success.
    Verified {
        tables: Vec<String>,
        failing: Vec<String>,
    },
    /// The verifier halted the migration.
    Fatal(FatalError),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cutover_message_lists_every_key() {
        let mut m = BTreeMap::new();
        m.insert("gftest.test_table_1".to_string(), vec![PrimaryKey(2)]);
        let err = FatalError::cutover(m);
        assert_eq!(
            err.message,
            "cutover verification failed for: gftest.test_table_1 [pks: 2 ] "
        );
    }

    #[test]
    fn cutover_message_covers_multiple_tables() {
        let mut m = BTreeMap::new();
        m.insert("db.a".to_string(), vec![PrimaryKey(1), PrimaryKey(7)]);
        m.insert("db.b".to_string(), vec![PrimaryKey(3)]);
        let err = FatalError::cutover(m);
        assert_eq!(
            err.message,
            "cutover verification failed for: db.a [pks: 1 7 ] db.b [pks: 3 ] "
        );
    }

    #[test]
    fn incremental_message_is_comma_separated() {
        let err = FatalError::incremental("gftest.test_table_1", vec![PrimaryKey(1), PrimaryKey(5)]);
        assert_eq!(
            err.message,
            "row fingerprints for pks [1,5] on gftest.test_table_1 do not match"
        );
        assert_eq!(err.mismatches["gftest.test_table_1"].len(), 2);
    }
}
