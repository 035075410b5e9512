use serde::Serialize;
use std::collections::BTreeMap;

use crate::domain::value_objects::{PrimaryKey, TableName};

/// Why a primary key was reported.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum MismatchReason {
    /// Present on both sides, fingerprints differ.
    DigestDiffers,
    /// Present on the source only.
    MissingOnTarget,
    /// Present on the target only.
    MissingOnSource,
    /// A value could not be canonicalized, so the row cannot be verified.
    Undecodable { column: String, reason: String },
}

/// Keys of one table that failed one comparison pass, ascending.
///
/// An empty set is a pass for that table.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MismatchSet {
    pub table: TableName,
    pub mismatches: BTreeMap<PrimaryKey, MismatchReason>,
}

impl MismatchSet {
    pub fn new(table: TableName) -> Self {
        Self {
            table,
            mismatches: BTreeMap::new(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.mismatches.is_empty()
    }

    pub fn len(&self) -> usize {
        self.mismatches.len()
    }

    pub fn insert(&mut self, pk: PrimaryKey, reason: MismatchReason) {
        self.mismatches.insert(pk, reason);
    }

    /// Primary keys in ascending order.
    pub fn pks(&self) -> Vec<PrimaryKey> {
        self.mismatches.keys().copied().collect()
    }

    /// Fold another batch of the same table into this one. Later reasons win.
    pub fn merge(&mut self, other: MismatchSet) {
        self.mismatches.extend(other.mismatches);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pks_are_ascending_regardless_of_insert_order() {
        let mut set = MismatchSet::new(TableName("t".into()));
        set.insert(PrimaryKey(9), MismatchReason::DigestDiffers);
        set.insert(PrimaryKey(3), MismatchReason::MissingOnTarget);
        set.insert(PrimaryKey(5), MismatchReason::MissingOnSource);
        assert_eq!(set.pks(), vec![PrimaryKey(3), PrimaryKey(5), PrimaryKey(9)]);
    }

    #[test]
    fn merge_unions_keys() {
        let mut a = MismatchSet::new(TableName("t".into()));
        a.insert(PrimaryKey(1), MismatchReason::DigestDiffers);
        let mut b = MismatchSet::new(TableName("t".into()));
        b.insert(PrimaryKey(2), MismatchReason::DigestDiffers);
        b.insert(PrimaryKey(1), MismatchReason::MissingOnTarget);
        a.merge(b);
        assert_eq!(a.len(), 2);
        assert_eq!(a.mismatches[&PrimaryKey(1)], MismatchReason::MissingOnTarget);
    }
}
