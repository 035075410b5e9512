use serde::{Deserialize, Serialize};

/// Newtype to avoid confusion between schema (database) names
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Schema(pub String);

/// SHA-256 hex digest of a row's canonical column content.
///
/// Computed by [`crate::fingerprint`]. Two rows are considered equal iff
/// their fingerprints are equal.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Fingerprint(pub String);

impl Fingerprint {
    /// Returns the raw hex string.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for Fingerprint {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        self.0.fmt(f)
    }
}

/// Newtype for table names
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct TableName(pub String);

impl std::fmt::Display for TableName {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        self.0.fmt(f)
    }
}

/// Newtype for column names
#[derive(Debug, Clone, PartialEq, Eq, Hash, Ord, PartialOrd, Serialize, Deserialize)]
pub struct ColumnName(pub String);

impl std::fmt::Display for ColumnName {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        self.0.fmt(f)
    }
}

/// Numeric primary key (pagination key) of a migrated row.
///
/// Ordering is numeric, which is what makes mismatch reports reproducible.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
)]
#[serde(transparent)]
pub struct PrimaryKey(pub u64);

impl std::fmt::Display for PrimaryKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        self.0.fmt(f)
    }
}

impl From<u64> for PrimaryKey {
    fn from(v: u64) -> Self {
        PrimaryKey(v)
    }
}

/// List of columns left out of the comparison (e.g. `updated_at` rewritten
/// by a target-side default).
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct ExcludedColumns(pub Vec<String>);

impl ExcludedColumns {
    pub fn contains(&self, col: &str) -> bool {
        self.0.iter().any(|c| c == col)
    }
}

/// `schema.table` as it appears in reports and error messages.
pub fn qualified(schema: &Schema, table: &TableName) -> String {
    format!("{}.{}", schema.0, table.0)
}
