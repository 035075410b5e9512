use sha2::{Digest, Sha256};

use crate::domain::canonical::{canonicalize, CanonicalValue};
use crate::domain::encoding::{Collation, ColumnEncoding, Compression};
use crate::domain::row::{ColumnSpec, Row};
use crate::domain::value_objects::{ColumnName, ExcludedColumns, Fingerprint, PrimaryKey, TableName};
use crate::error::DecompressionError;

const TAG_NULL: u8 = 0;
const TAG_VALUE: u8 = 1;

/// One compared column: where it sits in the digest, how the target side
/// compares it, and whether it holds compressed blocks.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ComparedColumn {
    pub name: ColumnName,
    pub collation: Option<Collation>,
    pub compression: Option<Compression>,
}

/// Schema-derived column order for one table.
///
/// Built from the **target** table description so both sides are folded
/// under the collation the data will live with after cutover.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ColumnOrder {
    pub table: TableName,
    pub primary_key: ColumnName,
    pub columns: Vec<ComparedColumn>,
}

impl ColumnOrder {
    /// Derive the order from target columns in ordinal position, leaving out
    /// the primary key and excluded columns. `compressed` is only consulted
    /// when the caller enabled decompression.
    pub fn from_target(
        table: TableName,
        primary_key: ColumnName,
        target_columns: &[ColumnSpec],
        excluded: &ExcludedColumns,
        compressed: impl Fn(&str) -> Option<Compression>,
    ) -> Self {
        let columns = target_columns
            .iter()
            .filter(|c| c.name != primary_key && !excluded.contains(&c.name.0))
            .map(|c| ComparedColumn {
                name: c.name.clone(),
                collation: c.collation.clone(),
                compression: compressed(&c.name.0),
            })
            .collect();
        Self {
            table,
            primary_key,
            columns,
        }
    }
}

/// Digest of one row, carried alongside its table and key.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RowFingerprint {
    pub table: TableName,
    pub pk: PrimaryKey,
    pub digest: Fingerprint,
}

/// A column that could not be canonicalized.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UndecodableColumn {
    pub column: ColumnName,
    pub error: DecompressionError,
}

/// Compute the SHA-256 fingerprint of a row.
///
/// Each column in `order` contributes a tag byte (NULL or value), and for
/// values an 8-byte big-endian length followed by the canonical bytes. The
/// length prefix keeps `("ab", "c")` and `("a", "bc")` apart. A column the
/// row does not carry hashes as NULL.
pub fn fingerprint(row: &Row, order: &ColumnOrder) -> Result<RowFingerprint, UndecodableColumn> {
    let mut hasher = Sha256::new();

    for col in &order.columns {
        let value = row.columns.get(&col.name.0);
        let encoding = ColumnEncoding {
            charset: value.and_then(|v| v.charset),
            collation: col.collation.clone(),
            compression: col.compression,
        };
        let raw = value.and_then(|v| v.raw.as_deref());

        let canonical = canonicalize(raw, &encoding).map_err(|error| UndecodableColumn {
            column: col.name.clone(),
            error,
        })?;

        match canonical {
            CanonicalValue::Null => hasher.update([TAG_NULL]),
            CanonicalValue::Bytes(bytes) => {
                hasher.update([TAG_VALUE]);
                hasher.update((bytes.len() as u64).to_be_bytes());
                hasher.update(&bytes);
            }
        }
    }

    Ok(RowFingerprint {
        table: row.table.clone(),
        pk: row.pk,
        digest: Fingerprint(format!("{:x}", hasher.finalize())),
    })
}
