use std::collections::BTreeMap;

use crate::domain::encoding::{Charset, Collation};
use crate::domain::value_objects::{ColumnName, PrimaryKey, TableName};

/// One column as read from a database: the raw stored bytes (`None` is SQL
/// NULL) and the charset those bytes are in.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ColumnValue {
    pub raw: Option<Vec<u8>>,
    pub charset: Option<Charset>,
}

impl ColumnValue {
    pub fn null() -> Self {
        Self {
            raw: None,
            charset: None,
        }
    }

    pub fn bytes(raw: impl Into<Vec<u8>>) -> Self {
        Self {
            raw: Some(raw.into()),
            charset: None,
        }
    }

    pub fn text(s: &str, charset: Charset) -> Self {
        Self {
            raw: Some(s.as_bytes().to_vec()),
            charset: Some(charset),
        }
    }
}

/// Immutable snapshot of one row on one side of the migration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Row {
    pub table: TableName,
    pub pk: PrimaryKey,
    pub columns: BTreeMap<String, ColumnValue>,
}

impl Row {
    pub fn new(table: TableName, pk: PrimaryKey) -> Self {
        Self {
            table,
            pk,
            columns: BTreeMap::new(),
        }
    }

    pub fn with(mut self, column: &str, value: ColumnValue) -> Self {
        self.columns.insert(column.to_string(), value);
        self
    }
}

/// Column metadata from `information_schema.columns`, in ordinal order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ColumnSpec {
    pub name: ColumnName,
    pub charset: Option<Charset>,
    pub collation: Option<Collation>,
}

impl ColumnSpec {
    pub fn binary(name: &str) -> Self {
        Self {
            name: ColumnName(name.to_string()),
            charset: None,
            collation: None,
        }
    }

    pub fn text(name: &str, collation: Collation) -> Self {
        Self {
            name: ColumnName(name.to_string()),
            charset: Some(collation.charset()),
            collation: Some(collation),
        }
    }
}
