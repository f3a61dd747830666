//! Column and index metadata.

use serde::{Deserialize, Serialize};

use crate::MetaType;

/// Portable description of one table column.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ColumnInfo {
    /// Column name as reported by the server.
    pub name: String,
    /// Lower-cased native type name without length, e.g. `varchar`.
    pub native_type: String,
    /// Portable classification.
    pub meta_type: MetaType,
    /// Maximum length in characters or decimal digits, `None` when unknown.
    pub max_length: Option<u32>,
    /// Decimal scale for numeric columns.
    pub scale: Option<u32>,
    /// `NOT NULL` constraint.
    pub not_null: bool,
    /// Whether a default value is declared.
    pub has_default: bool,
    /// Declared default with surrounding quotes removed.
    pub default_value: Option<String>,
    /// Member of the primary key.
    pub primary_key: bool,
    /// `None` for non-numeric columns.
    pub unsigned: Option<bool>,
    pub auto_increment: bool,
    pub binary: bool,
    /// `Some(true)` for serial primary keys, unknown otherwise.
    pub unique: Option<bool>,
}

/// A secondary index of a table.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IndexInfo {
    pub name: String,
    pub unique: bool,
    /// Indexed columns in index order.
    pub columns: Vec<String>,
    /// `FULLTEXT` index.
    pub fulltext: bool,
}
