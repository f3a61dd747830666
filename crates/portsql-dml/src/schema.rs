//! Column metadata parsing and the per-connection schema cache.

use std::collections::{BTreeSet, HashMap};
use std::sync::{Arc, OnceLock};

use portsql_types::{ColumnInfo, IndexInfo, MetaType, Row, Value};
use regex::Regex;

use crate::binder::{escape_string, quote_identifier};
use crate::database::Database;
use crate::error::DmlError;
use crate::session::ResultSet;

/// Maps a lower-case native type name to its portable meta-type.
pub fn meta_type_for(native: &str) -> Option<MetaType> {
    Some(match native {
        "bit" => MetaType::Logical,
        "tinyint" | "smallint" | "mediumint" | "int" | "integer" | "bigint" => MetaType::Integer,
        "float" | "double" | "decimal" => MetaType::Numeric,
        "char" | "enum" | "set" | "varchar" => MetaType::Character,
        "tinytext" | "text" | "mediumtext" | "longtext" => MetaType::Text,
        "binary" | "varbinary" | "blob" | "tinyblob" | "mediumblob" | "longblob" => {
            MetaType::Binary
        }
        "date" | "time" | "datetime" | "timestamp" | "year" => MetaType::Date,
        _ => return None,
    })
}

/// Decimal digits that always fit into an integer type.
fn integer_digits(native: &str) -> u32 {
    match native {
        "bigint" => 18,
        "int" | "integer" => 9,
        "mediumint" => 6,
        "smallint" => 4,
        _ => 2,
    }
}

fn type_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        Regex::new(r"^([a-z]+)(\((.+)\))?( unsigned)?").expect("column type pattern is valid")
    })
}

fn text(row: &Row, field: &str) -> Option<String> {
    row.get(field).and_then(|v| v.as_str()).map(str::to_string)
}

/// Builds a [`ColumnInfo`] from one `SHOW COLUMNS` row (lower-cased keys).
///
/// # Errors
///
/// Returns `DmlError::Read` for native types without a portable mapping.
pub fn parse_column(row: &Row, sql: &str) -> Result<ColumnInfo, DmlError> {
    let name = text(row, "field").unwrap_or_default();
    let raw_type = text(row, "type").unwrap_or_default().to_lowercase();
    let unknown = || DmlError::Read {
        message: format!("unsupported native column type '{raw_type}' for column '{name}'"),
        sql: sql.to_string(),
    };

    let caps = type_pattern().captures(&raw_type).ok_or_else(unknown)?;
    let native_type = caps[1].to_string();
    let precision = caps.get(3).map(|m| m.as_str()).unwrap_or_default();
    let unsigned = caps.get(4).is_some();
    let meta_type = meta_type_for(&native_type).ok_or_else(unknown)?;

    // MariaDB quotes defaults and reports a missing one as the string NULL.
    let default_value = match text(row, "default") {
        Some(d) if d != "NULL" => Some(d.trim_matches('\'').to_string()),
        _ => None,
    };

    let mut info = ColumnInfo {
        name,
        native_type,
        meta_type,
        max_length: None,
        scale: None,
        not_null: text(row, "null").as_deref() == Some("NO"),
        has_default: default_value.is_some(),
        default_value,
        primary_key: text(row, "key").as_deref() == Some("PRI"),
        unsigned: None,
        auto_increment: false,
        binary: false,
        unique: None,
    };

    match meta_type {
        MetaType::Character => info.max_length = precision.parse().ok(),
        MetaType::Integer => {
            if info.primary_key {
                info.meta_type = MetaType::Serial;
                info.unique = Some(true);
            }
            let digits = integer_digits(&info.native_type);
            info.max_length = Some(match precision.parse::<u32>() {
                Ok(p) if p > 0 && p < digits => p,
                _ => digits,
            });
            info.unsigned = Some(unsigned);
            info.auto_increment = text(row, "extra")
                .is_some_and(|extra| extra.contains("auto_increment"));
        }
        MetaType::Numeric => {
            let mut parts = precision.split(',');
            info.max_length = parts.next().and_then(|p| p.trim().parse().ok());
            info.scale = Some(parts.next().and_then(|s| s.trim().parse().ok()).unwrap_or(0));
            info.unsigned = Some(unsigned);
        }
        MetaType::Text => info.primary_key = false,
        MetaType::Binary => {
            info.primary_key = false;
            info.binary = true;
        }
        MetaType::Date | MetaType::Logical | MetaType::Serial => {}
    }

    Ok(info)
}

/// Column metadata cached per table, split into persistent and temporary
/// partitions, plus the registry of temporary tables.
#[derive(Debug, Default)]
pub struct SchemaCache {
    persistent: HashMap<String, Arc<[ColumnInfo]>>,
    temporary: HashMap<String, Arc<[ColumnInfo]>>,
    temp_tables: BTreeSet<String>,
}

impl SchemaCache {
    pub fn new() -> Self {
        Self::default()
    }

    fn partition(&self, table: &str) -> &HashMap<String, Arc<[ColumnInfo]>> {
        if self.temp_tables.contains(table) {
            &self.temporary
        } else {
            &self.persistent
        }
    }

    pub fn get(&self, table: &str) -> Option<Arc<[ColumnInfo]>> {
        self.partition(table).get(table).cloned()
    }

    /// Replaces the cached entry for `table`.
    pub fn store(&mut self, table: &str, columns: Arc<[ColumnInfo]>) {
        let partition = if self.temp_tables.contains(table) {
            &mut self.temporary
        } else {
            &mut self.persistent
        };
        partition.insert(table.to_string(), columns);
    }

    /// Drops the entries of `tables`, or everything when `None`.
    pub fn reset(&mut self, tables: Option<&[&str]>) {
        match tables {
            Some(tables) => {
                for table in tables {
                    self.persistent.remove(*table);
                    self.temporary.remove(*table);
                }
            }
            None => {
                self.persistent.clear();
                self.temporary.clear();
            }
        }
    }

    pub fn register_temp_table(&mut self, table: &str) {
        self.persistent.remove(table);
        self.temp_tables.insert(table.to_string());
    }

    pub fn unregister_temp_table(&mut self, table: &str) {
        self.temporary.remove(table);
        self.temp_tables.remove(table);
    }

    pub fn is_temp_table(&self, table: &str) -> bool {
        self.temp_tables.contains(table)
    }

    /// Registered temporary tables in name order.
    pub fn temp_tables(&self) -> impl Iterator<Item = &str> {
        self.temp_tables.iter().map(String::as_str)
    }
}

impl Database {
    /// Column metadata of `table` (unprefixed), cached per connection.
    ///
    /// A table that cannot be described yields an empty list, which is not
    /// cached.
    ///
    /// # Errors
    ///
    /// Returns `DmlError::Read` for columns of unsupported native types.
    pub fn get_columns(&mut self, table: &str) -> Result<Arc<[ColumnInfo]>, DmlError> {
        if let Some(columns) = self.schema.get(table) {
            return Ok(columns);
        }
        let sql = format!(
            "SHOW COLUMNS FROM {}",
            quote_identifier(&format!("{}{table}", self.options.prefix))
        );
        let result = match self.aux_query(&sql) {
            Ok(result) => result,
            Err(err) => {
                tracing::debug!(table, error = %err, "could not describe table");
                return Ok(Arc::from(Vec::new()));
            }
        };
        let columns = lowercase_rows(result)
            .iter()
            .map(|row| parse_column(row, &sql))
            .collect::<Result<Vec<_>, _>>()?;
        if columns.is_empty() {
            return Ok(Arc::from(columns));
        }
        let columns: Arc<[ColumnInfo]> = Arc::from(columns);
        self.schema.store(table, columns.clone());
        Ok(columns)
    }

    /// Unprefixed names of the tables of this installation, including
    /// registered temporary tables.
    ///
    /// # Errors
    ///
    /// Returns `DmlError::Read` when the server cannot be queried.
    pub fn get_tables(&mut self, use_cache: bool) -> Result<Vec<String>, DmlError> {
        if use_cache {
            if let Some(tables) = &self.tables {
                return Ok(tables.clone());
            }
        }
        let prefix = self.options.prefix.clone();
        let pattern = escape_string(&prefix).replace('_', "\\_");
        let result = self.aux_query(&format!("SHOW TABLES LIKE '{pattern}%'"))?;
        let mut tables: BTreeSet<String> = result
            .rows
            .iter()
            .filter_map(|row| row.first().and_then(Value::as_str))
            .filter_map(|name| name.strip_prefix(prefix.as_str()))
            .filter(|name| !name.is_empty())
            .map(str::to_string)
            .collect();
        tables.extend(self.schema.temp_tables().map(str::to_string));
        let tables: Vec<String> = tables.into_iter().collect();
        self.tables = Some(tables.clone());
        Ok(tables)
    }

    /// Secondary indexes of `table`; empty when the table is missing.
    pub fn get_indexes(&mut self, table: &str) -> Vec<IndexInfo> {
        let sql = format!(
            "SHOW INDEXES FROM {}",
            quote_identifier(&format!("{}{table}", self.options.prefix))
        );
        let Ok(result) = self.aux_query(&sql) else {
            return Vec::new();
        };
        let mut rows: Vec<Row> = lowercase_rows(result)
            .into_iter()
            .filter(|row| row.get("key_name").and_then(Value::as_str) != Some("PRIMARY"))
            .collect();
        rows.sort_by_key(|row| row.get("seq_in_index").and_then(Value::as_i64).unwrap_or(0));

        let mut indexes: Vec<IndexInfo> = Vec::new();
        for row in rows {
            let Some(name) = row.get("key_name").and_then(Value::as_str) else {
                continue;
            };
            let column = row
                .get("column_name")
                .and_then(Value::as_str)
                .unwrap_or_default()
                .to_string();
            if let Some(index) = indexes.iter_mut().find(|i| i.name == name) {
                index.columns.push(column);
                continue;
            }
            indexes.push(IndexInfo {
                name: name.to_string(),
                unique: row.get("non_unique").and_then(Value::as_i64) == Some(0),
                columns: vec![column],
                fulltext: row
                    .get("index_type")
                    .and_then(Value::as_str)
                    .is_some_and(|t| t.eq_ignore_ascii_case("FULLTEXT")),
            });
        }
        indexes
    }

    /// Columns of the primary key of a fully qualified `table`.
    ///
    /// # Errors
    ///
    /// Returns `DmlError::Read` when the server cannot be queried.
    pub fn get_primary_keys(&mut self, table: &str) -> Result<Vec<String>, DmlError> {
        let sql = format!("SHOW KEYS FROM {table} WHERE Key_name = 'PRIMARY'");
        Ok(lowercase_rows(self.aux_query(&sql)?)
            .iter()
            .filter_map(|row| row.get("column_name").and_then(Value::as_str))
            .map(str::to_string)
            .collect())
    }

    /// Forgets cached metadata of `tables`, or of everything when `None`.
    pub fn reset_caches(&mut self, tables: Option<&[&str]>) {
        self.schema.reset(tables);
        self.tables = None;
    }

    /// Marks `table` as temporary so its metadata is cached separately.
    pub fn register_temp_table(&mut self, table: &str) {
        self.schema.register_temp_table(table);
        self.tables = None;
    }

    pub fn unregister_temp_table(&mut self, table: &str) {
        self.schema.unregister_temp_table(table);
        self.tables = None;
    }
}

fn lowercase_rows(result: ResultSet) -> Vec<Row> {
    let columns: Vec<String> = result.columns.iter().map(|c| c.to_lowercase()).collect();
    result
        .rows
        .into_iter()
        .map(|values| columns.iter().cloned().zip(values).collect())
        .collect()
}
