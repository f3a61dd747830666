//! Chunked multi-row inserts and value normalisation for record writes.

use portsql_types::{format_float, ColumnInfo, MetaType, Params, QueryKind, Row, Value};

use crate::binder::quote_identifier;
use crate::database::Database;
use crate::error::DmlError;

/// Rows per statement when 64-bit arithmetic on the packet size is not
/// available.
const NARROW_TARGET_CHUNK_SIZE: usize = 5;
/// Room assumed per row within `max_allowed_packet`.
const BYTES_PER_ROW: u64 = 200_000;
const MAX_CHUNK_SIZE: usize = 50;

/// Adjusts a value to what the column type expects.
pub fn normalise_value(column: &ColumnInfo, value: Value) -> Value {
    match value {
        Value::Bool(b) => Value::Int(i64::from(b)),
        Value::Text(ref s)
            if s.is_empty() && matches!(column.meta_type, MetaType::Integer | MetaType::Numeric) =>
        {
            Value::Int(0)
        }
        // Floats stored in text columns would otherwise be converted by the
        // server using its own formatting.
        Value::Float(f) if column.meta_type.is_textual() => match format_float(f) {
            Some(text) => Value::Text(text),
            None => Value::Float(f),
        },
        other => other,
    }
}

/// Keeps the fields of `row` that are table columns, normalised.
pub fn clean_row(columns: &[ColumnInfo], row: Row, skip_id: bool) -> Row {
    row.into_iter()
        .filter(|(field, _)| !(skip_id && field == "id"))
        .filter_map(|(field, value)| {
            let column = columns.iter().find(|c| c.name == field)?;
            let value = normalise_value(column, value);
            Some((field, value))
        })
        .collect()
}

fn same_fields(a: &Row, b: &Row) -> bool {
    a.len() == b.len() && a.names().zip(b.names()).all(|(x, y)| x == y)
}

impl Database {
    /// Rows per insert statement, computed once per connection.
    ///
    /// # Errors
    ///
    /// Returns `DmlError::Read` when `max_allowed_packet` cannot be read.
    pub fn bulk_insert_chunk_size(&mut self) -> Result<usize, DmlError> {
        if let Some(size) = self.bulk_chunk_size {
            return Ok(size);
        }
        let size = match self.options.bulk_insert_size.filter(|&n| n > 0) {
            Some(configured) => configured,
            None if cfg!(target_pointer_width = "32") => NARROW_TARGET_CHUNK_SIZE,
            None => {
                let result = self.aux_query("SHOW VARIABLES LIKE 'max_allowed_packet'")?;
                let value_index = result
                    .columns
                    .iter()
                    .position(|c| c.eq_ignore_ascii_case("value"))
                    .unwrap_or(1);
                let packet = result
                    .rows
                    .first()
                    .and_then(|row| row.get(value_index))
                    .and_then(Value::as_i64)
                    .and_then(|n| u64::try_from(n).ok())
                    .unwrap_or(0);
                let rows = usize::try_from(packet / BYTES_PER_ROW).unwrap_or(MAX_CHUNK_SIZE);
                rows.clamp(1, MAX_CHUNK_SIZE)
            }
        };
        tracing::debug!(chunk_size = size, "bulk insert chunk size");
        self.bulk_chunk_size = Some(size);
        Ok(size)
    }

    /// Inserts many rows with multi-row `INSERT` statements.
    ///
    /// Every row must list the same fields in the same order. Row order is
    /// kept but generated ids are not guaranteed to follow it. The insert is
    /// not atomic: a failing chunk stops the operation and earlier chunks
    /// stay written.
    ///
    /// # Errors
    ///
    /// Returns `DmlError::Coding` when rows differ in structure or share no
    /// field with the table, and `DmlError::Write` when a chunk fails.
    pub fn insert_records<I>(&mut self, table: &str, rows: I) -> Result<(), DmlError>
    where
        I: IntoIterator<Item = Row>,
    {
        let rows: Vec<Row> = rows.into_iter().collect();
        let Some(first) = rows.first() else {
            return Ok(());
        };
        if !rows.iter().all(|row| same_fields(first, row)) {
            return Err(DmlError::coding(
                "all rows passed to insert_records() must have the same structure",
            ));
        }

        let chunk_size = self.bulk_insert_chunk_size()?;
        let table_columns = self.get_columns(table)?;
        let columns: Vec<&ColumnInfo> = first
            .names()
            .filter(|&name| name != "id")
            .filter_map(|name| table_columns.iter().find(|c| c.name == name))
            .collect();
        if columns.is_empty() {
            return Err(DmlError::coding(format!(
                "insert_records() found no columns of table '{table}' in the rows"
            )));
        }

        let fields: Vec<String> = columns.iter().map(|c| quote_identifier(&c.name)).collect();
        let tuple = format!("({})", vec!["?"; columns.len()].join(","));

        let mut rows = rows.into_iter().peekable();
        while rows.peek().is_some() {
            let chunk: Vec<Row> = rows.by_ref().take(chunk_size).collect();
            let mut values = Vec::with_capacity(chunk.len() * columns.len());
            for mut row in chunk.iter().cloned() {
                for column in &columns {
                    let value = row.remove(&column.name).unwrap_or_default();
                    values.push(normalise_value(column, value));
                }
            }
            let sql = format!(
                "INSERT INTO {{{table}}} ({}) VALUES {}",
                fields.join(","),
                vec![tuple.as_str(); chunk.len()].join(",")
            );
            let (sql, raw) = self.prepare(&sql, Params::Positional(values))?;
            self.raw_execute(QueryKind::Insert, &sql, &raw)?;
        }
        Ok(())
    }
}
