//! Forward-only cursors over query results.
//!
//! A [`Recordset`] moves through `Open → (advance)* → Exhausted` and may be
//! closed from any state. The first row is fetched when the recordset is
//! created, so [`Recordset::valid`] answers immediately.
//!
//! Buffered recordsets own their rows and are `'static`. Streaming
//! recordsets borrow the connection for `'c`, so the connection cannot run
//! another statement until the cursor is dropped.

use std::ops::{Deref, DerefMut};

use portsql_types::{Row, Value};

use crate::error::DmlError;
use crate::session::{ResultSet, RowStream};

enum Source<'c> {
    Buffered(std::vec::IntoIter<Vec<Value>>),
    Streaming(Box<dyn RowStream + 'c>),
    Closed,
}

/// Forward-only cursor with lower-cased column names.
pub struct Recordset<'c> {
    columns: Vec<String>,
    source: Source<'c>,
    current: Option<Row>,
    strip: Option<String>,
    pending_error: Option<DmlError>,
    sql: String,
}

impl std::fmt::Debug for Recordset<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Recordset")
            .field("columns", &self.columns)
            .field("current", &self.current)
            .field("closed", &matches!(self.source, Source::Closed))
            .finish()
    }
}

impl Recordset<'static> {
    /// Wraps a fully buffered result.
    pub fn buffered(result: ResultSet, sql: impl Into<String>) -> Self {
        let mut rs = Recordset {
            columns: lowercase(result.columns),
            source: Source::Buffered(result.rows.into_iter()),
            current: None,
            strip: None,
            pending_error: None,
            sql: sql.into(),
        };
        // Buffered rows cannot fail to fetch.
        let _ = rs.fetch();
        rs
    }

    /// A recordset without rows.
    pub fn empty() -> Self {
        Self::buffered(ResultSet::default(), String::new())
    }
}

impl<'c> Recordset<'c> {
    /// Wraps an unbuffered cursor, reading its first row.
    ///
    /// # Errors
    ///
    /// Returns `DmlError::Read` if the first row cannot be read.
    pub fn streaming(stream: Box<dyn RowStream + 'c>, sql: impl Into<String>) -> Result<Self, DmlError> {
        let columns = lowercase(stream.columns().to_vec());
        let mut rs = Recordset {
            columns,
            source: Source::Streaming(stream),
            current: None,
            strip: None,
            pending_error: None,
            sql: sql.into(),
        };
        rs.fetch()?;
        Ok(rs)
    }

    fn fetch(&mut self) -> Result<(), DmlError> {
        let next = match &mut self.source {
            Source::Buffered(rows) => rows.next().map(Ok),
            Source::Streaming(stream) => stream.next(),
            Source::Closed => None,
        };
        match next {
            Some(Ok(values)) => {
                let mut row: Row = self.columns.iter().cloned().zip(values).collect();
                if let Some(field) = &self.strip {
                    row.remove(field);
                }
                self.current = Some(row);
                Ok(())
            }
            Some(Err(err)) => {
                self.close();
                Err(DmlError::Read {
                    message: err.message,
                    sql: self.sql.clone(),
                })
            }
            None => {
                self.close();
                Ok(())
            }
        }
    }

    /// Whether [`current`](Self::current) has a row.
    pub fn valid(&self) -> bool {
        self.current.is_some()
    }

    /// The row under the cursor, `None` once exhausted or closed.
    pub fn current(&self) -> Option<&Row> {
        self.current.as_ref()
    }

    /// Value of the first column of the current row.
    pub fn key(&self) -> Option<&Value> {
        self.current.as_ref()?.first().map(|(_, value)| value)
    }

    /// Lower-cased column names in select order.
    pub fn columns(&self) -> &[String] {
        &self.columns
    }

    /// Moves to the next row. Past the last row the recordset closes.
    ///
    /// # Errors
    ///
    /// Returns `DmlError::Read` when a streamed row cannot be read; the
    /// recordset is closed afterwards.
    pub fn advance(&mut self) -> Result<(), DmlError> {
        self.current = None;
        self.fetch()
    }

    /// Releases the underlying cursor. Safe to call any number of times.
    pub fn close(&mut self) {
        self.current = None;
        self.source = Source::Closed;
    }

    /// Whether the cursor has been released.
    pub fn is_closed(&self) -> bool {
        matches!(self.source, Source::Closed) && self.current.is_none()
    }

    /// Drains the remaining rows into a zero-based vector.
    ///
    /// # Errors
    ///
    /// Returns the first read error.
    pub fn to_array(self) -> Result<Vec<Row>, DmlError> {
        self.collect()
    }

    /// Removes `field` from the current and all following rows.
    fn strip_field(&mut self, field: &str) {
        if let Some(row) = &mut self.current {
            row.remove(field);
        }
        self.strip = Some(field.to_string());
    }
}

impl Iterator for Recordset<'_> {
    type Item = Result<Row, DmlError>;

    fn next(&mut self) -> Option<Self::Item> {
        match self.current.take() {
            Some(row) => {
                if let Err(err) = self.fetch() {
                    self.pending_error = Some(err);
                }
                Some(Ok(row))
            }
            None => self.pending_error.take().map(Err),
        }
    }
}

fn lowercase(columns: Vec<String>) -> Vec<String> {
    columns.into_iter().map(|c| c.to_lowercase()).collect()
}

/// A recordset plus the number of rows the query would return without
/// `LIMIT`.
///
/// The count is fixed at construction and stays available after
/// [`close`](Recordset::close).
#[derive(Debug)]
pub struct CountedRecordset<'c> {
    inner: Recordset<'c>,
    count: u64,
}

impl<'c> CountedRecordset<'c> {
    /// Wraps a recordset with a count computed by the server.
    pub fn new(inner: Recordset<'c>, count: u64) -> Self {
        Self { inner, count }
    }

    /// Reads the count from `field` on the first row and hides that field
    /// from every row handed out afterwards. An empty recordset counts zero.
    ///
    /// # Errors
    ///
    /// Returns `DmlError::Read` if the field is not part of the result and
    /// `DmlError::Coding` if it is `NULL` or not a number.
    pub fn from_count_field(mut inner: Recordset<'c>, field: &str) -> Result<Self, DmlError> {
        let field = field.to_lowercase();
        let count = match inner.current() {
            None => 0,
            Some(row) => {
                let value = row.get(&field).ok_or_else(|| DmlError::Read {
                    message: format!("count field '{field}' is missing from the result"),
                    sql: inner.sql.clone(),
                })?;
                if value.is_null() {
                    return Err(DmlError::coding(format!("count field '{field}' is NULL")));
                }
                value
                    .as_i64()
                    .and_then(|n| u64::try_from(n).ok())
                    .ok_or_else(|| {
                        DmlError::coding(format!("count field '{field}' is not a row count"))
                    })?
            }
        };
        inner.strip_field(&field);
        Ok(Self { inner, count })
    }

    /// Total number of rows ignoring any limit.
    pub fn get_count_without_limits(&self) -> u64 {
        self.count
    }

    pub fn into_inner(self) -> Recordset<'c> {
        self.inner
    }
}

impl<'c> Deref for CountedRecordset<'c> {
    type Target = Recordset<'c>;

    fn deref(&self) -> &Self::Target {
        &self.inner
    }
}

impl DerefMut for CountedRecordset<'_> {
    fn deref_mut(&mut self) -> &mut Self::Target {
        &mut self.inner
    }
}

impl Iterator for CountedRecordset<'_> {
    type Item = Result<Row, DmlError>;

    fn next(&mut self) -> Option<Self::Item> {
        self.inner.next()
    }
}
