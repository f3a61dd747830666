//! The seam between the driver and a concrete wire backend.
//!
//! A [`Connector`] opens physical connections; a [`Session`] executes
//! literal SQL on one of them. The driver never talks to the network any
//! other way, so everything above this module is backend independent and
//! can be exercised against a scripted session in tests.

use portsql_types::Value;

use crate::config::ConnectionOptions;
use crate::error::BackendError;

/// A fully buffered result set.
///
/// The server-side cursor is already released when this is returned.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ResultSet {
    /// Column names in select order.
    pub columns: Vec<String>,
    /// Row values, one entry per column.
    pub rows: Vec<Vec<Value>>,
}

impl ResultSet {
    pub fn new(columns: Vec<String>, rows: Vec<Vec<Value>>) -> Self {
        Self { columns, rows }
    }

    /// Value of the first column of the first row, if any.
    pub fn first_value(&self) -> Option<&Value> {
        self.rows.first().and_then(|row| row.first())
    }
}

/// Outcome of a statement that does not produce rows.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Execution {
    pub affected_rows: u64,
    /// Generated id of the last inserted row, `0` when none.
    pub last_insert_id: u64,
}

/// An unbuffered cursor still attached to the connection.
///
/// Rows are read from the socket on demand. While it is alive the
/// connection cannot run other statements.
pub trait RowStream: Iterator<Item = Result<Vec<Value>, BackendError>> {
    /// Column names in select order.
    fn columns(&self) -> &[String];
}

/// One live database session.
pub trait Session: Send {
    /// Version banner reported during the handshake.
    fn server_banner(&self) -> String;

    /// Sets the client character set of the connection.
    ///
    /// # Errors
    ///
    /// Returns the backend error if the server rejects the charset.
    fn set_charset(&mut self, charset: &str) -> Result<(), BackendError>;

    /// Runs a statement and buffers its complete result.
    ///
    /// # Errors
    ///
    /// Returns the backend error if the statement fails.
    fn query(&mut self, sql: &str) -> Result<ResultSet, BackendError>;

    /// Runs a statement and streams its result without buffering.
    ///
    /// # Errors
    ///
    /// Returns the backend error if the statement fails to start.
    fn query_unbuffered<'s>(
        &'s mut self,
        sql: &str,
    ) -> Result<Box<dyn RowStream + 's>, BackendError>;

    /// Runs a statement that returns no rows.
    ///
    /// # Errors
    ///
    /// Returns the backend error if the statement fails.
    fn execute(&mut self, sql: &str) -> Result<Execution, BackendError>;

    /// Runs several `;` separated statements, draining every result.
    ///
    /// # Errors
    ///
    /// Returns the first backend error; later statements are not run.
    fn execute_batch(&mut self, sql: &str) -> Result<(), BackendError>;

    /// Closes the connection. Must be safe to call more than once.
    fn close(&mut self);
}

/// Opens sessions for one backend library.
pub trait Connector {
    /// Reports whether the client library is usable, before any socket is
    /// opened. The error string explains what is missing.
    ///
    /// # Errors
    ///
    /// Returns a description of the missing driver component.
    fn driver_installed(&self) -> Result<(), String>;

    /// Performs the handshake.
    ///
    /// # Errors
    ///
    /// Returns the backend error if the server cannot be reached or refuses
    /// the credentials.
    fn connect(&self, options: &ConnectionOptions) -> Result<Box<dyn Session>, BackendError>;
}
