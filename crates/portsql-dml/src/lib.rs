//! MySQL and MariaDB driver for the portsql data layer.
//!
//! Application code issues portable queries through a [`Database`]; the
//! driver negotiates the session (character set, collation, strict mode),
//! translates portable operators into the server dialect, binds parameters
//! as escaped literals and hands results back as [`Recordset`]s or plain
//! rows.
//!
//! Network I/O goes through the [`Session`] and [`Connector`] traits, so
//! everything in this crate runs against any backend implementing them.
//! The `portsql-mysql` crate provides the native protocol backend.
//!
//! # Design decisions
//!
//! - **One connection, one statement at a time**: every method takes
//!   `&mut self`. Streaming recordsets borrow the connection, so a second
//!   statement cannot start while a cursor is open.
//! - **Vendor strategy objects**: MySQL and MariaDB differences live behind
//!   the [`Dialect`] trait; everything else is shared.
//! - **Emulated binding**: parameters are rendered as escaped literals,
//!   matching what the text protocol sends anyway.
//! - **Nested transactions through savepoints**: [`Database::transaction`]
//!   starts the real transaction at the outermost level only.
//!
//! # Usage
//!
//! ```rust,ignore
//! use portsql_dml::{ConnectionOptions, Database, Strictness};
//! use portsql_types::Query;
//!
//! let mut db = Database::connect(&connector, ConnectionOptions::default())?;
//! let user = db.get_record_sql(
//!     Query::new("SELECT * FROM {user} WHERE username = ?").bind("admin"),
//!     Strictness::MustExist,
//! )?;
//! ```

mod binder;
mod bulk;
mod config;
mod connection;
mod database;
mod dialect;
mod env_override;
mod error;
mod lock;
mod recordset;
mod schema;
mod session;
mod transaction;
mod translate;

pub use binder::{
    add_slashes, bind, escape_string, expand_table_names, literal, normalise_params,
    quote_identifier, quote_string,
};
pub use bulk::{clean_row, normalise_value};
pub use config::{ConnectionOptions, TlsOptions};
pub use connection::{charset_for_collation, parse_server_version};
pub use database::{Database, QueryStats, Strictness, NO_LIMIT};
pub use dialect::{dialect_for, Dialect, MariaDbDialect, MysqlDialect};
pub use env_override::{
    Bracket, EnvironmentOverrides, OptimizerHint, FORCE_SEARCH_DEPTH_MARKER,
    MATERIALIZATION_FORCE_OFF_MARKER,
};
pub use error::{BackendError, DmlError, ErrorKind};
pub use lock::session_lock_name;
pub use recordset::{CountedRecordset, Recordset};
pub use schema::{meta_type_for, parse_column, SchemaCache};
pub use session::{Connector, Execution, ResultSet, RowStream, Session};
pub use transaction::TransactionController;
pub use translate::{FtsMode, SqlTranslator};

#[cfg(test)]
mod mock;
#[cfg(test)]
mod tests;
