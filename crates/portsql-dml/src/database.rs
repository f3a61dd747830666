//! The connection object and its query paths.

use std::sync::OnceLock;

use portsql_types::{Params, Query, QueryKind, Row, ServerInfo, Value};
use regex::Regex;

use crate::binder::{bind, expand_table_names, normalise_params, quote_identifier};
use crate::config::ConnectionOptions;
use crate::dialect::Dialect;
use crate::env_override::{EnvironmentOverrides, OptimizerHint};
use crate::error::DmlError;
use crate::recordset::{CountedRecordset, Recordset};
use crate::schema::SchemaCache;
use crate::session::{Execution, ResultSet, Session};
use crate::transaction::TransactionController;
use crate::translate::SqlTranslator;

/// Stands in for "no upper bound" in `LIMIT offset, count`.
pub const NO_LIMIT: &str = "18446744073709551615";

/// How [`Database::get_record_sql`] treats zero or several matches.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Strictness {
    /// `None` when nothing matches; several matches log a warning and the
    /// first is returned.
    IgnoreMissing,
    /// `None` when nothing matches; the first of several is returned.
    IgnoreMultiple,
    /// Exactly one row must match.
    MustExist,
}

/// Statements executed since the connection was opened, setup excluded.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct QueryStats {
    pub reads: u64,
    pub writes: u64,
}

/// One configured connection to a MySQL or MariaDB server.
///
/// All methods take `&mut self`: a connection runs one statement at a time
/// and is not shared between threads.
pub struct Database {
    pub(crate) session: Option<Box<dyn Session>>,
    pub(crate) dialect: Box<dyn Dialect>,
    pub(crate) options: ConnectionOptions,
    pub(crate) collation: String,
    pub(crate) charset: String,
    pub(crate) server_info: Option<ServerInfo>,
    pub(crate) engine: Option<String>,
    pub(crate) logging_suspended: bool,
    pub(crate) stats: QueryStats,
    pub(crate) transactions: TransactionController,
    pub(crate) schema: SchemaCache,
    pub(crate) tables: Option<Vec<String>>,
    pub(crate) overrides: EnvironmentOverrides,
    pub(crate) bulk_chunk_size: Option<usize>,
    pub(crate) session_locks_used: bool,
    fts_sequence: u32,
}

impl std::fmt::Debug for Database {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Database")
            .field("vendor", &self.dialect.vendor())
            .field("dbname", &self.options.dbname)
            .field("prefix", &self.options.prefix)
            .field("collation", &self.collation)
            .field("connected", &self.session.is_some())
            .finish()
    }
}

fn select_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| Regex::new(r"(?is)^\s*SELECT\s").expect("select pattern is valid"))
}

/// Appends `LIMIT from, num`; `num == 0` means no upper bound.
pub(crate) fn apply_limit(sql: &str, limit_from: u64, limit_num: u64) -> String {
    if limit_from == 0 && limit_num == 0 {
        return sql.to_string();
    }
    if limit_num == 0 {
        format!("{sql} LIMIT {limit_from}, {NO_LIMIT}")
    } else {
        format!("{sql} LIMIT {limit_from}, {limit_num}")
    }
}

impl Database {
    pub(crate) fn unconfigured(
        session: Box<dyn Session>,
        dialect: Box<dyn Dialect>,
        options: ConnectionOptions,
    ) -> Self {
        Self {
            session: Some(session),
            dialect,
            options,
            collation: String::new(),
            charset: String::new(),
            server_info: None,
            engine: None,
            logging_suspended: true,
            stats: QueryStats::default(),
            transactions: TransactionController::new(),
            schema: SchemaCache::new(),
            tables: None,
            overrides: EnvironmentOverrides::default(),
            bulk_chunk_size: None,
            session_locks_used: false,
            fts_sequence: 0,
        }
    }

    pub(crate) fn session_mut(&mut self) -> Result<&mut (dyn Session + 'static), DmlError> {
        self.session
            .as_deref_mut()
            .ok_or_else(|| DmlError::Connection("the connection has been disposed".into()))
    }

    /// Table name prefix.
    pub fn prefix(&self) -> &str {
        &self.options.prefix
    }

    pub fn options(&self) -> &ConnectionOptions {
        &self.options
    }

    pub fn dialect(&self) -> &dyn Dialect {
        self.dialect.as_ref()
    }

    pub fn query_stats(&self) -> QueryStats {
        self.stats
    }

    /// Fragment builder over the negotiated session settings.
    pub fn translator(&self) -> SqlTranslator<'_> {
        let version = self
            .server_info
            .as_ref()
            .map(|info| info.version)
            .unwrap_or_default();
        SqlTranslator::new(&self.charset, &self.collation, version, self.dialect.as_ref())
    }

    /// Builds a full-text search subquery whose named parameters do not
    /// clash with earlier subqueries of this connection.
    pub fn build_fts_subquery(
        &mut self,
        table: &str,
        fields: &[(&str, u32)],
        text: &str,
    ) -> (String, Params) {
        let prefix = format!("fts{}", self.fts_sequence);
        self.fts_sequence += 1;
        self.translator().build_fts_subquery(table, fields, text, &prefix)
    }

    /// Registers a single-query optimizer override and returns the marker
    /// to embed in the next select. Always `""` on MySQL.
    ///
    /// # Errors
    ///
    /// Returns `DmlError::Coding` for an out of range search depth.
    pub fn get_optimizer_hint(&mut self, hint: OptimizerHint) -> Result<&'static str, DmlError> {
        let supported = self.dialect.supports_environment_overrides();
        self.overrides.request(hint, supported)
    }

    // Query core.

    /// Expands table names, normalises and binds parameters.
    ///
    /// Returns the statement as written (for logs and errors) and the
    /// literal statement sent to the server.
    pub(crate) fn prepare(&self, sql: &str, params: Params) -> Result<(String, String), DmlError> {
        let sql = expand_table_names(sql, &self.options.prefix);
        let (sql, values) = normalise_params(&sql, params)?;
        let raw = bind(&sql, &values)?;
        Ok((sql, raw))
    }

    fn record(&mut self, kind: QueryKind, sql: &str) {
        if self.logging_suspended {
            return;
        }
        if kind.is_write() {
            self.stats.writes += 1;
        } else {
            self.stats.reads += 1;
        }
        tracing::debug!(kind = kind.label(), sql, "query");
    }

    /// Runs a row-returning statement and buffers its result.
    pub(crate) fn raw_query(
        &mut self,
        kind: QueryKind,
        sql: &str,
        raw: &str,
    ) -> Result<ResultSet, DmlError> {
        self.record(kind, sql);
        self.session_mut()?
            .query(raw)
            .map_err(|err| DmlError::from_backend(kind, err, sql))
    }

    /// Runs a statement that returns no rows.
    pub(crate) fn raw_execute(
        &mut self,
        kind: QueryKind,
        sql: &str,
        raw: &str,
    ) -> Result<Execution, DmlError> {
        self.record(kind, sql);
        self.session_mut()?
            .execute(raw)
            .map_err(|err| DmlError::from_backend(kind, err, sql))
    }

    /// Housekeeping statement without parameters.
    pub(crate) fn aux_query(&mut self, sql: &str) -> Result<ResultSet, DmlError> {
        self.raw_query(QueryKind::Auxiliary, sql, sql)
    }

    pub(crate) fn aux_execute(&mut self, sql: &str) -> Result<(), DmlError> {
        self.raw_execute(QueryKind::Auxiliary, sql, sql).map(|_| ())
    }

    /// Runs `run` inside the environment bracket the pending overrides
    /// require for `sql`. Settings are restored even when `run` fails; the
    /// query error takes precedence over a restore error.
    fn with_environment<T>(
        &mut self,
        sql: String,
        run: impl FnOnce(&mut Self, String) -> Result<T, DmlError>,
    ) -> Result<T, DmlError> {
        if !self.overrides.is_pending() {
            return run(self, sql);
        }
        let bracket = self.overrides.prepare(&sql)?;
        if bracket.is_empty() {
            return run(self, bracket.sql);
        }

        let mut applied = Vec::with_capacity(bracket.settings.len());
        for (apply, restore) in &bracket.settings {
            if let Err(err) = self.aux_execute(apply) {
                // Keep the original failure; restore errors are only logged.
                let _ = self.restore_environment(&applied);
                return Err(err);
            }
            applied.push(*restore);
        }

        let result = run(self, bracket.sql);
        let restored = self.restore_environment(&applied);
        let value = result?;
        restored?;
        Ok(value)
    }

    fn restore_environment(&mut self, statements: &[&'static str]) -> Result<(), DmlError> {
        let mut first_error = None;
        for sql in statements {
            if let Err(err) = self.aux_execute(sql) {
                tracing::error!(sql, error = %err, "failed to restore session setting");
                first_error.get_or_insert(err);
            }
        }
        first_error.map_or(Ok(()), Err)
    }

    fn select_buffered(
        &mut self,
        query: Query,
        limit_from: u64,
        limit_num: u64,
    ) -> Result<(String, ResultSet), DmlError> {
        let (sql, params, _) = query.into_parts();
        self.with_environment(sql, |db, sql| {
            let sql = apply_limit(&sql, limit_from, limit_num);
            let (sql, raw) = db.prepare(&sql, params)?;
            let result = db.raw_query(QueryKind::Select, &sql, &raw)?;
            Ok((sql, result))
        })
    }

    // Reads.

    /// Runs a select and returns a buffered recordset.
    ///
    /// `limit_num == 0` means no upper bound.
    ///
    /// # Errors
    ///
    /// Returns `DmlError::Read` when the server rejects the query and
    /// `DmlError::Coding` for parameter mistakes.
    pub fn get_recordset_sql(
        &mut self,
        query: impl Into<Query>,
        limit_from: u64,
        limit_num: u64,
    ) -> Result<Recordset<'static>, DmlError> {
        let (sql, result) = self.select_buffered(query.into(), limit_from, limit_num)?;
        Ok(Recordset::buffered(result, sql))
    }

    /// Streams a whole table without buffering it.
    ///
    /// The recordset borrows the connection until it is dropped.
    ///
    /// # Errors
    ///
    /// Returns `DmlError::Read` when the table cannot be read.
    pub fn export_table_recordset(&mut self, table: &str) -> Result<Recordset<'_>, DmlError> {
        let sql = expand_table_names(&format!("SELECT * FROM {{{table}}}"), &self.options.prefix);
        self.record(QueryKind::Select, &sql);
        let stream = self
            .session_mut()?
            .query_unbuffered(&sql)
            .map_err(|err| DmlError::from_backend(QueryKind::Select, err, &sql))?;
        Recordset::streaming(stream, sql)
    }

    /// Runs a select and reports how many rows it would return without the
    /// limit.
    ///
    /// # Errors
    ///
    /// Returns `DmlError::Coding` unless the query starts with `SELECT`.
    pub fn get_counted_recordset_sql(
        &mut self,
        query: impl Into<Query>,
        limit_from: u64,
        limit_num: u64,
    ) -> Result<CountedRecordset<'static>, DmlError> {
        let (sql, params, _) = query.into().into_parts();
        if !select_pattern().is_match(&sql) {
            return Err(DmlError::coding("counted recordset query must start with SELECT"));
        }
        let sql = select_pattern()
            .replace(&sql, "SELECT SQL_CALC_FOUND_ROWS ")
            .into_owned();

        self.with_environment(sql, |db, sql| {
            let sql = apply_limit(&sql, limit_from, limit_num);
            let (sql, raw) = db.prepare(&sql, params)?;
            let result = db.raw_query(QueryKind::Select, &sql, &raw)?;
            let found_sql = "SELECT FOUND_ROWS()";
            let found = db.aux_query(found_sql)?;
            let count = found
                .first_value()
                .and_then(Value::as_i64)
                .and_then(|n| u64::try_from(n).ok())
                .ok_or_else(|| DmlError::Read {
                    message: "FOUND_ROWS() did not return a row count".into(),
                    sql: found_sql.to_string(),
                })?;
            Ok(CountedRecordset::new(Recordset::buffered(result, sql), count))
        })
    }

    /// Returns all rows; the first column must be unique.
    ///
    /// # Errors
    ///
    /// Returns `DmlError::Read` when two rows share a first-column value.
    pub fn get_records_sql(
        &mut self,
        query: impl Into<Query>,
        limit_from: u64,
        limit_num: u64,
    ) -> Result<Vec<Row>, DmlError> {
        let (sql, result) = self.select_buffered(query.into(), limit_from, limit_num)?;
        let rows = Recordset::buffered(result, sql.clone()).to_array()?;
        let mut seen = std::collections::HashSet::with_capacity(rows.len());
        for row in &rows {
            let key = row.first().and_then(|(_, value)| value.to_key());
            if let Some(key) = key {
                if !seen.insert(key.clone()) {
                    return Err(DmlError::Read {
                        message: format!(
                            "duplicate value '{key}' found in first column, it must be unique"
                        ),
                        sql,
                    });
                }
            }
        }
        Ok(rows)
    }

    /// Returns all rows in query order without a uniqueness check.
    ///
    /// # Errors
    ///
    /// Returns `DmlError::Read` when the server rejects the query.
    pub fn get_records_sql_unkeyed(
        &mut self,
        query: impl Into<Query>,
        limit_from: u64,
        limit_num: u64,
    ) -> Result<Vec<Row>, DmlError> {
        let (sql, result) = self.select_buffered(query.into(), limit_from, limit_num)?;
        Recordset::buffered(result, sql).to_array()
    }

    /// Returns a single row.
    ///
    /// # Errors
    ///
    /// With [`Strictness::MustExist`], returns `DmlError::Read` when no row
    /// or more than one row matches.
    pub fn get_record_sql(
        &mut self,
        query: impl Into<Query>,
        strictness: Strictness,
    ) -> Result<Option<Row>, DmlError> {
        let query = query.into();
        let sql = query.sql().to_string();
        let limit = if strictness == Strictness::IgnoreMultiple { 1 } else { 2 };
        let mut rows = self.get_records_sql_unkeyed(query, 0, limit)?;
        if rows.len() > 1 {
            match strictness {
                Strictness::MustExist => {
                    return Err(DmlError::Read {
                        message: "more than one record found where exactly one was expected".into(),
                        sql,
                    })
                }
                Strictness::IgnoreMissing => {
                    tracing::warn!(sql, "get_record_sql found more than one record");
                }
                Strictness::IgnoreMultiple => {}
            }
        }
        if rows.is_empty() {
            if strictness == Strictness::MustExist {
                return Err(DmlError::Read {
                    message: "record does not exist".into(),
                    sql,
                });
            }
            return Ok(None);
        }
        Ok(Some(rows.swap_remove(0)))
    }

    /// First column of a single row.
    ///
    /// # Errors
    ///
    /// Same as [`get_record_sql`](Self::get_record_sql).
    pub fn get_field_sql(
        &mut self,
        query: impl Into<Query>,
        strictness: Strictness,
    ) -> Result<Option<Value>, DmlError> {
        Ok(self
            .get_record_sql(query, strictness)?
            .and_then(|row| row.into_iter().next().map(|(_, value)| value)))
    }

    /// First column of every row.
    ///
    /// # Errors
    ///
    /// Returns `DmlError::Read` when the server rejects the query.
    pub fn get_fieldset_sql(&mut self, query: impl Into<Query>) -> Result<Vec<Value>, DmlError> {
        let (sql, params, _) = query.into().into_parts();
        let (sql, raw) = self.prepare(&sql, params)?;
        let result = self.raw_query(QueryKind::Select, &sql, &raw)?;
        Ok(result
            .rows
            .into_iter()
            .filter_map(|row| row.into_iter().next())
            .collect())
    }

    /// Whether the select returns at least one row.
    ///
    /// # Errors
    ///
    /// Returns `DmlError::Read` when the server rejects the query.
    pub fn record_exists_sql(&mut self, query: impl Into<Query>) -> Result<bool, DmlError> {
        let (sql, params, kind) = query.into().into_parts();
        let wrapped = Query::new(format!("SELECT 1 FROM DUAL WHERE EXISTS ({sql})"))
            .with_kind(kind)
            .with_params(params);
        let value = self.get_field_sql(wrapped, Strictness::IgnoreMultiple)?;
        Ok(value.and_then(|v| v.as_i64()).is_some_and(|v| v != 0))
    }

    // Writes.

    /// Executes one statement that returns no rows and reports the number
    /// of affected rows.
    ///
    /// # Errors
    ///
    /// Returns `DmlError::Coding` if the SQL contains `;` (several
    /// statements, or a parameter pasted into the SQL) and the error
    /// matching the statement category when the server rejects it.
    pub fn execute(&mut self, query: impl Into<Query>) -> Result<u64, DmlError> {
        let (sql, params, kind) = query.into().into_parts();
        let (sql, raw) = self.prepare(&sql, params)?;
        if sql.contains(';') {
            return Err(DmlError::coding(
                "execute() found multiple statements or unbound parameters in the query",
            ));
        }
        if kind == QueryKind::Structure {
            return self.run_structure_change(&raw, None).map(|()| 0);
        }
        let kind = match kind {
            QueryKind::Insert | QueryKind::Delete => kind,
            _ => QueryKind::Update,
        };
        Ok(self.raw_execute(kind, &sql, &raw)?.affected_rows)
    }

    /// Runs DDL statements and invalidates schema caches of `tables`, or of
    /// every table when `None`, whether or not the statements succeeded.
    ///
    /// # Errors
    ///
    /// Returns `DmlError::Structural` with the first server error.
    pub fn change_database_structure(
        &mut self,
        statements: &[&str],
        tables: Option<&[&str]>,
    ) -> Result<(), DmlError> {
        let sql = statements
            .iter()
            .map(|s| expand_table_names(s, &self.options.prefix))
            .collect::<Vec<_>>()
            .join("\n;\n");
        self.run_structure_change(&sql, tables)
    }

    fn run_structure_change(&mut self, sql: &str, tables: Option<&[&str]>) -> Result<(), DmlError> {
        if self.transactions.note_structure_change() {
            tracing::warn!(sql, "structure change inside a transaction commits it implicitly");
        }
        self.record(QueryKind::Structure, sql);
        let result = self
            .session_mut()
            .and_then(|session| {
                session
                    .execute_batch(sql)
                    .map_err(|err| DmlError::from_backend(QueryKind::Structure, err, sql))
            });
        self.reset_caches(tables);
        result
    }

    /// Deletes the rows matching `select`; an empty selection deletes all.
    ///
    /// # Errors
    ///
    /// Returns `DmlError::Write` when the server rejects the statement.
    pub fn delete_records_select(
        &mut self,
        table: &str,
        select: &str,
        params: Params,
    ) -> Result<u64, DmlError> {
        let mut sql = format!("DELETE FROM {{{table}}}");
        if !select.trim().is_empty() {
            sql.push_str(" WHERE ");
            sql.push_str(select);
        }
        let (sql, raw) = self.prepare(&sql, params)?;
        Ok(self.raw_execute(QueryKind::Delete, &sql, &raw)?.affected_rows)
    }

    /// Inserts a row as given, without normalisation.
    ///
    /// Unless `custom_sequence` is set, any `id` field is dropped and the
    /// generated id is returned. With `custom_sequence` the `id` field is
    /// required and `0` is returned.
    ///
    /// # Errors
    ///
    /// Returns `DmlError::Coding` when there is nothing to insert or the
    /// `id` is missing, and `DmlError::Write` when the server rejects the
    /// row or reports no generated id.
    pub fn insert_record_raw(
        &mut self,
        table: &str,
        mut row: Row,
        custom_sequence: bool,
    ) -> Result<u64, DmlError> {
        if custom_sequence {
            if !row.contains("id") {
                return Err(DmlError::coding(
                    "insert_record_raw() id field must be specified if custom sequences used",
                ));
            }
        } else {
            row.remove("id");
        }
        if row.is_empty() {
            return Err(DmlError::coding("insert_record_raw() no fields found"));
        }

        let fields: Vec<String> = row.names().map(quote_identifier).collect();
        let placeholders = vec!["?"; row.len()].join(",");
        let sql = format!(
            "INSERT INTO {{{table}}} ({}) VALUES({placeholders})",
            fields.join(",")
        );
        let values: Vec<Value> = row.into_iter().map(|(_, value)| value).collect();
        let (sql, raw) = self.prepare(&sql, Params::Positional(values))?;
        let execution = self.raw_execute(QueryKind::Insert, &sql, &raw)?;

        if custom_sequence {
            return Ok(0);
        }
        if execution.last_insert_id == 0 {
            return Err(DmlError::Write {
                message: "unknown error fetching inserted id".into(),
                sql,
            });
        }
        Ok(execution.last_insert_id)
    }

    /// Inserts a row, keeping only known columns and normalising values.
    /// Returns the generated id.
    ///
    /// # Errors
    ///
    /// Returns `DmlError::Read` when the table does not exist, otherwise
    /// the errors of [`insert_record_raw`](Self::insert_record_raw).
    pub fn insert_record(&mut self, table: &str, row: Row) -> Result<u64, DmlError> {
        let columns = self.get_columns(table)?;
        if columns.is_empty() {
            return Err(DmlError::Read {
                message: format!("table '{table}' does not exist"),
                sql: String::new(),
            });
        }
        let cleaned = crate::bulk::clean_row(&columns, row, true);
        self.insert_record_raw(table, cleaned, false)
    }

    /// Inserts a row with its `id`, keeping only known columns.
    ///
    /// # Errors
    ///
    /// Returns `DmlError::Coding` without an `id` and `DmlError::Write`
    /// when the server rejects the row.
    pub fn import_record(&mut self, table: &str, row: Row) -> Result<(), DmlError> {
        let columns = self.get_columns(table)?;
        let cleaned: Row = row
            .into_iter()
            .filter(|(field, _)| columns.iter().any(|c| &c.name == field))
            .collect();
        self.insert_record_raw(table, cleaned, true).map(|_| ())
    }

    /// Updates the row identified by its `id` field, as given.
    ///
    /// # Errors
    ///
    /// Returns `DmlError::Coding` without an `id` or without other fields.
    pub fn update_record_raw(&mut self, table: &str, mut row: Row) -> Result<(), DmlError> {
        let id = row
            .remove("id")
            .ok_or_else(|| DmlError::coding("update_record_raw() id field must be specified"))?;
        if row.is_empty() {
            return Err(DmlError::coding("update_record_raw() no fields found"));
        }
        let sets: Vec<String> = row
            .names()
            .map(|field| format!("{} = ?", quote_identifier(field)))
            .collect();
        let sql = format!("UPDATE {{{table}}} SET {} WHERE id=?", sets.join(","));
        let mut values: Vec<Value> = row.into_iter().map(|(_, value)| value).collect();
        values.push(id);
        let (sql, raw) = self.prepare(&sql, Params::Positional(values))?;
        self.raw_execute(QueryKind::Update, &sql, &raw)?;
        Ok(())
    }

    /// Updates a row, keeping only known columns and normalising values.
    ///
    /// # Errors
    ///
    /// Same as [`update_record_raw`](Self::update_record_raw).
    pub fn update_record(&mut self, table: &str, row: Row) -> Result<(), DmlError> {
        let columns = self.get_columns(table)?;
        let cleaned = crate::bulk::clean_row(&columns, row, false);
        self.update_record_raw(table, cleaned)
    }

    // Transactions.

    pub fn is_transaction_started(&self) -> bool {
        self.transactions.is_active()
    }

    /// Starts the real transaction with `READ COMMITTED` isolation.
    ///
    /// # Errors
    ///
    /// Returns `DmlError::Transaction` when one is already open.
    pub fn begin_transaction(&mut self) -> Result<(), DmlError> {
        let statements = self.transactions.begin()?;
        for sql in statements {
            if let Err(err) = self.aux_execute(sql) {
                self.transactions.reset();
                return Err(err);
            }
        }
        Ok(())
    }

    /// # Errors
    ///
    /// Returns `DmlError::Transaction` when no transaction is open.
    pub fn commit_transaction(&mut self) -> Result<(), DmlError> {
        let sql = self.transactions.commit()?;
        self.aux_execute(sql)
    }

    /// # Errors
    ///
    /// Returns `DmlError::Transaction` when no transaction is open.
    pub fn rollback_transaction(&mut self) -> Result<(), DmlError> {
        let sql = self.transactions.rollback()?;
        self.aux_execute(sql)
    }

    /// # Errors
    ///
    /// Returns `DmlError::Coding` for invalid or duplicate names and
    /// `DmlError::Transaction` outside a transaction.
    pub fn create_savepoint(&mut self, name: &str) -> Result<(), DmlError> {
        let sql = self.transactions.create_savepoint(name)?;
        if let Err(err) = self.aux_execute(&sql) {
            let _ = self.transactions.release_savepoint(name);
            return Err(err);
        }
        Ok(())
    }

    /// Releases a savepoint. After an implicit commit this is a silent
    /// no-op.
    ///
    /// # Errors
    ///
    /// Returns `DmlError::Coding` for unknown savepoints.
    pub fn release_savepoint(&mut self, name: &str) -> Result<(), DmlError> {
        match self.transactions.release_savepoint(name)? {
            Some(sql) => self.aux_execute(&sql),
            None => Ok(()),
        }
    }

    /// # Errors
    ///
    /// Returns `DmlError::RollbackAfterAutocommit` after a structure change
    /// committed the transaction, and `DmlError::Coding` for unknown
    /// savepoints.
    pub fn rollback_savepoint(&mut self, name: &str) -> Result<(), DmlError> {
        let sql = self.transactions.rollback_savepoint(name)?;
        self.aux_execute(&sql)
    }

    /// Runs `f` in a transaction.
    ///
    /// At the outermost level this begins, then commits or rolls back the
    /// real transaction. Nested calls use a generated savepoint that is
    /// released on success and rolled back on failure.
    ///
    /// # Errors
    ///
    /// Returns the error of `f`, or of the commit.
    pub fn transaction<T, F>(&mut self, f: F) -> Result<T, DmlError>
    where
        F: FnOnce(&mut Self) -> Result<T, DmlError>,
    {
        if !self.transactions.is_active() {
            self.begin_transaction()?;
            return match f(self) {
                Ok(value) => {
                    self.commit_transaction()?;
                    Ok(value)
                }
                Err(err) => {
                    if let Err(rollback) = self.rollback_transaction() {
                        tracing::error!(error = %rollback, "transaction rollback failed");
                    }
                    Err(err)
                }
            };
        }

        let name = self.transactions.generate_savepoint_name();
        self.create_savepoint(&name)?;
        match f(self) {
            Ok(value) => {
                self.release_savepoint(&name)?;
                Ok(value)
            }
            Err(err) => {
                let undone = self
                    .rollback_savepoint(&name)
                    .and_then(|()| self.release_savepoint(&name));
                if let Err(rollback) = undone {
                    tracing::error!(savepoint = %name, error = %rollback, "savepoint rollback failed");
                }
                Err(err)
            }
        }
    }
}

impl Drop for Database {
    fn drop(&mut self) {
        self.dispose();
    }
}
