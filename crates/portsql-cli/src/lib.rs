//! Command-line shell for the portsql driver.
//!
//! Connects with the configured options, runs one statement and writes the
//! result to standard output: one JSON object per row for queries, or the
//! number of affected rows for writes.

pub mod config;

use std::io::Write;

use portsql_dml::{Database, DmlError};
use portsql_types::{Query, QueryKind, Row};
use serde_json::json;

/// Errors surfaced by the shell.
#[derive(Debug, thiserror::Error)]
pub enum CliError {
    #[error(transparent)]
    Config(#[from] config::ConfigError),

    #[error(transparent)]
    Database(#[from] DmlError),

    #[error("failed to write output: {0}")]
    Output(#[from] std::io::Error),

    #[error("failed to encode row: {0}")]
    Encode(#[from] serde_json::Error),

    #[error("usage: portsql [--config <path>] <sql>")]
    Usage,
}

/// Parsed command line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Invocation {
    pub config_path: Option<String>,
    pub sql: String,
}

/// Parses `[--config <path>] <sql...>`; the remaining words form the
/// statement.
///
/// # Errors
///
/// Returns `CliError::Usage` when no statement is given.
pub fn parse_args<I>(args: I) -> Result<Invocation, CliError>
where
    I: IntoIterator<Item = String>,
{
    let mut config_path = None;
    let mut words = Vec::new();
    let mut args = args.into_iter();
    while let Some(arg) = args.next() {
        if arg == "--config" && words.is_empty() {
            config_path = Some(args.next().ok_or(CliError::Usage)?);
        } else {
            words.push(arg);
        }
    }
    let sql = words.join(" ");
    if sql.trim().is_empty() {
        return Err(CliError::Usage);
    }
    Ok(Invocation { config_path, sql })
}

/// Writes each row as one JSON line and returns the number of rows.
///
/// # Errors
///
/// Returns the first read, encoding or output error.
pub fn write_rows<W, I>(out: &mut W, rows: I) -> Result<usize, CliError>
where
    W: Write,
    I: IntoIterator<Item = Result<Row, DmlError>>,
{
    let mut count = 0;
    for row in rows {
        serde_json::to_writer(&mut *out, &row?)?;
        out.write_all(b"\n")?;
        count += 1;
    }
    Ok(count)
}

/// Runs `sql` on `db` and writes its result to `out`.
///
/// # Errors
///
/// Returns the database error, or an output error.
pub fn run_statement<W: Write>(db: &mut Database, sql: &str, out: &mut W) -> Result<(), CliError> {
    let query = Query::new(sql);
    match query.kind() {
        QueryKind::Select | QueryKind::Auxiliary => {
            let rs = db.get_recordset_sql(query, 0, 0)?;
            let count = write_rows(out, rs)?;
            tracing::debug!(rows = count, "query finished");
        }
        QueryKind::Structure => {
            db.change_database_structure(&[sql], None)?;
            writeln!(out, "{}", json!({ "structure_changed": true }))?;
        }
        _ => {
            let affected = db.execute(query)?;
            writeln!(out, "{}", json!({ "affected_rows": affected }))?;
        }
    }
    Ok(())
}
