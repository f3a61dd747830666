//! Native MySQL protocol backend for `portsql-dml`.
//!
//! [`MysqlConnector`] opens connections with the `mysql` crate (TLS via
//! rustls) and hands them to the driver as [`MysqlSession`]s. Statements
//! always go through the text protocol: the driver binds parameters
//! itself, so prepared statements are never used.

use std::borrow::Cow;
use std::path::PathBuf;

use mysql::prelude::Queryable;
use mysql::{ClientIdentity, Conn, OptsBuilder, QueryResult, SslOpts, Text};
use portsql_dml::{
    BackendError, ConnectionOptions, Connector, Execution, ResultSet, RowStream, Session,
    TlsOptions,
};
use portsql_types::Value;

/// Opens [`MysqlSession`]s.
#[derive(Debug, Clone, Copy, Default)]
pub struct MysqlConnector;

impl MysqlConnector {
    pub fn new() -> Self {
        Self
    }
}

/// Builds the TLS settings, `None` when no encryption is requested.
pub fn ssl_opts(tls: &TlsOptions) -> Option<SslOpts> {
    if !tls.requested() {
        return None;
    }
    if tls.capath.is_some() || tls.cipher.is_some() {
        tracing::warn!("ssl capath and cipher options are not supported and will be ignored");
    }

    let mut opts = SslOpts::default();
    if let Some(ca) = &tls.ca {
        opts = opts.with_root_cert_path(Some(Cow::Owned(PathBuf::from(ca))));
    }
    match (&tls.cert, &tls.key) {
        (Some(cert), Some(key)) => {
            opts = opts.with_client_identity(Some(ClientIdentity::new(
                Cow::Owned(PathBuf::from(cert)),
                Cow::Owned(PathBuf::from(key)),
            )));
        }
        (None, None) => {}
        _ => tracing::warn!("ssl cert and key must be configured together, client identity ignored"),
    }
    if tls.dont_verify_server_cert || (!tls.verify_server_cert && tls.ca.is_none()) {
        opts = opts
            .with_danger_accept_invalid_certs(true)
            .with_danger_skip_domain_validation(true);
    }
    Some(opts)
}

fn opts_builder(options: &ConnectionOptions) -> OptsBuilder {
    let mut builder = OptsBuilder::new()
        .ip_or_hostname(Some(options.host.as_str()))
        .tcp_port(options.port)
        .user(Some(options.user.as_str()).filter(|u| !u.is_empty()))
        .pass(Some(options.pass.as_str()).filter(|p| !p.is_empty()))
        .db_name(Some(options.dbname.as_str()))
        .ssl_opts(ssl_opts(&options.tls));
    if let Some(socket) = options.socket_path() {
        builder = builder.socket(Some(socket)).prefer_socket(true);
    }
    builder
}

impl Connector for MysqlConnector {
    fn driver_installed(&self) -> Result<(), String> {
        // The protocol implementation is compiled in.
        Ok(())
    }

    fn connect(&self, options: &ConnectionOptions) -> Result<Box<dyn Session>, BackendError> {
        let conn = Conn::new(opts_builder(options)).map_err(backend_error)?;
        tracing::debug!(host = %options.host, port = options.port, "mysql handshake complete");
        Ok(Box::new(MysqlSession { conn: Some(conn) }))
    }
}

/// One native protocol connection.
pub struct MysqlSession {
    conn: Option<Conn>,
}

impl std::fmt::Debug for MysqlSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MysqlSession")
            .field("open", &self.conn.is_some())
            .finish()
    }
}

impl MysqlSession {
    fn conn(&mut self) -> Result<&mut Conn, BackendError> {
        self.conn
            .as_mut()
            .ok_or_else(|| BackendError::with_code(2006, "connection closed"))
    }
}

fn backend_error(err: mysql::Error) -> BackendError {
    match err {
        mysql::Error::MySqlError(server) => BackendError::with_code(server.code, server.message),
        other => BackendError::new(other.to_string()),
    }
}

/// Converts a protocol value. Text columns arrive as bytes and are decoded
/// when they are valid UTF-8.
pub fn convert_value(value: mysql::Value) -> Value {
    match value {
        mysql::Value::NULL => Value::Null,
        mysql::Value::Bytes(bytes) => match String::from_utf8(bytes) {
            Ok(text) => Value::Text(text),
            Err(err) => Value::Bytes(err.into_bytes()),
        },
        mysql::Value::Int(i) => Value::Int(i),
        mysql::Value::UInt(u) => match i64::try_from(u) {
            Ok(i) => Value::Int(i),
            Err(_) => Value::Text(u.to_string()),
        },
        mysql::Value::Float(f) => Value::Float(f64::from(f)),
        mysql::Value::Double(d) => Value::Float(d),
        mysql::Value::Date(year, month, day, hour, minute, second, micros) => {
            let mut text =
                format!("{year:04}-{month:02}-{day:02} {hour:02}:{minute:02}:{second:02}");
            if micros > 0 {
                text.push_str(&format!(".{micros:06}"));
            }
            Value::Text(text)
        }
        mysql::Value::Time(negative, days, hours, minutes, seconds, micros) => {
            let sign = if negative { "-" } else { "" };
            let hours = u64::from(days) * 24 + u64::from(hours);
            let mut text = format!("{sign}{hours:02}:{minutes:02}:{seconds:02}");
            if micros > 0 {
                text.push_str(&format!(".{micros:06}"));
            }
            Value::Text(text)
        }
    }
}

fn column_names(result: &QueryResult<'_, '_, '_, Text>) -> Vec<String> {
    result
        .columns()
        .as_ref()
        .iter()
        .map(|c| c.name_str().into_owned())
        .collect()
}

struct MysqlRowStream<'s> {
    columns: Vec<String>,
    result: QueryResult<'s, 's, 's, Text>,
}

impl Iterator for MysqlRowStream<'_> {
    type Item = Result<Vec<Value>, BackendError>;

    fn next(&mut self) -> Option<Self::Item> {
        let row = self.result.next()?;
        Some(
            row.map(|row| row.unwrap().into_iter().map(convert_value).collect())
                .map_err(backend_error),
        )
    }
}

impl RowStream for MysqlRowStream<'_> {
    fn columns(&self) -> &[String] {
        &self.columns
    }
}

impl Session for MysqlSession {
    fn server_banner(&self) -> String {
        match &self.conn {
            Some(conn) => {
                let (major, minor, patch) = conn.server_version();
                format!("{major}.{minor}.{patch}")
            }
            None => String::new(),
        }
    }

    fn set_charset(&mut self, charset: &str) -> Result<(), BackendError> {
        self.conn()?
            .query_drop(format!("SET NAMES {charset}"))
            .map_err(backend_error)
    }

    fn query(&mut self, sql: &str) -> Result<ResultSet, BackendError> {
        let mut result = self.conn()?.query_iter(sql).map_err(backend_error)?;
        let columns = column_names(&result);
        let mut rows = Vec::new();
        for row in result.by_ref() {
            let row = row.map_err(backend_error)?;
            rows.push(row.unwrap().into_iter().map(convert_value).collect());
        }
        Ok(ResultSet::new(columns, rows))
    }

    fn query_unbuffered<'s>(
        &'s mut self,
        sql: &str,
    ) -> Result<Box<dyn RowStream + 's>, BackendError> {
        let result = self.conn()?.query_iter(sql).map_err(backend_error)?;
        let columns = column_names(&result);
        Ok(Box::new(MysqlRowStream { columns, result }))
    }

    fn execute(&mut self, sql: &str) -> Result<Execution, BackendError> {
        let conn = self.conn()?;
        conn.query_drop(sql).map_err(backend_error)?;
        Ok(Execution {
            affected_rows: conn.affected_rows(),
            last_insert_id: conn.last_insert_id(),
        })
    }

    fn execute_batch(&mut self, sql: &str) -> Result<(), BackendError> {
        let mut result = self.conn()?.query_iter(sql).map_err(backend_error)?;
        while let Some(set) = result.iter() {
            for row in set {
                row.map_err(backend_error)?;
            }
        }
        Ok(())
    }

    fn close(&mut self) {
        if self.conn.take().is_some() {
            tracing::debug!("mysql connection closed");
        }
    }
}
