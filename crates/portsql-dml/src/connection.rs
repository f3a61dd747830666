//! Connection establishment and server identification.

use std::sync::OnceLock;

use portsql_types::{ServerInfo, ServerVersion, Vendor};
use regex::Regex;

use crate::binder::escape_string;
use crate::config::ConnectionOptions;
use crate::database::Database;
use crate::dialect::{dialect_for, Dialect};
use crate::error::DmlError;
use crate::session::{Connector, ResultSet};

const MAX_PREFIX_LEN: usize = 16;
const MIN_GROUP_CONCAT_MAX_LEN: i64 = 131_072;
const FALLBACK_COLLATION: &str = "utf8mb4_unicode_ci";
const STRICT_SQL_MODE: &str = "SET SESSION sql_mode = 'STRICT_ALL_TABLES,ANSI_QUOTES'";

fn legacy_mariadb_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        Regex::new(r"(?i)^5\.5\.5-(10\..+)-MariaDB").expect("legacy MariaDB pattern is valid")
    })
}

/// Character set implied by a collation name.
pub fn charset_for_collation(collation: &str) -> &'static str {
    if collation.starts_with("utf8mb4_") {
        "utf8mb4"
    } else if collation.starts_with("utf8mb3_") {
        "utf8mb3"
    } else {
        "utf8"
    }
}

/// Normalises a `VERSION()` string.
///
/// MariaDB 10 servers used to announce themselves as `5.5.5-10.x.y-MariaDB`
/// to old clients; the real version is taken from the middle part.
pub fn parse_server_version(reported: &str) -> Option<ServerVersion> {
    let reported = legacy_mariadb_pattern()
        .captures(reported)
        .and_then(|caps| caps.get(1))
        .map_or(reported, |m| m.as_str());
    ServerVersion::parse(reported)
}

fn column<'r>(result: &'r ResultSet, row: &'r [portsql_types::Value], name: &str) -> Option<&'r str> {
    let index = result
        .columns
        .iter()
        .position(|c| c.eq_ignore_ascii_case(name))?;
    row.get(index)?.as_str()
}

impl Database {
    /// Opens and configures a connection using the dialect matching
    /// `options.driver`.
    ///
    /// # Errors
    ///
    /// See [`connect_with_dialect`](Self::connect_with_dialect).
    pub fn connect(connector: &dyn Connector, options: ConnectionOptions) -> Result<Self, DmlError> {
        let dialect = dialect_for(options.driver);
        Self::connect_with_dialect(connector, dialect, options)
    }

    /// Opens and configures a connection.
    ///
    /// Query logging is suspended until the session is configured. Any
    /// failure disposes the session.
    ///
    /// # Errors
    ///
    /// Returns `DmlError::Connection` when the driver is missing, the
    /// prefix is too long, the handshake fails, the server belongs to the
    /// other vendor, or session setup fails.
    pub fn connect_with_dialect(
        connector: &dyn Connector,
        dialect: Box<dyn Dialect>,
        options: ConnectionOptions,
    ) -> Result<Self, DmlError> {
        connector.driver_installed().map_err(DmlError::Connection)?;

        if !options.external && options.prefix.chars().count() > MAX_PREFIX_LEN {
            return Err(DmlError::Connection(format!(
                "table prefix '{}' is longer than {MAX_PREFIX_LEN} characters",
                options.prefix
            )));
        }

        let session = connector.connect(&options).map_err(|err| {
            tracing::error!(
                host = %options.host,
                dbname = %options.dbname,
                code = ?err.code,
                error = %err.message,
                "database connection failed"
            );
            DmlError::Connection(err.message)
        })?;

        let mut db = Database::unconfigured(session, dialect, options);
        let setup = db.configure_session();
        db.logging_suspended = false;

        if let Err(err) = setup {
            tracing::error!(error = %err, "database session setup failed");
            db.dispose();
            return Err(match err {
                DmlError::Connection(_) => err,
                other => DmlError::Connection(other.to_string()),
            });
        }

        tracing::info!(
            vendor = %db.dialect.vendor(),
            dbname = %db.options.dbname,
            collation = %db.collation,
            version = %db.server_info.as_ref().map(|i| i.version).unwrap_or_default(),
            "database connection established"
        );
        Ok(db)
    }

    fn configure_session(&mut self) -> Result<(), DmlError> {
        let collation = self.detect_collation()?;
        let charset = charset_for_collation(&collation);
        self.collation = collation;
        self.charset = charset.to_string();

        self.session_mut()?
            .set_charset(charset)
            .map_err(|err| DmlError::Connection(err.message))?;
        let names = format!("SET NAMES {charset} COLLATE {}", self.collation);
        self.aux_execute(&names)?;

        let version = self.get_server_info()?.version;

        if !self.options.external {
            if let Err(message) = self.dialect.check_server(version) {
                tracing::warn!(vendor = %self.dialect.vendor(), %version, "wrong driver for server");
                return Err(DmlError::Connection(message));
            }
        }

        for sql in self.dialect.version_specific_setup(version) {
            self.aux_execute(sql)?;
        }

        self.aux_execute(STRICT_SQL_MODE)?;

        let max_len = self
            .aux_query("SELECT @@group_concat_max_len")?
            .first_value()
            .and_then(|v| v.as_i64());
        if max_len.is_some_and(|len| len < MIN_GROUP_CONCAT_MAX_LEN) {
            self.aux_execute(&format!(
                "SET SESSION group_concat_max_len = {MIN_GROUP_CONCAT_MAX_LEN}"
            ))?;
        }
        Ok(())
    }

    fn config_table_status(&mut self) -> Result<Option<(Option<String>, Option<String>)>, DmlError> {
        let sql = format!(
            "SHOW TABLE STATUS WHERE Name = '{}config'",
            escape_string(&self.options.prefix)
        );
        let result = self.aux_query(&sql)?;
        Ok(result.rows.first().map(|row| {
            (
                column(&result, row, "Collation").map(str::to_string),
                column(&result, row, "Engine").map(str::to_string),
            )
        }))
    }

    fn database_collation(&mut self) -> Result<Option<String>, DmlError> {
        Ok(self
            .aux_query("SELECT @@collation_database")?
            .first_value()
            .and_then(|v| v.as_str())
            .map(str::to_string))
    }

    fn detect_collation(&mut self) -> Result<String, DmlError> {
        if let Some(collation) = self.options.collation.clone().filter(|c| !c.is_empty()) {
            return Ok(collation);
        }

        if self.options.external {
            return Ok(self
                .database_collation()?
                .unwrap_or_else(|| FALLBACK_COLLATION.to_string()));
        }

        if let Some((Some(collation), _)) = self.config_table_status()? {
            if !collation.starts_with("utf8") {
                return Err(DmlError::Connection(format!(
                    "unsupported collation '{collation}' detected in the config table"
                )));
            }
            return Ok(collation);
        }

        if self.dialect.vendor() == Vendor::Mysql
            && self.get_server_info()?.version >= ServerVersion::new(8, 0, 0)
        {
            return Ok("utf8mb4_0900_as_cs".to_string());
        }

        if let Some(collation) = self.database_collation()?.filter(|c| c.starts_with("utf8")) {
            return Ok(collation);
        }

        let result = self.aux_query("SHOW COLLATION WHERE Collation LIKE 'utf8%'")?;
        let mut fallback = None;
        for row in &result.rows {
            let Some(name) = column(&result, row, "Collation") else {
                continue;
            };
            if column(&result, row, "Default").is_some_and(|d| d.eq_ignore_ascii_case("yes")) {
                return Ok(name.to_string());
            }
            fallback = Some(name.to_string());
        }
        Ok(fallback.unwrap_or_else(|| FALLBACK_COLLATION.to_string()))
    }

    /// Server banner and normalised version; read once per connection.
    ///
    /// # Errors
    ///
    /// Returns `DmlError::Connection` when the version cannot be parsed.
    pub fn get_server_info(&mut self) -> Result<ServerInfo, DmlError> {
        if let Some(info) = &self.server_info {
            return Ok(info.clone());
        }
        let description = self.session_mut()?.server_banner();
        // The handshake banner is wrong behind some proxies and on Azure.
        let reported = self
            .aux_query("SELECT VERSION()")?
            .first_value()
            .and_then(|v| v.as_str())
            .map(str::to_string)
            .unwrap_or_else(|| description.clone());
        let version = parse_server_version(&reported).ok_or_else(|| {
            DmlError::Connection(format!("unrecognised server version '{reported}'"))
        })?;
        let info = ServerInfo {
            description,
            version,
        };
        self.server_info = Some(info.clone());
        Ok(info)
    }

    /// Collation negotiated for this connection.
    pub fn get_dbcollation(&self) -> &str {
        &self.collation
    }

    /// Character set negotiated for this connection.
    pub fn get_charset(&self) -> &str {
        &self.charset
    }

    /// Collation used for full-text search.
    pub fn get_ftslanguage(&self) -> String {
        self.translator()
            .fts_language(self.options.fts_language.as_deref())
    }

    /// Storage engine for new tables.
    ///
    /// The engine of the config table wins, then the server default. MyISAM
    /// is avoided when InnoDB or XtraDB is available. External databases
    /// report `None` unless an engine is configured.
    ///
    /// # Errors
    ///
    /// Returns `DmlError::Read` when the server cannot be queried.
    pub fn get_dbengine(&mut self) -> Result<Option<String>, DmlError> {
        if let Some(engine) = self.options.engine.clone().or_else(|| self.engine.clone()) {
            return Ok(Some(engine));
        }
        if self.options.external {
            return Ok(None);
        }

        if let Some((_, Some(engine))) = self.config_table_status()? {
            self.engine = Some(engine.clone());
            return Ok(Some(engine));
        }

        let mut engine = self
            .aux_query("SELECT @@default_storage_engine engine")?
            .first_value()
            .and_then(|v| v.as_str())
            .map(str::to_string);

        if engine.as_deref() == Some("MyISAM") {
            let result = self.aux_query("SHOW STORAGE ENGINES")?;
            let supported: Vec<&str> = result
                .rows
                .iter()
                .filter(|row| {
                    matches!(column(&result, row, "Support"), Some("YES" | "DEFAULT"))
                })
                .filter_map(|row| column(&result, row, "Engine"))
                .collect();
            for preferred in ["InnoDB", "XtraDB"] {
                if supported.contains(&preferred) {
                    engine = Some(preferred.to_string());
                }
            }
        }

        self.engine = engine.clone();
        Ok(engine)
    }

    /// Whether `name` is usable as a database name.
    pub fn is_valid_db_name(name: &str) -> bool {
        let len = name.chars().count();
        (1..=64).contains(&len)
            && name.chars().all(|c| {
                c.is_ascii_alphanumeric() || c == '_' || c == '$' || ('\u{80}'..='\u{FFFF}').contains(&c)
            })
    }

    /// Reports configuration problems, currently MyISAM tables.
    ///
    /// # Errors
    ///
    /// Returns `DmlError::Read` when the server cannot be queried.
    pub fn diagnose(&mut self) -> Result<Option<String>, DmlError> {
        let prefix = escape_string(&self.options.prefix).replace('_', "\\_");
        let sql = format!(
            "SHOW TABLE STATUS WHERE Name LIKE BINARY '{prefix}%' AND Engine = 'MyISAM'"
        );
        let result = self.aux_query(&sql)?;
        if result.rows.is_empty() {
            Ok(None)
        } else {
            Ok(Some(format!(
                "{} tables use the MyISAM engine, convert them to InnoDB",
                result.rows.len()
            )))
        }
    }

    /// Whether the negotiated collation exists for the negotiated charset.
    ///
    /// # Errors
    ///
    /// Returns `DmlError::Read` when the server cannot be queried.
    pub fn setup_is_unicodedb(&mut self) -> Result<bool, DmlError> {
        let sql = format!(
            "SHOW COLLATION WHERE Collation ='{}' AND Charset = '{}'",
            escape_string(&self.collation),
            escape_string(&self.charset)
        );
        Ok(!self.aux_query(&sql)?.rows.is_empty())
    }

    /// Whether the connection charset can store four-byte characters.
    pub fn setup_supports_four_byte_character_set(&self) -> bool {
        matches!(
            self.charset.to_ascii_lowercase().as_str(),
            "utf8mb4" | "utf16" | "utf16le" | "utf32"
        )
    }

    /// Whether the connection is still open.
    pub fn is_connected(&self) -> bool {
        self.session.is_some()
    }

    /// Closes the connection. Calling it again does nothing.
    pub fn dispose(&mut self) {
        if let Some(mut session) = self.session.take() {
            if self.transactions.is_active() {
                tracing::warn!("disposing a connection with an open transaction");
            }
            session.close();
            self.transactions.reset();
            tracing::debug!(dbname = %self.options.dbname, "database connection closed");
        }
    }
}
