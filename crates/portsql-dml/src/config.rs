//! Connection options.
//!
//! Options are plain data passed to [`Database::connect`](crate::Database::connect);
//! there is no process-wide configuration. They deserialize from the
//! `[database]` table of a TOML file.

use portsql_types::Vendor;
use serde::Deserialize;

/// Everything needed to open and configure a connection.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct ConnectionOptions {
    /// Driver / server vendor (`mysqli`, `mysql` or `mariadb`).
    #[serde(default = "default_driver")]
    pub driver: Vendor,

    /// Host name or IP address.
    #[serde(default = "default_host")]
    pub host: String,

    /// TCP port.
    #[serde(default = "default_port")]
    pub port: u16,

    /// Unix socket path. Only honoured when it looks like a path.
    #[serde(default)]
    pub socket: Option<String>,

    #[serde(default)]
    pub user: String,

    #[serde(default)]
    pub pass: String,

    #[serde(default = "default_dbname")]
    pub dbname: String,

    /// Table name prefix, at most 16 characters unless `external`.
    #[serde(default = "default_prefix")]
    pub prefix: String,

    /// The schema is not managed by this application.
    #[serde(default)]
    pub external: bool,

    /// Explicit collation; detected from the server when absent.
    #[serde(default)]
    pub collation: Option<String>,

    /// Rows per bulk insert statement; derived from `max_allowed_packet`
    /// when absent.
    #[serde(default)]
    pub bulk_insert_size: Option<usize>,

    /// Collation used for full-text search.
    #[serde(default)]
    pub fts_language: Option<String>,

    /// Storage engine for new tables; detected when absent.
    #[serde(default)]
    pub engine: Option<String>,

    /// Transport encryption.
    #[serde(default)]
    pub tls: TlsOptions,
}

/// Transport encryption settings.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct TlsOptions {
    /// Client private key (PEM).
    #[serde(default)]
    pub key: Option<String>,
    /// Client certificate chain (PEM).
    #[serde(default)]
    pub cert: Option<String>,
    /// Certificate authority bundle.
    #[serde(default)]
    pub ca: Option<String>,
    /// Directory of trusted CA certificates.
    #[serde(default)]
    pub capath: Option<String>,
    /// Permitted cipher list.
    #[serde(default)]
    pub cipher: Option<String>,
    /// Require TLS even when no certificate is configured.
    #[serde(default)]
    pub required: bool,
    /// Verify the server certificate against `ca`.
    #[serde(default)]
    pub verify_server_cert: bool,
    /// Accept any server certificate.
    #[serde(default)]
    pub dont_verify_server_cert: bool,
}

impl TlsOptions {
    /// Whether any setting asks for an encrypted transport.
    pub fn requested(&self) -> bool {
        self.required
            || self.key.is_some()
            || self.cert.is_some()
            || self.ca.is_some()
            || self.capath.is_some()
            || self.cipher.is_some()
    }
}

impl ConnectionOptions {
    /// Socket path, if configured and path-like.
    pub fn socket_path(&self) -> Option<&str> {
        self.socket
            .as_deref()
            .filter(|s| s.contains('/') || s.contains('\\'))
    }
}

fn default_driver() -> Vendor {
    Vendor::Mysql
}

fn default_host() -> String {
    "localhost".to_string()
}

fn default_port() -> u16 {
    3306
}

fn default_dbname() -> String {
    "portsql".to_string()
}

fn default_prefix() -> String {
    "ps_".to_string()
}

impl Default for ConnectionOptions {
    fn default() -> Self {
        Self {
            driver: default_driver(),
            host: default_host(),
            port: default_port(),
            socket: None,
            user: String::new(),
            pass: String::new(),
            dbname: default_dbname(),
            prefix: default_prefix(),
            external: false,
            collation: None,
            bulk_insert_size: None,
            fts_language: None,
            engine: None,
            tls: TlsOptions::default(),
        }
    }
}
