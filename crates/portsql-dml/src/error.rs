//! Error types for the DML layer.

use portsql_types::QueryKind;
use thiserror::Error;

/// Error reported by a [`Session`](crate::Session) implementation.
///
/// Carries the server error code when the backend supplied one.
#[derive(Debug, Clone, Error)]
#[error("{message}")]
pub struct BackendError {
    /// Native server error number, e.g. `1146` for a missing table.
    pub code: Option<u16>,
    /// Human readable message from the server or client library.
    pub message: String,
}

impl BackendError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            code: None,
            message: message.into(),
        }
    }

    pub fn with_code(code: u16, message: impl Into<String>) -> Self {
        Self {
            code: Some(code),
            message: message.into(),
        }
    }
}

/// Coarse classification of a [`DmlError`], for callers that branch on
/// the kind of failure rather than the exact variant.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    Connection,
    Read,
    Write,
    Structural,
    Coding,
    SessionLock,
    Transaction,
}

/// Errors that can occur in the DML layer.
#[derive(Debug, Error)]
pub enum DmlError {
    /// Driver missing, handshake failure, vendor/version mismatch or a
    /// disposed connection. Never retried automatically.
    #[error("database connection error: {0}")]
    Connection(String),

    /// The backend rejected a read query. The connection stays usable.
    #[error("error reading from database: {message}")]
    Read {
        /// Backend message.
        message: String,
        /// Statement as written by the caller, before parameter binding.
        sql: String,
    },

    /// An insert, update or delete failed.
    #[error("error writing to database: {message}")]
    Write {
        /// Backend message.
        message: String,
        /// Statement as written by the caller, before parameter binding.
        sql: String,
    },

    /// A schema change failed. Schema caches of the affected tables have
    /// already been invalidated.
    #[error("error changing database structure: {message}")]
    Structural {
        /// Backend message.
        message: String,
        /// The statement batch.
        sql: String,
    },

    /// Caller misuse. Indicates a programming defect.
    #[error("coding error: {0}")]
    Coding(String),

    /// A named advisory lock could not be acquired in time.
    #[error("could not obtain session lock '{name}' within {timeout} seconds")]
    SessionLock {
        /// Lock name passed to the server.
        name: String,
        /// Timeout in seconds.
        timeout: u32,
    },

    /// Rolling back to a savepoint after a structure change implicitly
    /// committed the transaction.
    #[error("cannot roll back to savepoint '{0}': the transaction was implicitly committed by a structure change")]
    RollbackAfterAutocommit(String),

    /// Transaction protocol violation, e.g. commit without begin.
    #[error("transaction error: {0}")]
    Transaction(String),
}

impl DmlError {
    /// Maps a backend failure to the error kind matching the statement
    /// category.
    pub fn from_backend(kind: QueryKind, err: BackendError, sql: &str) -> Self {
        let message = err.message;
        let sql = sql.to_string();
        match kind {
            QueryKind::Select | QueryKind::Auxiliary => Self::Read { message, sql },
            QueryKind::Insert | QueryKind::Update | QueryKind::Delete => {
                Self::Write { message, sql }
            }
            QueryKind::Structure => Self::Structural { message, sql },
        }
    }

    pub fn coding(message: impl Into<String>) -> Self {
        Self::Coding(message.into())
    }

    /// Returns the coarse kind of this error.
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Connection(_) => ErrorKind::Connection,
            Self::Read { .. } => ErrorKind::Read,
            Self::Write { .. } => ErrorKind::Write,
            Self::Structural { .. } => ErrorKind::Structural,
            Self::Coding(_) => ErrorKind::Coding,
            Self::SessionLock { .. } => ErrorKind::SessionLock,
            Self::RollbackAfterAutocommit(_) | Self::Transaction(_) => ErrorKind::Transaction,
        }
    }
}
