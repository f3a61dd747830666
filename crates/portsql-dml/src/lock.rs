//! Named advisory locks guarding user sessions.

use sha2::{Digest, Sha256};

use crate::binder::escape_string;
use crate::database::Database;
use crate::error::DmlError;

/// Longest lock name the server accepts.
const MAX_LOCK_NAME_LEN: usize = 64;

/// Lock name for a session row, hashed when too long for the server.
pub fn session_lock_name(dbname: &str, prefix: &str, rowid: u64) -> String {
    let name = format!("{dbname}-{prefix}-session-{rowid}");
    if name.len() > MAX_LOCK_NAME_LEN {
        hex::encode(Sha256::digest(name.as_bytes()))
    } else {
        name
    }
}

impl Database {
    fn lock_name(&self, rowid: u64) -> String {
        session_lock_name(&self.options.dbname, &self.options.prefix, rowid)
    }

    /// Takes the advisory lock of session row `rowid`, waiting up to
    /// `timeout` seconds.
    ///
    /// # Errors
    ///
    /// Returns `DmlError::SessionLock` when the lock is held elsewhere after
    /// the timeout.
    pub fn get_session_lock(&mut self, rowid: u64, timeout: u32) -> Result<(), DmlError> {
        self.session_locks_used = true;
        let name = self.lock_name(rowid);
        let sql = format!("SELECT GET_LOCK('{}', {timeout})", escape_string(&name));
        let acquired = self
            .aux_query(&sql)?
            .first_value()
            .and_then(|v| v.as_i64())
            == Some(1);
        if !acquired {
            tracing::warn!(lock = %name, timeout, "session lock wait timed out");
            return Err(DmlError::SessionLock { name, timeout });
        }
        Ok(())
    }

    /// Releases the lock of session row `rowid`. Does nothing when no
    /// session lock was ever taken on this connection.
    ///
    /// # Errors
    ///
    /// Returns `DmlError::Read` when the server rejects the statement.
    pub fn release_session_lock(&mut self, rowid: u64) -> Result<(), DmlError> {
        if !self.session_locks_used {
            return Ok(());
        }
        let name = self.lock_name(rowid);
        self.aux_query(&format!("SELECT RELEASE_LOCK('{}')", escape_string(&name)))?;
        Ok(())
    }
}
