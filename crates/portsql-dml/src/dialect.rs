//! Vendor strategies.
//!
//! MySQL and MariaDB share the wire protocol and most SQL, but differ in the
//! server versions a driver accepts, version-specific session tweaks, regex
//! word boundaries and optimizer overrides. Those differences live behind
//! [`Dialect`]; everything else is shared by [`Database`](crate::Database).

use std::fmt;

use portsql_types::{ServerVersion, Vendor};

/// Vendor specific behaviour composed into a connection.
pub trait Dialect: Send + Sync + fmt::Debug {
    /// Vendor this strategy targets.
    fn vendor(&self) -> Vendor;

    /// Verifies that the connected server belongs to this vendor.
    ///
    /// # Errors
    ///
    /// Returns a message naming the driver that should be used instead.
    fn check_server(&self, version: ServerVersion) -> Result<(), String>;

    /// Session statements needed to work around known server bugs.
    fn version_specific_setup(&self, version: ServerVersion) -> Vec<&'static str>;

    /// Regex word-boundary tokens `(start, end)`.
    fn regex_word_boundaries(&self, version: ServerVersion) -> (&'static str, &'static str);

    /// Whether single-query optimizer overrides are available.
    fn supports_environment_overrides(&self) -> bool;
}

const POSIX_WORD_BOUNDARIES: (&str, &str) = ("[[:<:]]", "[[:>:]]");
const ICU_WORD_BOUNDARIES: (&str, &str) = ("\\b", "\\b");

/// Oracle MySQL.
#[derive(Debug, Clone, Copy, Default)]
pub struct MysqlDialect;

impl Dialect for MysqlDialect {
    fn vendor(&self) -> Vendor {
        Vendor::Mysql
    }

    fn check_server(&self, version: ServerVersion) -> Result<(), String> {
        if version.major >= 10 {
            return Err(format!(
                "server version {version} is MariaDB, use the mariadb driver"
            ));
        }
        Ok(())
    }

    fn version_specific_setup(&self, version: ServerVersion) -> Vec<&'static str> {
        // Derived table merging returns wrong results on these releases.
        let affected = version < ServerVersion::new(5, 7, 21)
            || (version >= ServerVersion::new(8, 0, 0) && version < ServerVersion::new(8, 0, 4));
        if affected {
            vec!["SET SESSION optimizer_switch='derived_merge=off'"]
        } else {
            Vec::new()
        }
    }

    fn regex_word_boundaries(&self, version: ServerVersion) -> (&'static str, &'static str) {
        if version >= ServerVersion::new(8, 0, 4) {
            ICU_WORD_BOUNDARIES
        } else {
            POSIX_WORD_BOUNDARIES
        }
    }

    fn supports_environment_overrides(&self) -> bool {
        false
    }
}

/// MariaDB.
#[derive(Debug, Clone, Copy, Default)]
pub struct MariaDbDialect;

impl Dialect for MariaDbDialect {
    fn vendor(&self) -> Vendor {
        Vendor::Mariadb
    }

    fn check_server(&self, version: ServerVersion) -> Result<(), String> {
        if version.major == 8 || (version.major == 5 && version.minor == 7) {
            return Err(format!(
                "server version {version} is MySQL, use the mysql driver"
            ));
        }
        Ok(())
    }

    fn version_specific_setup(&self, _version: ServerVersion) -> Vec<&'static str> {
        Vec::new()
    }

    fn regex_word_boundaries(&self, _version: ServerVersion) -> (&'static str, &'static str) {
        POSIX_WORD_BOUNDARIES
    }

    fn supports_environment_overrides(&self) -> bool {
        true
    }
}

/// Returns the strategy for a configured vendor.
pub fn dialect_for(vendor: Vendor) -> Box<dyn Dialect> {
    match vendor {
        Vendor::Mysql => Box::new(MysqlDialect),
        Vendor::Mariadb => Box::new(MariaDbDialect),
    }
}
