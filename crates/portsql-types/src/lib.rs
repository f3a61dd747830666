//! Shared types for the portsql workspace.
//!
//! This crate provides the value model every other portsql crate speaks:
//! scalar [`Value`]s, ordered [`Row`] maps, portable [`Query`] descriptions,
//! column metadata ([`ColumnInfo`], [`MetaType`]), and server identification
//! ([`Vendor`], [`ServerVersion`]).
//!
//! Nothing in here touches the network. The driver crate (`portsql-dml`)
//! and backend crates (`portsql-mysql`) depend on these definitions so that
//! the dependency graph stays acyclic.

use serde::{Deserialize, Serialize};

mod column;
mod query;
mod value;

pub use column::{ColumnInfo, IndexInfo};
pub use query::{Params, Query};
pub use value::{format_float, Row, Value};

/// Portable, backend-independent classification of a native column type.
///
/// The single-character codes are stable and used in diagnostics.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum MetaType {
    /// Integer column (`I`).
    Integer,
    /// Fixed or floating point number (`N`).
    Numeric,
    /// Short character data (`C`).
    Character,
    /// Large text (`X`).
    Text,
    /// Binary data (`B`).
    Binary,
    /// Date and time values (`D`).
    Date,
    /// Auto-generated integer surrogate primary key (`R`).
    Serial,
    /// Boolean / bit (`L`).
    Logical,
}

impl MetaType {
    /// Returns the one-character code for this meta-type.
    pub fn as_char(self) -> char {
        match self {
            Self::Integer => 'I',
            Self::Numeric => 'N',
            Self::Character => 'C',
            Self::Text => 'X',
            Self::Binary => 'B',
            Self::Date => 'D',
            Self::Serial => 'R',
            Self::Logical => 'L',
        }
    }

    /// Attempts to convert a one-character code to a `MetaType`.
    ///
    /// Returns `None` if the code does not correspond to a known meta-type.
    pub fn from_char(code: char) -> Option<Self> {
        match code {
            'I' => Some(Self::Integer),
            'N' => Some(Self::Numeric),
            'C' => Some(Self::Character),
            'X' => Some(Self::Text),
            'B' => Some(Self::Binary),
            'D' => Some(Self::Date),
            'R' => Some(Self::Serial),
            'L' => Some(Self::Logical),
            _ => None,
        }
    }

    /// Whether values of this type are numbers.
    pub fn is_numeric(self) -> bool {
        matches!(self, Self::Integer | Self::Numeric | Self::Serial)
    }

    /// Whether values of this type are stored as strings.
    pub fn is_textual(self) -> bool {
        matches!(self, Self::Character | Self::Text)
    }
}

/// Statement category, used for statistics, logging and error mapping.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum QueryKind {
    /// A read-only `SELECT`.
    Select,
    /// An `INSERT`.
    Insert,
    /// An `UPDATE` or any other general write.
    Update,
    /// A `DELETE`.
    Delete,
    /// Schema changing statement (DDL).
    Structure,
    /// Session housekeeping (`SET`, `SHOW`, transaction control).
    Auxiliary,
}

impl QueryKind {
    /// Guesses the category from the leading keyword of `sql`.
    pub fn infer(sql: &str) -> Self {
        let keyword = sql
            .trim_start()
            .split(|c: char| !c.is_ascii_alphabetic())
            .next()
            .unwrap_or_default()
            .to_ascii_uppercase();
        match keyword.as_str() {
            "SELECT" | "WITH" => Self::Select,
            "INSERT" | "REPLACE" => Self::Insert,
            "UPDATE" => Self::Update,
            "DELETE" | "TRUNCATE" => Self::Delete,
            "CREATE" | "ALTER" | "DROP" | "RENAME" => Self::Structure,
            _ => Self::Auxiliary,
        }
    }

    /// Returns `true` for statements that modify data or structure.
    pub fn is_write(self) -> bool {
        matches!(
            self,
            Self::Insert | Self::Update | Self::Delete | Self::Structure
        )
    }

    /// Returns the string label for this category.
    pub fn label(self) -> &'static str {
        match self {
            Self::Select => "SELECT",
            Self::Insert => "INSERT",
            Self::Update => "UPDATE",
            Self::Delete => "DELETE",
            Self::Structure => "STRUCTURE",
            Self::Auxiliary => "AUXILIARY",
        }
    }
}

/// Database server vendor a driver targets.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Vendor {
    /// Oracle MySQL.
    #[serde(alias = "mysqli")]
    Mysql,
    /// MariaDB.
    Mariadb,
}

impl Vendor {
    /// Returns the canonical vendor name.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Mysql => "mysql",
            Self::Mariadb => "mariadb",
        }
    }
}

impl std::fmt::Display for Vendor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for Vendor {
    type Err = ParseVendorError;

    /// Accepts vendor names as well as the driver names used in
    /// configuration files (`mysqli` selects MySQL).
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "mysql" | "mysqli" => Ok(Self::Mysql),
            "mariadb" => Ok(Self::Mariadb),
            _ => Err(ParseVendorError(s.to_string())),
        }
    }
}

/// Error returned when parsing an unknown vendor or driver name.
#[derive(Debug, Clone, thiserror::Error)]
#[error("unknown database vendor: {0}")]
pub struct ParseVendorError(pub String);

/// Normalised server version, e.g. `10.6.12` or `8.0.4`.
///
/// Ordering compares components numerically, so `8.0.10 > 8.0.4`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct ServerVersion {
    pub major: u32,
    pub minor: u32,
    pub patch: u32,
}

impl ServerVersion {
    /// Creates a version from its components.
    pub const fn new(major: u32, minor: u32, patch: u32) -> Self {
        Self {
            major,
            minor,
            patch,
        }
    }

    /// Parses the leading dotted number of a version string.
    ///
    /// `"8.0.36-0ubuntu0.22.04.1"` parses as `8.0.36`, missing components
    /// default to zero. Returns `None` when the string does not start with
    /// a digit.
    pub fn parse(version: &str) -> Option<Self> {
        let mut parts = [0u32; 3];
        let mut seen = 0;
        for (slot, chunk) in parts.iter_mut().zip(version.trim().split('.')) {
            let digits: String = chunk.chars().take_while(char::is_ascii_digit).collect();
            if digits.is_empty() {
                break;
            }
            *slot = digits.parse().ok()?;
            seen += 1;
            if digits.len() != chunk.len() {
                break;
            }
        }
        if seen == 0 {
            return None;
        }
        Some(Self::new(parts[0], parts[1], parts[2]))
    }
}

impl std::fmt::Display for ServerVersion {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}.{}.{}", self.major, self.minor, self.patch)
    }
}

/// Database server identification captured after the handshake.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServerInfo {
    /// Raw version banner reported by the server.
    pub description: String,
    /// Normalised version.
    pub version: ServerVersion,
}
