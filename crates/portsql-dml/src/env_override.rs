//! Single-query optimizer overrides.
//!
//! On MariaDB a caller can ask for an optimizer setting that only applies
//! to one query: [`Database::get_optimizer_hint`](crate::Database::get_optimizer_hint)
//! records the request and returns a comment-shaped marker to embed in the
//! SQL. When a select carries the marker, the marker is stripped and the
//! query is bracketed with `SET SESSION` statements that are reverted even
//! if the query fails.

use crate::error::DmlError;

pub const MATERIALIZATION_FORCE_OFF_MARKER: &str = "/*optimizer_disable_materialization*/";
pub const FORCE_SEARCH_DEPTH_MARKER: &str = "/*optimizer_force_search_depth*/";

const MAX_SEARCH_DEPTH: u32 = 62;

/// Optimizer setting requested for queries carrying its marker.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OptimizerHint {
    /// `optimizer_switch='materialization=off'`.
    MaterializationForceOff,
    /// `optimizer_search_depth=n`, `0..=62`.
    ForceSearchDepth(u32),
}

/// Pending overrides of one connection. Requests stay pending after use.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EnvironmentOverrides {
    materialization_off: bool,
    search_depth: Option<u32>,
}

/// Statements that bracket one query.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Bracket {
    /// The query with markers removed.
    pub sql: String,
    /// `(apply, restore)` pairs in application order.
    pub settings: Vec<(String, &'static str)>,
}

impl Bracket {
    pub fn is_empty(&self) -> bool {
        self.settings.is_empty()
    }
}

impl EnvironmentOverrides {
    /// Records a hint and returns the marker to embed, or `""` when the
    /// server has no override support.
    ///
    /// # Errors
    ///
    /// Returns `DmlError::Coding` for a search depth above 62.
    pub fn request(&mut self, hint: OptimizerHint, supported: bool) -> Result<&'static str, DmlError> {
        if let OptimizerHint::ForceSearchDepth(depth) = hint {
            if depth > MAX_SEARCH_DEPTH {
                return Err(DmlError::coding(format!(
                    "optimizer search depth must be between 0 and {MAX_SEARCH_DEPTH}, got {depth}"
                )));
            }
        }
        if !supported {
            return Ok("");
        }
        Ok(match hint {
            OptimizerHint::MaterializationForceOff => {
                self.materialization_off = true;
                MATERIALIZATION_FORCE_OFF_MARKER
            }
            OptimizerHint::ForceSearchDepth(depth) => {
                self.search_depth = Some(depth);
                FORCE_SEARCH_DEPTH_MARKER
            }
        })
    }

    /// Whether any override has been requested on this connection.
    pub fn is_pending(&self) -> bool {
        self.materialization_off || self.search_depth.is_some()
    }

    /// Works out the bracket for `sql`.
    ///
    /// # Errors
    ///
    /// Returns `DmlError::Coding` when a pending marker appears inside a
    /// quoted string, where stripping it would change the data.
    pub fn prepare(&self, sql: &str) -> Result<Bracket, DmlError> {
        let mut bracket = Bracket {
            sql: sql.to_string(),
            settings: Vec::new(),
        };

        if self.materialization_off && uses_marker(sql, MATERIALIZATION_FORCE_OFF_MARKER)? {
            bracket.sql = bracket.sql.replace(MATERIALIZATION_FORCE_OFF_MARKER, "");
            bracket.settings.push((
                "SET SESSION optimizer_switch='materialization=off'".to_string(),
                "SET SESSION optimizer_switch='materialization=default'",
            ));
        }
        if let Some(depth) = self.search_depth {
            if uses_marker(sql, FORCE_SEARCH_DEPTH_MARKER)? {
                bracket.sql = bracket.sql.replace(FORCE_SEARCH_DEPTH_MARKER, "");
                bracket.settings.push((
                    format!("SET SESSION optimizer_search_depth={depth}"),
                    "SET SESSION optimizer_search_depth=default",
                ));
            }
        }
        Ok(bracket)
    }
}

/// Whether `marker` occurs in `sql` outside string literals and comments.
fn uses_marker(sql: &str, marker: &str) -> Result<bool, DmlError> {
    let mut found = false;
    let mut quote: Option<char> = None;
    let mut escaped = false;
    let mut i = 0;
    while let Some(c) = sql[i..].chars().next() {
        let rest = &sql[i..];
        if let Some(q) = quote {
            if rest.starts_with(marker) {
                return Err(DmlError::coding(format!(
                    "optimizer marker {marker} must not appear inside a quoted string"
                )));
            }
            if escaped {
                escaped = false;
            } else if c == '\\' {
                escaped = true;
            } else if c == q {
                quote = None;
            }
        } else if rest.starts_with(marker) {
            found = true;
            i += marker.len();
            continue;
        } else if rest.starts_with("/*") {
            i += rest[2..].find("*/").map_or(rest.len(), |end| end + 4);
            continue;
        } else if c == '#' || is_dash_comment(rest) {
            i += rest.find('\n').map_or(rest.len(), |end| end + 1);
            continue;
        } else if c == '\'' || c == '"' {
            quote = Some(c);
        }
        i += c.len_utf8();
    }
    Ok(found)
}

/// `-- ` starts a comment only when followed by whitespace or the end.
fn is_dash_comment(rest: &str) -> bool {
    rest.strip_prefix("--")
        .is_some_and(|after| after.chars().next().map_or(true, char::is_whitespace))
}
