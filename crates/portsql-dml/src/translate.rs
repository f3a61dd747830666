//! Collation-aware SQL fragment builders.
//!
//! All functions here are pure string builders over the negotiated charset,
//! collation and server version. They never touch the network and never
//! fail. Parameters are expected to be placeholders (`?` or `:name`), not
//! literal user input.

use std::collections::BTreeMap;

use portsql_types::{Params, ServerVersion, Value};

use crate::binder::{add_slashes, escape_string};
use crate::dialect::Dialect;

/// Full-text search mode chosen for a search text.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FtsMode {
    NaturalLanguage,
    Boolean,
}

impl FtsMode {
    /// Boolean mode is used as soon as the text contains a boolean operator.
    pub fn detect(text: &str) -> Self {
        if text.contains(['"', '(', ')']) {
            return Self::Boolean;
        }
        let operator = text.split_whitespace().any(|word| {
            word.starts_with(['+', '-', '~', '<', '>']) || word.ends_with('*')
        });
        if operator {
            Self::Boolean
        } else {
            Self::NaturalLanguage
        }
    }

    fn as_sql(self) -> &'static str {
        match self {
            Self::NaturalLanguage => "NATURAL LANGUAGE MODE",
            Self::Boolean => "BOOLEAN MODE",
        }
    }
}

/// View over the negotiated session settings that renders portable SQL.
#[derive(Debug, Clone, Copy)]
pub struct SqlTranslator<'a> {
    charset: &'a str,
    collation: &'a str,
    version: ServerVersion,
    dialect: &'a dyn Dialect,
}

impl<'a> SqlTranslator<'a> {
    pub fn new(
        charset: &'a str,
        collation: &'a str,
        version: ServerVersion,
        dialect: &'a dyn Dialect,
    ) -> Self {
        Self {
            charset,
            collation,
            version,
            dialect,
        }
    }

    fn bin_collation(&self) -> String {
        format!("{}_bin", self.charset)
    }

    /// `_as_cs` collations have insensitive siblings.
    fn insensitive_sibling(&self, accent_sensitive: bool) -> Option<String> {
        if !self.collation.contains("_as_cs") {
            return None;
        }
        let suffix = if accent_sensitive { "_as_ci" } else { "_ai_ci" };
        Some(self.collation.replacen("_as_cs", suffix, 1))
    }

    /// Binary collations are the only ones that are not case insensitive.
    fn unicode_ci_override(&self) -> Option<&'static str> {
        match self.collation {
            "utf8_bin" => Some("utf8_unicode_ci"),
            "utf8mb4_bin" => Some("utf8mb4_unicode_ci"),
            _ => None,
        }
    }

    /// Equality comparison with independent case and accent sensitivity.
    ///
    /// Case-sensitive and accent-insensitive is not available on MySQL, so
    /// `accent_sensitive` is ignored when `case_sensitive` is set.
    pub fn sql_equal(
        &self,
        field: &str,
        param: &str,
        case_sensitive: bool,
        accent_sensitive: bool,
        not_equal: bool,
    ) -> String {
        let op = if not_equal { "<>" } else { "=" };

        if self.collation.contains("_as_cs") {
            if case_sensitive {
                return format!("{field} {op} {param}");
            }
            let collation = self.insensitive_sibling(accent_sensitive).unwrap_or_default();
            return format!("{field} COLLATE {collation} {op} {param}");
        }

        if case_sensitive {
            format!("{field} COLLATE {} {op} {param}", self.bin_collation())
        } else if accent_sensitive {
            format!(
                "LOWER({field}) COLLATE {} {op} LOWER({param})",
                self.bin_collation()
            )
        } else {
            match self.unicode_ci_override() {
                Some(collation) => format!("{field} COLLATE {collation} {op} {param}"),
                None => format!("{field} {op} {param}"),
            }
        }
    }

    /// `LIKE` comparison with independent case and accent sensitivity.
    pub fn sql_like(
        &self,
        field: &str,
        param: &str,
        case_sensitive: bool,
        accent_sensitive: bool,
        not_like: bool,
        escape_char: char,
    ) -> String {
        if param.contains('%') {
            tracing::warn!(param, "sql_like expects a bound parameter, not a pattern");
        }
        let like = if not_like { "NOT LIKE" } else { "LIKE" };
        let escape = escape_string(&escape_char.to_string());

        if self.collation.contains("_as_cs") {
            if case_sensitive {
                return format!("{field} {like} {param} ESCAPE '{escape}'");
            }
            let collation = self.insensitive_sibling(accent_sensitive).unwrap_or_default();
            return format!("{field} {like} {param} COLLATE {collation} ESCAPE '{escape}'");
        }

        if case_sensitive {
            format!(
                "{field} {like} {param} COLLATE {} ESCAPE '{escape}'",
                self.bin_collation()
            )
        } else if accent_sensitive {
            format!(
                "LOWER({field}) {like} LOWER({param}) COLLATE {} ESCAPE '{escape}'",
                self.bin_collation()
            )
        } else {
            match self.unicode_ci_override() {
                Some(collation) => {
                    format!("{field} {like} {param} COLLATE {collation} ESCAPE '{escape}'")
                }
                None => format!("{field} {like} {param} ESCAPE '{escape}'"),
            }
        }
    }

    /// `CONCAT(a, b, ...)`, or `''` when there is nothing to concatenate.
    pub fn sql_concat(&self, elements: &[&str]) -> String {
        if elements.iter().all(|e| e.is_empty()) {
            return "''".to_string();
        }
        format!("CONCAT({})", elements.join(", "))
    }

    /// `CONCAT_WS(separator, ...)`; `separator` is an SQL expression.
    pub fn sql_concat_join(&self, separator: &str, elements: &[&str]) -> String {
        if elements.iter().all(|e| e.is_empty()) {
            return "''".to_string();
        }
        format!("CONCAT_WS({separator}, {})", elements.join(", "))
    }

    /// Length in characters.
    pub fn sql_length(&self, field: &str) -> String {
        format!(" CHAR_LENGTH({field})")
    }

    pub fn sql_cast_char2int(&self, field: &str) -> String {
        format!(" CAST({field} AS SIGNED) ")
    }

    /// Seven decimal places so every cast keeps at least six.
    pub fn sql_cast_char2real(&self, field: &str) -> String {
        format!(" CAST({field} AS DECIMAL(65,7)) ")
    }

    pub fn sql_cast_char2float(&self, field: &str) -> String {
        format!(" CAST({field} AS DECIMAL(20,2)) ")
    }

    pub fn sql_cast_2char(&self, field: &str) -> String {
        format!(" CAST({field} AS CHAR) COLLATE {}", self.bin_collation())
    }

    /// `REGEXP` operator with a collation override matching the requested
    /// case sensitivity.
    pub fn sql_regex(&self, positive: bool, case_sensitive: bool) -> String {
        let collation = if case_sensitive {
            if !self.collation.ends_with("_bin") && !self.collation.ends_with("_cs") {
                let charset = self.collation.split('_').next().unwrap_or(self.charset);
                format!("COLLATE {charset}_bin ")
            } else {
                String::new()
            }
        } else if let Some(base) = self.collation.strip_suffix("_cs") {
            format!("COLLATE {base}_ci ")
        } else if let Some(collation) = self.unicode_ci_override() {
            format!("COLLATE {collation} ")
        } else {
            String::new()
        };
        let op = if positive { "REGEXP" } else { "NOT REGEXP" };
        format!("{collation}{op}")
    }

    pub fn sql_regex_word_boundary_start(&self) -> &'static str {
        self.dialect.regex_word_boundaries(self.version).0
    }

    pub fn sql_regex_word_boundary_end(&self) -> &'static str {
        self.dialect.regex_word_boundaries(self.version).1
    }

    /// `GROUP_CONCAT` with a literal separator. NULL values are skipped.
    pub fn sql_group_concat(&self, expr: &str, separator: &str, order_by: Option<&str>) -> String {
        let separator = add_slashes(separator);
        match order_by.filter(|o| !o.is_empty()) {
            Some(order) => {
                format!(" GROUP_CONCAT({expr} ORDER BY {order} SEPARATOR '{separator}') ")
            }
            None => format!(" GROUP_CONCAT({expr} SEPARATOR '{separator}') "),
        }
    }

    /// `GROUP_CONCAT(DISTINCT ..)`; value order is undefined.
    pub fn sql_group_concat_unique(&self, expr: &str, separator: &str) -> String {
        format!(
            " GROUP_CONCAT(DISTINCT {expr} SEPARATOR '{}') ",
            add_slashes(separator)
        )
    }

    /// Collation used for full-text search.
    ///
    /// A configured language is only honoured when its charset matches the
    /// connection collation; otherwise an accent and case insensitive
    /// variant of the connection collation is guessed.
    pub fn fts_language(&self, configured: Option<&str>) -> String {
        let collation = self.collation;
        if let Some(language) = configured.filter(|l| !l.is_empty()) {
            let same_charset = ["utf8mb4_", "utf8mb3_", "utf8_"]
                .iter()
                .any(|p| language.starts_with(p) && collation.starts_with(p));
            if same_charset {
                return language.to_string();
            }
        }
        if let Some(collation) = self.unicode_ci_override() {
            return collation.to_string();
        }
        if collation.ends_with("_ci") {
            return collation.to_string();
        }
        if let Some(base) = collation.strip_suffix("_as_cs") {
            return format!("{base}_ai_ci");
        }
        if let Some(base) = collation.strip_suffix("_cs") {
            return format!("{base}_ci");
        }
        collation.to_string()
    }

    /// Builds a scored full-text search subquery.
    ///
    /// Every field contributes `MATCH (field) AGAINST (:p IN <mode>) * weight`
    /// to a `score` column; rows scoring zero are filtered out. Named
    /// parameters are called `<param_prefix>_<n>` so several subqueries can
    /// be combined in one statement.
    pub fn build_fts_subquery(
        &self,
        table: &str,
        fields: &[(&str, u32)],
        text: &str,
        param_prefix: &str,
    ) -> (String, Params) {
        let mode = FtsMode::detect(text).as_sql();
        let mut params = BTreeMap::new();
        let mut score = Vec::with_capacity(fields.len());
        for (i, (field, weight)) in fields.iter().enumerate() {
            let name = format!("{param_prefix}_{i}");
            score.push(format!("(MATCH ({field}) AGAINST (:{name} IN {mode}))*{weight}"));
            params.insert(name, Value::from(text));
        }
        let sql = format!(
            "(SELECT id, {} AS score FROM {{{table}}} HAVING score > 0)",
            score.join(" + ")
        );
        (sql, Params::Named(params))
    }
}
