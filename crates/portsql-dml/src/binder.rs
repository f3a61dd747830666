//! Bound parameter emulation.
//!
//! Native prepared statements bypass the server query cache, so ad hoc
//! queries are sent as a single literal statement instead: every `?` is
//! replaced by an escaped literal of the matching parameter.

use std::collections::BTreeSet;
use std::fmt::Write as _;
use std::sync::OnceLock;

use portsql_types::{format_float, Params, Value};
use regex::Regex;

use crate::error::DmlError;

/// Escapes a string the way `mysql_real_escape_string` does.
pub fn escape_string(input: &str) -> String {
    let mut out = String::with_capacity(input.len() + 2);
    for c in input.chars() {
        match c {
            '\0' => out.push_str("\\0"),
            '\n' => out.push_str("\\n"),
            '\r' => out.push_str("\\r"),
            '\\' => out.push_str("\\\\"),
            '\'' => out.push_str("\\'"),
            '"' => out.push_str("\\\""),
            '\x1a' => out.push_str("\\Z"),
            c => out.push(c),
        }
    }
    out
}

/// Escapes quotes, backslashes and NUL with a backslash (PHP `addslashes`).
pub fn add_slashes(input: &str) -> String {
    let mut out = String::with_capacity(input.len());
    for c in input.chars() {
        match c {
            '\0' => out.push_str("\\0"),
            '\'' | '"' | '\\' => {
                out.push('\\');
                out.push(c);
            }
            c => out.push(c),
        }
    }
    out
}

/// Single-quoted, escaped string literal.
pub fn quote_string(input: &str) -> String {
    format!("'{}'", escape_string(input))
}

/// Double-quoted identifier (the session runs with `ANSI_QUOTES`).
pub fn quote_identifier(name: &str) -> String {
    format!("\"{}\"", name.replace('"', "\"\""))
}

/// Renders one parameter as an SQL literal.
///
/// Integers are quoted so the server never applies its implicit integer
/// casting rules to string columns.
///
/// # Errors
///
/// Returns `DmlError::Coding` for NaN or infinite floats.
pub fn literal(value: &Value) -> Result<String, DmlError> {
    Ok(match value {
        Value::Null => "NULL".to_string(),
        Value::Bool(b) => if *b { "1" } else { "0" }.to_string(),
        Value::Int(i) => format!("'{i}'"),
        Value::Float(f) => format_float(*f)
            .ok_or_else(|| DmlError::coding(format!("cannot bind non-finite float {f}")))?,
        Value::Text(s) => quote_string(s),
        Value::Bytes(bytes) if bytes.is_empty() => "''".to_string(),
        Value::Bytes(bytes) => {
            let mut hex = String::with_capacity(bytes.len() * 2 + 3);
            hex.push_str("X'");
            for b in bytes {
                let _ = write!(hex, "{b:02X}");
            }
            hex.push('\'');
            hex
        }
    })
}

/// Replaces each `?` in `sql` with the literal of the matching parameter.
///
/// # Errors
///
/// Returns `DmlError::Coding` when the number of placeholders differs from
/// the number of parameters, or a parameter has no literal form.
pub fn bind(sql: &str, params: &[Value]) -> Result<String, DmlError> {
    let placeholders = sql.matches('?').count();
    if placeholders != params.len() {
        return Err(DmlError::coding(format!(
            "incorrect number of query parameters, expected {placeholders}, got {}",
            params.len()
        )));
    }
    if params.is_empty() {
        return Ok(sql.to_string());
    }

    let mut parts = sql.split('?');
    let mut out = String::with_capacity(sql.len() + params.len() * 8);
    out.push_str(parts.next().unwrap_or_default());
    for (param, part) in params.iter().zip(parts) {
        out.push_str(&literal(param)?);
        out.push_str(part);
    }
    Ok(out)
}

fn table_name_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        Regex::new(r"\{([a-z][a-z0-9_]*)\}").expect("table name pattern is valid")
    })
}

/// Expands `{name}` table references to `<prefix>name`.
pub fn expand_table_names(sql: &str, prefix: &str) -> String {
    table_name_pattern()
        .replace_all(sql, |caps: &regex::Captures<'_>| format!("{prefix}{}", &caps[1]))
        .into_owned()
}

/// Converts named placeholders into positional ones.
///
/// `:name` placeholders are replaced by `?` and their values laid out in
/// occurrence order; a name may be used more than once. `::` casts are not
/// placeholders. Positional parameters pass through unchanged.
///
/// # Errors
///
/// Returns `DmlError::Coding` when styles are mixed, a named value is
/// missing, or a supplied named value is never used.
pub fn normalise_params(sql: &str, params: Params) -> Result<(String, Vec<Value>), DmlError> {
    let named = match params {
        Params::Positional(values) => return Ok((sql.to_string(), values)),
        Params::Named(named) => named,
    };
    if sql.contains('?') {
        return Err(DmlError::coding(
            "mixed positional and named query parameters are not supported",
        ));
    }

    let chars: Vec<char> = sql.chars().collect();
    let mut out = String::with_capacity(sql.len());
    let mut values = Vec::new();
    let mut used = BTreeSet::new();
    let mut i = 0;
    while i < chars.len() {
        let c = chars[i];
        let prev_colon = i > 0 && chars[i - 1] == ':';
        let starts_name = chars.get(i + 1).is_some_and(|n| n.is_ascii_lowercase());
        if c == ':' && !prev_colon && starts_name {
            let mut end = i + 1;
            while end < chars.len() && (chars[end].is_ascii_lowercase()
                || chars[end].is_ascii_digit()
                || chars[end] == '_')
            {
                end += 1;
            }
            let name: String = chars[i + 1..end].iter().collect();
            let value = named
                .get(&name)
                .ok_or_else(|| DmlError::coding(format!("missing named parameter ':{name}'")))?;
            values.push(value.clone());
            used.insert(name);
            out.push('?');
            i = end;
        } else {
            out.push(c);
            i += 1;
        }
    }

    if used.len() != named.len() {
        let unused: Vec<&str> = named
            .keys()
            .filter(|k| !used.contains(*k))
            .map(String::as_str)
            .collect();
        return Err(DmlError::coding(format!(
            "unused named parameters: {}",
            unused.join(", ")
        )));
    }

    Ok((out, values))
}
