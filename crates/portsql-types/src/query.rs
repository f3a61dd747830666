//! Portable query descriptions.

use std::collections::BTreeMap;

use crate::{QueryKind, Value};

/// Parameters attached to a [`Query`].
#[derive(Debug, Clone, PartialEq)]
pub enum Params {
    /// Values for `?` placeholders, in order.
    Positional(Vec<Value>),
    /// Values for `:name` placeholders.
    Named(BTreeMap<String, Value>),
}

impl Default for Params {
    fn default() -> Self {
        Self::Positional(Vec::new())
    }
}

impl Params {
    pub fn is_empty(&self) -> bool {
        match self {
            Self::Positional(v) => v.is_empty(),
            Self::Named(m) => m.is_empty(),
        }
    }
}

/// SQL text plus its parameters and statement category.
///
/// Table names may be written as `{name}` and are expanded with the
/// connection prefix at execution time. A query is consumed by exactly one
/// execution.
///
/// ```
/// use portsql_types::{Query, QueryKind};
///
/// let q = Query::new("SELECT * FROM {user} WHERE id = ?").bind(5);
/// assert_eq!(q.kind(), QueryKind::Select);
/// ```
#[derive(Debug, Clone, PartialEq)]
pub struct Query {
    sql: String,
    params: Params,
    kind: QueryKind,
}

impl Query {
    /// Creates a query, inferring its category from the leading keyword.
    pub fn new(sql: impl Into<String>) -> Self {
        let sql = sql.into();
        let kind = QueryKind::infer(&sql);
        Self {
            sql,
            params: Params::default(),
            kind,
        }
    }

    /// Overrides the inferred statement category.
    pub fn with_kind(mut self, kind: QueryKind) -> Self {
        self.kind = kind;
        self
    }

    /// Replaces all parameters.
    pub fn with_params(mut self, params: Params) -> Self {
        self.params = params;
        self
    }

    /// Appends a positional parameter.
    ///
    /// Switching from named to positional parameters discards the named
    /// ones; the two styles cannot be mixed.
    pub fn bind(mut self, value: impl Into<Value>) -> Self {
        match &mut self.params {
            Params::Positional(values) => values.push(value.into()),
            Params::Named(_) => self.params = Params::Positional(vec![value.into()]),
        }
        self
    }

    /// Appends several positional parameters.
    pub fn bind_all<I, V>(mut self, values: I) -> Self
    where
        I: IntoIterator<Item = V>,
        V: Into<Value>,
    {
        for value in values {
            self = self.bind(value);
        }
        self
    }

    /// Sets a named parameter used by a `:name` placeholder.
    pub fn bind_named(mut self, name: impl Into<String>, value: impl Into<Value>) -> Self {
        match &mut self.params {
            Params::Named(map) => {
                map.insert(name.into(), value.into());
            }
            Params::Positional(_) => {
                let mut map = BTreeMap::new();
                map.insert(name.into(), value.into());
                self.params = Params::Named(map);
            }
        }
        self
    }

    pub fn sql(&self) -> &str {
        &self.sql
    }

    pub fn params(&self) -> &Params {
        &self.params
    }

    pub fn kind(&self) -> QueryKind {
        self.kind
    }

    /// Splits the query into its parts.
    pub fn into_parts(self) -> (String, Params, QueryKind) {
        (self.sql, self.params, self.kind)
    }
}

impl From<&str> for Query {
    fn from(sql: &str) -> Self {
        Self::new(sql)
    }
}

impl From<String> for Query {
    fn from(sql: String) -> Self {
        Self::new(sql)
    }
}
