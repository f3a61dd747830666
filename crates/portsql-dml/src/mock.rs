//! Scripted [`Session`] double used by the unit tests.
//!
//! Every statement is recorded. Responses come from rules matched by
//! substring, first match wins; unmatched statements get sensible defaults
//! for the queries issued during connection setup.

use std::sync::{Arc, Mutex, MutexGuard};

use portsql_types::Value;

use crate::config::ConnectionOptions;
use crate::error::BackendError;
use crate::session::{Connector, Execution, ResultSet, RowStream, Session};

#[derive(Debug, Clone)]
pub(crate) enum Response {
    Rows(ResultSet),
    Affected(u64),
    Error(BackendError),
}

impl Response {
    pub(crate) fn rows(columns: &[&str], rows: Vec<Vec<Value>>) -> Self {
        Self::Rows(ResultSet::new(
            columns.iter().map(|c| c.to_string()).collect(),
            rows,
        ))
    }

    pub(crate) fn value(column: &str, value: impl Into<Value>) -> Self {
        Self::rows(&[column], vec![vec![value.into()]])
    }

    pub(crate) fn error(message: &str) -> Self {
        Self::Error(BackendError::with_code(1064, message))
    }
}

#[derive(Debug)]
struct Rule {
    needle: String,
    response: Response,
    once: bool,
}

#[derive(Debug)]
pub(crate) struct Script {
    log: Vec<String>,
    rules: Vec<Rule>,
    pub(crate) version: String,
    pub(crate) collation_database: String,
    pub(crate) group_concat_max_len: i64,
    pub(crate) charset: Option<String>,
    pub(crate) closed: bool,
    last_insert_id: u64,
}

impl Default for Script {
    fn default() -> Self {
        Self {
            log: Vec::new(),
            rules: Vec::new(),
            version: "8.0.36".to_string(),
            collation_database: "utf8mb4_0900_ai_ci".to_string(),
            group_concat_max_len: 1024,
            charset: None,
            closed: false,
            last_insert_id: 0,
        }
    }
}

impl Script {
    fn respond(&mut self, sql: &str) -> Option<Response> {
        let index = self.rules.iter().position(|r| sql.contains(&r.needle))?;
        if self.rules[index].once {
            Some(self.rules.remove(index).response)
        } else {
            Some(self.rules[index].response.clone())
        }
    }

    fn default_rows(&self, sql: &str) -> ResultSet {
        let one = |column: &str, value: Value| ResultSet::new(vec![column.into()], vec![vec![value]]);
        if sql.contains("VERSION()") {
            one("VERSION()", Value::from(self.version.as_str()))
        } else if sql.contains("@@collation_database") {
            one("@@collation_database", Value::from(self.collation_database.as_str()))
        } else if sql.contains("@@group_concat_max_len") {
            one("@@group_concat_max_len", Value::Int(self.group_concat_max_len))
        } else if sql.starts_with("SHOW TABLE STATUS") {
            ResultSet::new(
                vec!["Name".into(), "Engine".into(), "Collation".into()],
                Vec::new(),
            )
        } else {
            ResultSet::default()
        }
    }
}

/// Shared handle to a script; cheap to clone into sessions.
#[derive(Debug, Clone, Default)]
pub(crate) struct ScriptHandle(Arc<Mutex<Script>>);

impl ScriptHandle {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    pub(crate) fn script(&self) -> MutexGuard<'_, Script> {
        self.0.lock().expect("script lock poisoned")
    }

    /// Answers every statement containing `needle`.
    pub(crate) fn on(&self, needle: &str, response: Response) -> &Self {
        self.script().rules.push(Rule {
            needle: needle.to_string(),
            response,
            once: false,
        });
        self
    }

    /// Answers the next statement containing `needle`, then forgets the rule.
    pub(crate) fn once(&self, needle: &str, response: Response) -> &Self {
        self.script().rules.push(Rule {
            needle: needle.to_string(),
            response,
            once: true,
        });
        self
    }

    /// Statements received so far.
    pub(crate) fn log(&self) -> Vec<String> {
        self.script().log.clone()
    }

    pub(crate) fn clear_log(&self) {
        self.script().log.clear();
    }

    /// Statements that start with `prefix`.
    pub(crate) fn statements(&self, prefix: &str) -> Vec<String> {
        self.log()
            .into_iter()
            .filter(|s| s.starts_with(prefix))
            .collect()
    }

    pub(crate) fn session(&self) -> ScriptedSession {
        ScriptedSession {
            script: self.clone(),
        }
    }

    pub(crate) fn connector(&self) -> ScriptedConnector {
        ScriptedConnector {
            script: self.clone(),
            installed: true,
            refuse: None,
        }
    }
}

#[derive(Debug)]
pub(crate) struct ScriptedSession {
    script: ScriptHandle,
}

impl ScriptedSession {
    fn run(&mut self, sql: &str) -> Result<ResultSet, BackendError> {
        let mut script = self.script.script();
        if script.closed {
            return Err(BackendError::with_code(2006, "MySQL server has gone away"));
        }
        script.log.push(sql.to_string());
        match script.respond(sql) {
            Some(Response::Rows(rows)) => Ok(rows),
            Some(Response::Affected(_)) => Ok(ResultSet::default()),
            Some(Response::Error(err)) => Err(err),
            None => Ok(script.default_rows(sql)),
        }
    }
}

struct VecStream {
    columns: Vec<String>,
    rows: std::vec::IntoIter<Vec<Value>>,
}

impl Iterator for VecStream {
    type Item = Result<Vec<Value>, BackendError>;

    fn next(&mut self) -> Option<Self::Item> {
        self.rows.next().map(Ok)
    }
}

impl RowStream for VecStream {
    fn columns(&self) -> &[String] {
        &self.columns
    }
}

impl Session for ScriptedSession {
    fn server_banner(&self) -> String {
        self.script.script().version.clone()
    }

    fn set_charset(&mut self, charset: &str) -> Result<(), BackendError> {
        let mut script = self.script.script();
        script.log.push(format!("--set_charset({charset})"));
        script.charset = Some(charset.to_string());
        Ok(())
    }

    fn query(&mut self, sql: &str) -> Result<ResultSet, BackendError> {
        self.run(sql)
    }

    fn query_unbuffered<'s>(
        &'s mut self,
        sql: &str,
    ) -> Result<Box<dyn RowStream + 's>, BackendError> {
        let result = self.run(sql)?;
        Ok(Box::new(VecStream {
            columns: result.columns,
            rows: result.rows.into_iter(),
        }))
    }

    fn execute(&mut self, sql: &str) -> Result<Execution, BackendError> {
        let mut script = self.script.script();
        if script.closed {
            return Err(BackendError::with_code(2006, "MySQL server has gone away"));
        }
        script.log.push(sql.to_string());
        let affected_rows = match script.respond(sql) {
            Some(Response::Error(err)) => return Err(err),
            Some(Response::Affected(n)) => n,
            Some(Response::Rows(_)) | None => 1,
        };
        let last_insert_id = if sql.starts_with("INSERT") {
            script.last_insert_id += 1;
            script.last_insert_id
        } else {
            0
        };
        Ok(Execution {
            affected_rows,
            last_insert_id,
        })
    }

    fn execute_batch(&mut self, sql: &str) -> Result<(), BackendError> {
        self.execute(sql).map(|_| ())
    }

    fn close(&mut self) {
        self.script.script().closed = true;
    }
}

#[derive(Debug)]
pub(crate) struct ScriptedConnector {
    script: ScriptHandle,
    pub(crate) installed: bool,
    pub(crate) refuse: Option<BackendError>,
}

impl Connector for ScriptedConnector {
    fn driver_installed(&self) -> Result<(), String> {
        if self.installed {
            Ok(())
        } else {
            Err("mysql client library is not available".to_string())
        }
    }

    fn connect(&self, _options: &ConnectionOptions) -> Result<Box<dyn Session>, BackendError> {
        if let Some(err) = &self.refuse {
            return Err(err.clone());
        }
        self.script.script().closed = false;
        Ok(Box::new(self.script.session()))
    }
}
