//! Transaction and savepoint bookkeeping.
//!
//! The controller owns no connection. Each method validates the request,
//! updates the state and returns the statements the caller must run.
//! Logical nesting is emulated with savepoints on top of one real
//! transaction.

use crate::error::DmlError;

pub(crate) const ISOLATION_LEVEL_SQL: &str = "SET SESSION TRANSACTION ISOLATION LEVEL READ COMMITTED";

/// State of the single real transaction and its savepoint stack.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TransactionController {
    active: bool,
    savepoints: Vec<String>,
    autocommitted: bool,
    generated: u32,
}

fn validate_name(name: &str) -> Result<(), DmlError> {
    let mut chars = name.chars();
    let valid = name.len() <= 64
        && chars
            .next()
            .is_some_and(|c| c.is_ascii_alphabetic() || c == '_')
        && chars.all(|c| c.is_ascii_alphanumeric() || c == '_');
    if valid {
        Ok(())
    } else {
        Err(DmlError::coding(format!("invalid savepoint name '{name}'")))
    }
}

impl TransactionController {
    pub fn new() -> Self {
        Self::default()
    }

    /// Whether a real transaction is open.
    pub fn is_active(&self) -> bool {
        self.active
    }

    /// Whether a structure change implicitly committed the transaction.
    pub fn is_autocommitted(&self) -> bool {
        self.autocommitted
    }

    /// Savepoint names, oldest first.
    pub fn savepoints(&self) -> &[String] {
        &self.savepoints
    }

    /// Starts the real transaction.
    ///
    /// # Errors
    ///
    /// Returns `DmlError::Transaction` when one is already open.
    pub fn begin(&mut self) -> Result<[&'static str; 2], DmlError> {
        if self.active {
            return Err(DmlError::Transaction(
                "a transaction is already in progress".into(),
            ));
        }
        self.active = true;
        self.autocommitted = false;
        self.savepoints.clear();
        Ok([ISOLATION_LEVEL_SQL, "START TRANSACTION"])
    }

    /// Ends the real transaction with `COMMIT`.
    ///
    /// # Errors
    ///
    /// Returns `DmlError::Transaction` when no transaction is open.
    pub fn commit(&mut self) -> Result<&'static str, DmlError> {
        self.finish("commit")?;
        Ok("COMMIT")
    }

    /// Ends the real transaction with `ROLLBACK`.
    ///
    /// # Errors
    ///
    /// Returns `DmlError::Transaction` when no transaction is open.
    pub fn rollback(&mut self) -> Result<&'static str, DmlError> {
        self.finish("roll back")?;
        Ok("ROLLBACK")
    }

    fn finish(&mut self, action: &str) -> Result<(), DmlError> {
        if !self.active {
            return Err(DmlError::Transaction(format!(
                "cannot {action}: no transaction in progress"
            )));
        }
        self.reset();
        Ok(())
    }

    /// Forgets all state, e.g. after the connection failed mid-transaction.
    pub fn reset(&mut self) {
        self.active = false;
        self.autocommitted = false;
        self.savepoints.clear();
    }

    /// Pushes a savepoint.
    ///
    /// # Errors
    ///
    /// Returns `DmlError::Transaction` outside a transaction and
    /// `DmlError::Coding` for invalid or duplicate names.
    pub fn create_savepoint(&mut self, name: &str) -> Result<String, DmlError> {
        validate_name(name)?;
        if !self.active {
            return Err(DmlError::Transaction(format!(
                "cannot create savepoint '{name}' outside a transaction"
            )));
        }
        if self.savepoints.iter().any(|s| s == name) {
            return Err(DmlError::coding(format!("savepoint '{name}' already exists")));
        }
        self.savepoints.push(name.to_string());
        Ok(format!("SAVEPOINT {name}"))
    }

    /// Releases a savepoint together with every savepoint created after it.
    ///
    /// After an implicit commit nothing can be released; the bookkeeping is
    /// still updated and `None` is returned so no statement is sent.
    ///
    /// # Errors
    ///
    /// Returns `DmlError::Coding` for unknown savepoints.
    pub fn release_savepoint(&mut self, name: &str) -> Result<Option<String>, DmlError> {
        let position = self.position(name)?;
        self.savepoints.truncate(position);
        if self.autocommitted {
            return Ok(None);
        }
        Ok(Some(format!("RELEASE SAVEPOINT {name}")))
    }

    /// Rolls back to a savepoint. The savepoint stays on the stack, later
    /// ones are discarded.
    ///
    /// # Errors
    ///
    /// Returns `DmlError::RollbackAfterAutocommit` after an implicit commit
    /// and `DmlError::Coding` for unknown savepoints.
    pub fn rollback_savepoint(&mut self, name: &str) -> Result<String, DmlError> {
        if self.autocommitted {
            return Err(DmlError::RollbackAfterAutocommit(name.to_string()));
        }
        let position = self.position(name)?;
        self.savepoints.truncate(position + 1);
        Ok(format!("ROLLBACK TO SAVEPOINT {name}"))
    }

    fn position(&self, name: &str) -> Result<usize, DmlError> {
        validate_name(name)?;
        self.savepoints
            .iter()
            .rposition(|s| s == name)
            .ok_or_else(|| DmlError::coding(format!("unknown savepoint '{name}'")))
    }

    /// Records a structure change. Returns `true` when it happened inside a
    /// transaction and therefore committed it implicitly.
    pub fn note_structure_change(&mut self) -> bool {
        if self.active {
            self.autocommitted = true;
        }
        self.active
    }

    /// Unique name for a savepoint created on behalf of a nested
    /// transaction.
    pub fn generate_savepoint_name(&mut self) -> String {
        self.generated += 1;
        format!("tsp_{}", self.generated)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;

    #[test]
    fn begin_sets_isolation_then_starts() {
        let mut tx = TransactionController::new();
        let sql = tx.begin().expect("begin");
        assert_eq!(sql, [ISOLATION_LEVEL_SQL, "START TRANSACTION"]);
        assert!(tx.is_active());
        let err = tx.begin().expect_err("nested begin");
        assert_eq!(err.kind(), ErrorKind::Transaction);
        assert_eq!(tx.commit().expect("commit"), "COMMIT");
        assert!(!tx.is_active());
        assert!(tx.rollback().is_err());
    }

    #[test]
    fn release_drops_later_savepoints() {
        let mut tx = TransactionController::new();
        tx.begin().expect("begin");
        for name in ["a", "b", "c"] {
            tx.create_savepoint(name).expect("savepoint");
        }
        assert_eq!(
            tx.release_savepoint("b").expect("release"),
            Some("RELEASE SAVEPOINT b".to_string())
        );
        assert_eq!(tx.savepoints(), ["a"]);
    }

    #[test]
    fn rollback_to_keeps_the_target() {
        let mut tx = TransactionController::new();
        tx.begin().expect("begin");
        tx.create_savepoint("a").expect("a");
        tx.create_savepoint("b").expect("b");
        assert_eq!(tx.rollback_savepoint("a").expect("rollback"), "ROLLBACK TO SAVEPOINT a");
        assert_eq!(tx.savepoints(), ["a"]);
    }

    #[test]
    fn savepoints_need_a_transaction_and_a_valid_name() {
        let mut tx = TransactionController::new();
        assert_eq!(
            tx.create_savepoint("a").expect_err("no transaction").kind(),
            ErrorKind::Transaction
        );
        tx.begin().expect("begin");
        for bad in ["", "1a", "a; DROP TABLE x", "a-b"] {
            assert_eq!(
                tx.create_savepoint(bad).expect_err("bad name").kind(),
                ErrorKind::Coding
            );
        }
        tx.create_savepoint("a").expect("a");
        assert!(tx.create_savepoint("a").is_err());
        assert_eq!(
            tx.release_savepoint("zz").expect_err("unknown").kind(),
            ErrorKind::Coding
        );
    }

    #[test]
    fn implicit_commit_degrades_release_and_blocks_rollback() {
        let mut tx = TransactionController::new();
        tx.begin().expect("begin");
        tx.create_savepoint("sp1").expect("sp1");
        assert!(tx.note_structure_change());
        assert!(tx.is_autocommitted());
        assert_eq!(tx.release_savepoint("sp1").expect("silent release"), None);
        let err = tx.rollback_savepoint("sp1").expect_err("rollback after DDL");
        assert!(matches!(err, DmlError::RollbackAfterAutocommit(ref n) if n == "sp1"));
        tx.commit().expect("commit");
        assert!(!tx.is_autocommitted());
    }

    #[test]
    fn structure_change_outside_transaction_is_harmless() {
        let mut tx = TransactionController::new();
        assert!(!tx.note_structure_change());
        assert!(!tx.is_autocommitted());
    }

    #[test]
    fn generated_names_are_unique() {
        let mut tx = TransactionController::new();
        let a = tx.generate_savepoint_name();
        let b = tx.generate_savepoint_name();
        assert_ne!(a, b);
        assert!(a.starts_with("tsp_"));
    }
}
