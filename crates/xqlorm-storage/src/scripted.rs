//! In-memory database with scripted answers
//!
//! Records every statement with its parameters, answers selects from a queue
//! of row sets, hands out generated keys from a queue, and can be told to
//! fail the next call.

use crate::backend::{BackendResult, Database};
use crate::transaction::TransactionState;
use serde::Serialize;
use std::collections::VecDeque;
use thiserror::Error;
use tracing::trace;
use xqlorm_core::{Dialect, DialectOptions, Parameters, Row, StandardDialect, Value};

/// Failures produced by the [`ScriptedDatabase`]
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ScriptedFailure {
    #[error("Injected {0} failure")]
    Injected(&'static str),

    #[error("No generated id scripted")]
    NoGeneratedId,

    #[error("No transaction to {0}")]
    NoTransaction(&'static str),
}

/// Kind of a recorded call
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum StatementKind {
    Select,
    Execute,
}

/// A statement received by the database
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ExecutedStatement {
    pub kind: StatementKind,
    pub sql: String,
    pub parameters: Parameters,
}

/// Scripted [`Database`] for tests
#[derive(Debug, Default)]
pub struct ScriptedDatabase {
    dialect: StandardDialect,
    log: Vec<ExecutedStatement>,
    results: VecDeque<Vec<Row>>,
    generated_ids: VecDeque<Value>,
    last_insert_id_calls: usize,
    transactions: Vec<TransactionState>,
    in_transaction: bool,
    fail_next: bool,
}

impl ScriptedDatabase {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder: use a dialect built from `options`
    pub fn with_dialect(mut self, options: DialectOptions) -> Self {
        self.dialect = StandardDialect::new(options);
        self
    }

    /// Queue the rows answered by the next select
    pub fn push_rows(&mut self, rows: Vec<Row>) -> &mut Self {
        self.results.push_back(rows);
        self
    }

    /// Queue the key answered by the next `last_insert_id`
    pub fn push_generated_id<V: Into<Value>>(&mut self, id: V) -> &mut Self {
        self.generated_ids.push_back(id.into());
        self
    }

    /// Make the next call fail
    pub fn fail_next(&mut self) {
        self.fail_next = true;
    }

    /// Every select and execute, in order
    pub fn statements(&self) -> &[ExecutedStatement] {
        &self.log
    }

    /// Executed (non-select) statements, in order
    pub fn executed(&self) -> Vec<&ExecutedStatement> {
        self.of_kind(StatementKind::Execute)
    }

    pub fn selects(&self) -> Vec<&ExecutedStatement> {
        self.of_kind(StatementKind::Select)
    }

    fn of_kind(&self, kind: StatementKind) -> Vec<&ExecutedStatement> {
        self.log.iter().filter(|s| s.kind == kind).collect()
    }

    pub fn last_insert_id_calls(&self) -> usize {
        self.last_insert_id_calls
    }

    /// Transaction state changes, in order
    pub fn transactions(&self) -> &[TransactionState] {
        &self.transactions
    }

    pub fn in_transaction(&self) -> bool {
        self.in_transaction
    }

    /// Forget recorded statements and counters, keeping scripted answers
    pub fn clear_log(&mut self) {
        self.log.clear();
        self.last_insert_id_calls = 0;
        self.transactions.clear();
    }

    fn check_failure(&mut self, operation: &'static str) -> BackendResult<()> {
        if std::mem::take(&mut self.fail_next) {
            return Err(Box::new(ScriptedFailure::Injected(operation)));
        }
        Ok(())
    }

    fn record(&mut self, kind: StatementKind, sql: &str, parameters: &Parameters) {
        trace!("Scripted {:?}: {}", kind, sql);
        self.log.push(ExecutedStatement {
            kind,
            sql: sql.to_string(),
            parameters: parameters.clone(),
        });
    }
}

impl Database for ScriptedDatabase {
    fn dialect(&self) -> &dyn Dialect {
        &self.dialect
    }

    fn select(&mut self, sql: &str, parameters: &Parameters) -> BackendResult<Vec<Row>> {
        self.check_failure("select")?;
        self.record(StatementKind::Select, sql, parameters);
        Ok(self.results.pop_front().unwrap_or_default())
    }

    fn execute(&mut self, sql: &str, parameters: &Parameters) -> BackendResult<u64> {
        self.check_failure("execute")?;
        self.record(StatementKind::Execute, sql, parameters);
        Ok(1)
    }

    fn last_insert_id(&mut self) -> BackendResult<Value> {
        self.check_failure("last_insert_id")?;
        self.last_insert_id_calls += 1;
        self.generated_ids
            .pop_front()
            .ok_or_else(|| ScriptedFailure::NoGeneratedId.into())
    }

    fn start_transaction(&mut self) -> BackendResult<()> {
        self.check_failure("start_transaction")?;
        self.in_transaction = true;
        self.transactions.push(TransactionState::Active);
        Ok(())
    }

    fn commit(&mut self) -> BackendResult<()> {
        self.check_failure("commit")?;
        if !std::mem::take(&mut self.in_transaction) {
            return Err(Box::new(ScriptedFailure::NoTransaction("commit")));
        }
        self.transactions.push(TransactionState::Committed);
        Ok(())
    }

    fn rollback(&mut self) -> BackendResult<()> {
        self.check_failure("rollback")?;
        if !std::mem::take(&mut self.in_transaction) {
            return Err(Box::new(ScriptedFailure::NoTransaction("rollback")));
        }
        self.transactions.push(TransactionState::RolledBack);
        Ok(())
    }
}
