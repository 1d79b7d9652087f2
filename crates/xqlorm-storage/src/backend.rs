//! Database execution collaborator
//!
//! The entity manager talks to storage only through [`Database`]. Failures
//! are reported as boxed errors and wrapped into the core error family by
//! the caller, keeping the original error as the source.

use xqlorm_core::{BackendError, Dialect, Parameters, Row, Value};

/// Result of a collaborator call
pub type BackendResult<T> = std::result::Result<T, BackendError>;

/// A parameterized SQL execution handle with transaction control
///
/// Implementations own one connection or session. Parameters are keyed by
/// name without the placeholder prefix, and rows are positional in the order
/// of the selected columns.
pub trait Database {
    /// Formatters for the SQL this backend accepts
    fn dialect(&self) -> &dyn Dialect;

    /// Run a query and return all rows
    fn select(&mut self, sql: &str, parameters: &Parameters) -> BackendResult<Vec<Row>>;

    /// Run a query and return its first row
    fn select_first(&mut self, sql: &str, parameters: &Parameters) -> BackendResult<Option<Row>> {
        Ok(self.select(sql, parameters)?.into_iter().next())
    }

    /// Run a statement and return the number of affected rows
    fn execute(&mut self, sql: &str, parameters: &Parameters) -> BackendResult<u64>;

    /// Key generated by the most recent insert
    fn last_insert_id(&mut self) -> BackendResult<Value>;

    fn start_transaction(&mut self) -> BackendResult<()>;

    fn commit(&mut self) -> BackendResult<()>;

    fn rollback(&mut self) -> BackendResult<()>;
}

impl<D: Database + ?Sized> Database for Box<D> {
    fn dialect(&self) -> &dyn Dialect {
        (**self).dialect()
    }

    fn select(&mut self, sql: &str, parameters: &Parameters) -> BackendResult<Vec<Row>> {
        (**self).select(sql, parameters)
    }

    fn select_first(&mut self, sql: &str, parameters: &Parameters) -> BackendResult<Option<Row>> {
        (**self).select_first(sql, parameters)
    }

    fn execute(&mut self, sql: &str, parameters: &Parameters) -> BackendResult<u64> {
        (**self).execute(sql, parameters)
    }

    fn last_insert_id(&mut self) -> BackendResult<Value> {
        (**self).last_insert_id()
    }

    fn start_transaction(&mut self) -> BackendResult<()> {
        (**self).start_transaction()
    }

    fn commit(&mut self) -> BackendResult<()> {
        (**self).commit()
    }

    fn rollback(&mut self) -> BackendResult<()> {
        (**self).rollback()
    }
}
