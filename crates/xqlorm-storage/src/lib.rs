//! XQLORM Storage Collaborator
//!
//! Defines the interface the entity manager executes SQL through.
//!
//! # Modules
//!
//! - `backend` - The `Database` trait
//! - `transaction` - Transaction state tracking
//! - `scripted` - Scripted in-memory database for tests

pub mod backend;
pub mod scripted;
pub mod transaction;

pub use backend::{BackendResult, Database};
pub use scripted::{ExecutedStatement, ScriptedDatabase, ScriptedFailure, StatementKind};
pub use transaction::{Transaction, TransactionState};
