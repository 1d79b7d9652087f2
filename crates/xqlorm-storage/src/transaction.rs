//! Transaction bookkeeping for a database session

use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};
use xqlorm_core::{Error, Result};

/// Global transaction ID counter
static TRANSACTION_COUNTER: AtomicU64 = AtomicU64::new(1);

/// Transaction state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TransactionState {
    /// Transaction is active and accepting statements
    Active,
    /// Transaction has been committed
    Committed,
    /// Transaction has been rolled back
    RolledBack,
}

/// An explicit transaction opened on the database collaborator
#[derive(Debug)]
pub struct Transaction {
    id: u64,
    state: TransactionState,
}

impl Transaction {
    /// Record the start of a new transaction
    pub fn begin() -> Self {
        Self {
            id: TRANSACTION_COUNTER.fetch_add(1, Ordering::SeqCst),
            state: TransactionState::Active,
        }
    }

    /// Get the transaction ID
    pub fn id(&self) -> u64 {
        self.id
    }

    /// Get the transaction state
    pub fn state(&self) -> TransactionState {
        self.state
    }

    /// Check if transaction is active
    pub fn is_active(&self) -> bool {
        self.state == TransactionState::Active
    }

    fn check_active(&self) -> Result<()> {
        if !self.is_active() {
            return Err(Error::Transaction(format!(
                "transaction {} is no longer active",
                self.id
            )));
        }
        Ok(())
    }

    /// Mark the transaction committed
    pub fn commit(&mut self) -> Result<()> {
        self.check_active()?;
        self.state = TransactionState::Committed;
        Ok(())
    }

    /// Mark the transaction rolled back
    pub fn rollback(&mut self) -> Result<()> {
        self.check_active()?;
        self.state = TransactionState::RolledBack;
        Ok(())
    }
}
