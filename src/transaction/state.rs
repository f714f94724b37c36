// ============================================================================
// Transaction State Management
// ============================================================================
//
// State Pattern for the transaction lifecycle:
// Active -> Committed | Aborted
//
// A transaction collects the changes a session has flushed while it is
// open. They stay private to that session until commit.
//
// ============================================================================

use super::{Change, TransactionOptions};
use crate::core::StorageError;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

/// Global transaction ID counter
static NEXT_TXN_ID: AtomicU64 = AtomicU64::new(1);

/// Unique identifier for a transaction
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TransactionId(pub u64);

impl TransactionId {
    /// Generate a new unique transaction ID
    pub fn new() -> Self {
        TransactionId(NEXT_TXN_ID.fetch_add(1, Ordering::SeqCst))
    }

    /// Get the raw ID value
    pub fn as_u64(&self) -> u64 {
        self.0
    }
}

impl Default for TransactionId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for TransactionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "txn_{}", self.0)
    }
}

/// Transaction state following the State Pattern
///
/// State transitions:
/// ```text
/// Active ──commit──> Committed
///   │
///   └──rollback──> Aborted
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransactionState {
    Active,
    Committed,
    Aborted,
}

impl TransactionState {
    pub fn is_active(&self) -> bool {
        matches!(self, TransactionState::Active)
    }

    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            TransactionState::Committed | TransactionState::Aborted
        )
    }
}

impl std::fmt::Display for TransactionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TransactionState::Active => write!(f, "ACTIVE"),
            TransactionState::Committed => write!(f, "COMMITTED"),
            TransactionState::Aborted => write!(f, "ABORTED"),
        }
    }
}

/// An open session transaction.
///
/// # Thread Safety
/// Owned by exactly one session; the session handle serializes access.
#[derive(Debug)]
pub struct Transaction {
    id: TransactionId,
    state: TransactionState,
    options: TransactionOptions,
    /// Flushed but uncommitted changes, in flush order
    changes: Vec<Change>,
    start_time: Instant,
}

impl Transaction {
    pub fn new(id: TransactionId, options: TransactionOptions) -> Self {
        Self {
            id,
            state: TransactionState::Active,
            options,
            changes: Vec::new(),
            start_time: Instant::now(),
        }
    }

    pub fn id(&self) -> TransactionId {
        self.id
    }

    pub fn state(&self) -> TransactionState {
        self.state
    }

    pub fn options(&self) -> &TransactionOptions {
        &self.options
    }

    pub fn changes(&self) -> &[Change] {
        &self.changes
    }

    pub fn change_count(&self) -> usize {
        self.changes.len()
    }

    pub fn duration(&self) -> Duration {
        self.start_time.elapsed()
    }

    /// Record a flushed change
    ///
    /// # Errors
    /// Returns error if transaction is not active
    pub fn record_change(&mut self, change: Change) -> Result<(), StorageError> {
        self.ensure_active("record change")?;
        self.changes.push(change);
        Ok(())
    }

    /// Mark transaction as committed, handing back its changes for
    /// application.
    pub fn commit(&mut self) -> Result<Vec<Change>, StorageError> {
        self.ensure_active("commit")?;
        self.state = TransactionState::Committed;
        Ok(std::mem::take(&mut self.changes))
    }

    /// Mark transaction as aborted and discard changes
    pub fn rollback(&mut self) -> Result<(), StorageError> {
        self.ensure_active("rollback")?;
        self.changes.clear();
        self.state = TransactionState::Aborted;
        Ok(())
    }

    fn ensure_active(&self, action: &str) -> Result<(), StorageError> {
        if !self.state.is_active() {
            return Err(StorageError::Transaction(format!(
                "Cannot {}: transaction {} is already {}",
                action, self.id, self.state
            )));
        }
        Ok(())
    }
}
