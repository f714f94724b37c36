// ============================================================================
// Transaction Module
// ============================================================================
//
// - options:      transaction mode, scope options, isolation level
// - state:        transaction identity and lifecycle (Active, Committed, Aborted)
// - change:       staged writes (Command Pattern)
// - unit_of_work: runs caller logic inside one ambient session + transaction
//
// ============================================================================

pub mod change;
pub mod options;
pub mod state;
pub mod unit_of_work;

pub use change::Change;
pub use options::{
    IsolationLevel, ScopeOption, TransactionMode, TransactionOptions, TransactionScopeOptions,
};
pub use state::{Transaction, TransactionId, TransactionState};
pub use unit_of_work::UnitOfWork;
