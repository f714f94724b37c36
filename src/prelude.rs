//! Everyday imports for application code.
//!
//! `use scoped_persistence::prelude::*;` brings in the facade, the scope,
//! repositories, queries and the unit of work.

pub use crate::{
    AllQuery, Candidates, Entity, FlushPolicy, FnQuery, KeyKind, Persistence, PersistenceError,
    PersistenceOptions, Query, Relation, Repository, Scope, UnitOfWork,
};

pub mod engine {
    //! Building blocks for plugging in a storage engine.
    pub use crate::session::{EntitySet, Session, SessionFactory};
    pub use crate::storage::{MemorySession, MemoryStore};
    pub use crate::transaction::{TransactionOptions, TransactionState};
    pub use crate::StorageError;
}
