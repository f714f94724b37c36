// ============================================================================
// Scoped Persistence Library
// ============================================================================

pub mod config;
pub mod context;
pub mod core;
pub mod prelude;
pub mod repository;
pub mod session;
pub mod storage;
pub mod transaction;

// Re-export main types for convenience
pub use config::PersistenceOptions;
pub use context::{ContextService, FlowSuppression, Scope, ScopedSession};
pub use core::{Entity, EntitySchema, KeyKind, PersistenceError, Relation, Result, StorageError};
pub use repository::{AllQuery, Candidates, FlushPolicy, FnQuery, Query, Repository};
pub use session::{
    EntitySet, PoolStats, Session, SessionFactory, SessionHandle, SessionId, SessionOrigin,
    SessionPool,
};
pub use storage::{MemorySession, MemoryStore};
pub use transaction::{
    IsolationLevel, ScopeOption, TransactionMode, TransactionOptions, TransactionScopeOptions,
    UnitOfWork,
};

use std::sync::Arc;

// ============================================================================
// Bootstrap Facade
// ============================================================================

/// Entry point wiring a session factory and options into repositories and
/// units of work.
///
/// # Examples
///
/// ```
/// use scoped_persistence::{AllQuery, Entity, MemoryStore, Persistence, PersistenceError, PersistenceOptions};
/// use serde::{Deserialize, Serialize};
///
/// #[derive(Debug, Clone, Serialize, Deserialize)]
/// struct Note {
///     note_id: i64,
///     text: String,
/// }
///
/// impl Entity for Note {
///     type Id = i64;
///     const TABLE: &'static str = "notes";
///     const KEY: &'static str = "note_id";
///
///     fn id(&self) -> i64 {
///         self.note_id
///     }
/// }
///
/// # fn main() -> scoped_persistence::Result<()> {
/// let store = MemoryStore::builder().register::<Note>().build()?;
/// let persistence = Persistence::memory(&store, PersistenceOptions::default())?;
/// let notes = persistence.repository::<Note>();
/// let mut scope = persistence.scope();
///
/// persistence.unit_of_work().run(&mut scope, |scope| {
///     notes.add(scope, Note { note_id: 0, text: "first".into() })?;
///     notes.add(scope, Note { note_id: 0, text: "second".into() })?;
///     Ok::<_, PersistenceError>(())
/// })?;
///
/// assert_eq!(notes.count(&mut scope, &AllQuery::<Note>::new())?, 2);
/// # Ok(())
/// # }
/// ```
pub struct Persistence<S: Session> {
    context: Arc<ContextService<S>>,
    options: PersistenceOptions,
}

impl<S: Session> Persistence<S> {
    /// Validate `options` and build the context service, pooled or not.
    pub fn new(factory: Arc<dyn SessionFactory<S>>, options: PersistenceOptions) -> Result<Self> {
        options.validate()?;

        let context = if options.use_session_pool {
            ContextService::pooled(factory, options.max_pooled_sessions)
        } else {
            ContextService::new(factory)
        };

        Ok(Self {
            context: Arc::new(context),
            options,
        })
    }

    pub fn options(&self) -> &PersistenceOptions {
        &self.options
    }

    pub fn context(&self) -> &Arc<ContextService<S>> {
        &self.context
    }

    /// Fresh root scope with no ambient session.
    pub fn scope(&self) -> Scope<S> {
        Scope::new()
    }

    /// Unit of work using the configured transaction mode and scope options.
    pub fn unit_of_work(&self) -> UnitOfWork<S> {
        UnitOfWork::new(Arc::clone(&self.context))
            .with_mode(self.options.transaction_mode)
            .with_scope_options(self.options.transaction_scope)
    }

    /// Repository for `E` using the configured flush policy.
    pub fn repository<E>(&self) -> Repository<E, S>
    where
        E: Entity,
        S: EntitySet<E>,
    {
        Repository::new(Arc::clone(&self.context), self.options.flush_policy)
    }

    /// Pool statistics, `None` when pooling is off.
    pub fn pool_stats(&self) -> Option<PoolStats> {
        self.context.pool_stats()
    }
}

impl Persistence<MemorySession> {
    /// Persistence over an in-memory store.
    pub fn memory(store: &MemoryStore, options: PersistenceOptions) -> Result<Self> {
        Self::new(Arc::new(store.clone()), options)
    }
}
