pub mod pool;

use crate::core::{Entity, PersistenceError, Result};
use crate::repository::Query;
use crate::transaction::TransactionOptions;
use async_trait::async_trait;
use log::debug;
use std::sync::{Arc, Weak};
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::sync::{MappedMutexGuard, Mutex, MutexGuard};

pub use pool::{PoolStats, SessionPool};

static NEXT_SESSION_ID: AtomicU64 = AtomicU64::new(1);

/// Process-unique identity of a session handle
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SessionId(pub u64);

impl SessionId {
    pub fn new() -> Self {
        SessionId(NEXT_SESSION_ID.fetch_add(1, Ordering::SeqCst))
    }

    pub fn as_u64(&self) -> u64 {
        self.0
    }
}

impl Default for SessionId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for SessionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "session_{}", self.0)
    }
}

/// Where a session came from, and therefore where it goes on release
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionOrigin {
    /// Built by the factory; dropped on release
    Factory,
    /// Borrowed from the pool; returned on release
    Pool,
}

/// Minimal capability of a storage session: transactions and flushing.
///
/// A session is not internally synchronized; the core only ever reaches it
/// through a [`SessionHandle`].
#[async_trait]
pub trait Session: Send + 'static {
    fn begin_transaction(&mut self, options: &TransactionOptions) -> Result<()>;

    fn commit_transaction(&mut self) -> Result<()>;

    fn rollback_transaction(&mut self) -> Result<()>;

    fn in_transaction(&self) -> bool;

    fn has_pending_changes(&self) -> bool;

    /// Persist pending changes without committing.
    fn flush(&mut self) -> Result<()>;

    async fn flush_async(&mut self) -> Result<()> {
        self.flush()
    }
}

/// Entity-level capability of a session.
#[async_trait]
pub trait EntitySet<E: Entity>: Session {
    /// Stage an insert of `entity` and its related graph. Returns the entity
    /// with generated keys filled in.
    fn add(&mut self, entity: E) -> Result<E>;

    async fn add_async(&mut self, entity: E) -> Result<E> {
        self.add(entity)
    }

    fn find(&mut self, id: &E::Id) -> Result<Option<E>>;

    async fn find_async(&mut self, id: &E::Id) -> Result<Option<E>> {
        self.find(id)
    }

    fn update(&mut self, entity: E) -> Result<E>;

    fn remove(&mut self, entity: &E) -> Result<()>;

    /// Apply the query's filter, eagerly load its paths and materialize.
    fn filter(&mut self, query: &dyn Query<E>) -> Result<Vec<E>>;

    async fn filter_async(&mut self, query: &dyn Query<E>) -> Result<Vec<E>> {
        self.filter(query)
    }

    fn count(&mut self, query: &dyn Query<E>) -> Result<usize>;

    fn any(&mut self, query: &dyn Query<E>) -> Result<bool> {
        Ok(self.count(query)? > 0)
    }
}

/// Builds new sessions on demand.
pub trait SessionFactory<S: Session>: Send + Sync {
    fn create_session(&self) -> Result<S>;
}

impl<S, F> SessionFactory<S> for F
where
    S: Session,
    F: Fn() -> Result<S> + Send + Sync,
{
    fn create_session(&self) -> Result<S> {
        self()
    }
}

struct SessionCell<S: Session> {
    id: SessionId,
    origin: SessionOrigin,
    /// Emptied only when the last handle drops
    session: Mutex<Option<S>>,
    /// Pool the session goes back to when the last handle drops
    pool: Weak<SessionPool<S>>,
}

impl<S: Session> Drop for SessionCell<S> {
    fn drop(&mut self) {
        let Some(session) = self.session.get_mut().take() else {
            return;
        };
        match self.pool.upgrade() {
            Some(pool) => {
                pool.give_back(session);
                debug!("Returned {} to the pool", self.id);
            }
            None => debug!("Released {}", self.id),
        }
    }
}

/// Shared, lockable reference to one session.
///
/// Cloning the handle shares the session; this is how an inheriting scope
/// sees its parent's session. A pooled session goes back to its pool when
/// the last handle is dropped.
pub struct SessionHandle<S: Session> {
    inner: Arc<SessionCell<S>>,
}

impl<S: Session> Clone for SessionHandle<S> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<S: Session> SessionHandle<S> {
    /// Handle owning a session built by a factory.
    pub(crate) fn new(session: S) -> Self {
        Self::with_pool(session, SessionOrigin::Factory, Weak::new())
    }

    /// Handle over a session borrowed from `pool`.
    pub(crate) fn pooled(session: S, pool: &Arc<SessionPool<S>>) -> Self {
        Self::with_pool(session, SessionOrigin::Pool, Arc::downgrade(pool))
    }

    fn with_pool(session: S, origin: SessionOrigin, pool: Weak<SessionPool<S>>) -> Self {
        Self {
            inner: Arc::new(SessionCell {
                id: SessionId::new(),
                origin,
                session: Mutex::new(Some(session)),
                pool,
            }),
        }
    }

    pub fn id(&self) -> SessionId {
        self.inner.id
    }

    pub fn origin(&self) -> SessionOrigin {
        self.inner.origin
    }

    /// Lock the session from synchronous code.
    ///
    /// Never waits: a session held by another worker yields `SessionBusy`.
    pub fn lock(&self) -> Result<MappedMutexGuard<'_, S>> {
        let guard = self
            .inner
            .session
            .try_lock()
            .map_err(|_| PersistenceError::SessionBusy(self.id()))?;
        MutexGuard::try_map(guard, Option::as_mut).map_err(|_| PersistenceError::NotSet)
    }

    /// Lock the session from asynchronous code, waiting for other workers.
    pub async fn lock_async(&self) -> Result<MappedMutexGuard<'_, S>> {
        let guard = self.inner.session.lock().await;
        MutexGuard::try_map(guard, Option::as_mut).map_err(|_| PersistenceError::NotSet)
    }

    pub fn ptr_eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }

    /// Number of live references to this session, this one included.
    pub(crate) fn ref_count(&self) -> usize {
        Arc::strong_count(&self.inner)
    }
}

impl<S: Session> std::fmt::Debug for SessionHandle<S> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionHandle")
            .field("id", &self.inner.id)
            .field("origin", &self.inner.origin)
            .finish()
    }
}
